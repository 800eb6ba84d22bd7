use crate::{
    config::Settings,
    domain::{SignalEvent, WarCoordinator, WarStore, WizardSessions, WizardSweeper},
    infra::{
        db::{DBConnection, DatabasePoolConfig},
        identity::{MentionResolver, RoleAuthorizer},
        ledger::{Ledger, LedgerClient},
        ledger_mock::MockLedger,
        notifier::{LogBoard, LogNotifier},
    },
};
use anyhow::anyhow;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, IntoMakeService},
    serve::Serve,
    Json, Router,
};
use log::{error, info, warn};
use serde_json::json;
use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct Application {
    server: Serve<TcpListener, IntoMakeService<Router>, Router>,
    cancellation_token: CancellationToken,
    background_tasks: TaskTracker,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            config.api_settings.domain, config.api_settings.port
        );
        let listener = SocketAddr::from_str(&address)?;
        let origins = config.api_settings.origins.clone();
        let (app_state, background_tasks, cancellation_token) = build_app(config).await?;
        let server = build_server(listener, app_state, origins).await?;
        Ok(Self {
            server,
            cancellation_token,
            background_tasks,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Starting server...");
        match self.server.with_graceful_shutdown(shutdown_signal()).await {
            Ok(_) => {
                info!("Server shutdown initiated");
                self.cancellation_token.cancel();

                let timeout = tokio::time::sleep(Duration::from_secs(10));
                select! {
                    _ = self.background_tasks.wait() => {
                        info!("Background tasks completed gracefully");
                    }
                    _ = timeout => {
                        warn!("Background tasks timed out during shutdown");
                    }
                }

                info!("Shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Server shutdown error: {}", e);
                self.cancellation_token.cancel();

                let _ = tokio::time::timeout(
                    Duration::from_secs(5),
                    self.background_tasks.wait(),
                )
                .await;

                Err(anyhow!("Error during server shutdown: {}", e))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<WarCoordinator>,
    pub store: Arc<WarStore>,
    /// Feed for transport adapters delivering availability events.
    pub signals: async_channel::Sender<SignalEvent>,
}

pub async fn build_app(
    config: Settings,
) -> Result<(AppState, TaskTracker, CancellationToken), anyhow::Error> {
    std::fs::create_dir_all(&config.db_settings.data_folder)
        .map_err(|e| anyhow!("Failed to create data folder: {}", e))?;

    let db = DBConnection::new(
        &config.db_settings.data_folder,
        &config.bot_settings.name,
        DatabasePoolConfig::from(config.db_settings.clone()),
    )
    .await?;
    let store = Arc::new(WarStore::new(db));

    let ledger: Arc<dyn Ledger> = match &config.ledger_settings.webhook_url {
        Some(url) => Arc::new(LedgerClient::new(url)?),
        None => {
            warn!("ledger webhook not configured; audit rows stay in-process");
            Arc::new(MockLedger::new())
        }
    };

    let wizards = Arc::new(WizardSessions::new(
        config.bot_settings.display_timezone.clone(),
        config.bot_settings.wizard_idle_secs,
    ));

    // Log-backed sinks stand in until a chat transport adapter registers.
    let coordinator = Arc::new(
        WarCoordinator::new(
            store.clone(),
            ledger,
            Arc::new(LogNotifier),
            Arc::new(LogBoard),
            Arc::new(RoleAuthorizer::new(config.bot_settings.manager_ids.clone())),
            Arc::new(MentionResolver::new()),
            wizards.clone(),
        )
        .await?,
    );

    let cancellation_token = CancellationToken::new();
    let background_tasks = TaskTracker::new();

    let (signal_tx, signal_rx) =
        async_channel::bounded::<SignalEvent>(config.bot_settings.signal_queue_depth);

    let dispatcher_coordinator = coordinator.clone();
    let dispatcher_token = cancellation_token.clone();
    background_tasks.spawn(async move {
        info!("Starting signal dispatcher");
        loop {
            select! {
                event = signal_rx.recv() => match event {
                    Ok(event) => {
                        let war_id = event.war_id;
                        if let Err(e) = dispatcher_coordinator.handle_signal(event).await {
                            warn!("signal for war {} rejected: {}", war_id, e);
                        }
                    }
                    Err(_) => {
                        info!("Signal channel closed, dispatcher stopping");
                        break;
                    }
                },
                _ = dispatcher_token.cancelled() => {
                    info!("Signal dispatcher cancelled");
                    break;
                }
            }
        }
    });

    let sweeper = WizardSweeper::new(
        wizards,
        cancellation_token.clone(),
        Duration::from_secs(config.bot_settings.wizard_sweep_secs),
    );
    background_tasks.spawn(async move {
        if let Err(e) = sweeper.watch().await {
            error!("Wizard sweeper died: {}", e);
        }
    });

    background_tasks.close();

    let app_state = AppState {
        coordinator,
        store,
        signals: signal_tx,
    };

    Ok((app_state, background_tasks, cancellation_token))
}

async fn build_server(
    listener: SocketAddr,
    app_state: AppState,
    origins: Vec<String>,
) -> Result<Serve<TcpListener, IntoMakeService<Router>, Router>, anyhow::Error> {
    let allowed = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    let cors = CorsLayer::new().allow_origin(AllowOrigin::list(allowed));

    let app = Router::new()
        .route("/health", get(health))
        .layer(cors)
        .with_state(app_state);

    let listener = TcpListener::bind(listener).await?;
    info!("Listening on {}", listener.local_addr()?);

    Ok(axum::serve(listener, app.into_make_service()))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "healthy" }))),
        Err(e) => {
            error!("health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "db": e.to_string() })),
            )
        }
    }
}

async fn shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

    select! {
        _ = sigint.recv() => info!("Received SIGINT signal"),
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
    }
}
