//! Append-only audit ledger. Rows mirror the spreadsheet tabs the club
//! keeps (wars, maps, vod, subs, noshow); the HTTP client posts them to a
//! configured webhook and retries transient failures on its own - the core
//! never re-runs a state transition because a ledger append failed.

use crate::domain::{Substitution, WarId};
use async_trait::async_trait;
use reqwest_middleware::{
    reqwest::{Client, StatusCode, Url},
    ClientBuilder, ClientWithMiddleware,
};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("problem sending row to ledger: {0}")]
    Send(#[from] reqwest_middleware::reqwest::Error),
    #[error("problem sending row to ledger: {0}")]
    SendRetry(#[from] reqwest_middleware::Error),
    #[error("ledger rejected row: {0}")]
    Rejected(String),
    #[error("invalid ledger url: {0}")]
    BadUrl(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarLockRow {
    pub war_id: WarId,
    pub opponent: String,
    pub format: String,
    pub start_display: String,
    pub locked_at: String,
    pub team_size: u8,
    pub starters: String,
    pub backups: String,
    pub planned_maps: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapRow {
    pub war_id: WarId,
    pub map_order: u32,
    pub map_name: String,
    pub our_score: Option<u8>,
    pub opp_score: Option<u8>,
    pub side: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstitutionRow {
    pub war_id: WarId,
    pub participant_in: String,
    pub participant_out: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoShowRow {
    pub war_id: WarId,
    pub participant_id: String,
    pub display_name: String,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn war_locked(&self, row: WarLockRow) -> Result<(), LedgerError>;
    async fn map_recorded(&self, row: MapRow) -> Result<(), LedgerError>;
    async fn vod_set(&self, war_id: WarId, vod_url: String) -> Result<(), LedgerError>;
    async fn substitution(&self, row: SubstitutionRow) -> Result<(), LedgerError>;
    async fn no_show(&self, row: NoShowRow) -> Result<(), LedgerError>;
}

impl From<(&WarId, &Substitution)> for SubstitutionRow {
    fn from((war_id, sub): (&WarId, &Substitution)) -> Self {
        Self {
            war_id: *war_id,
            participant_in: sub.participant_in.clone(),
            participant_out: sub.participant_out.clone(),
            note: sub.note.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AppendRow<'a, T: Serialize> {
    tab: &'a str,
    row: &'a T,
}

/// HTTP ledger: appends each row to a webhook endpoint. Retries are handled
/// by the middleware with exponential backoff.
#[derive(Clone)]
pub struct LedgerClient {
    base_url: Url,
    client: ClientWithMiddleware,
}

impl LedgerClient {
    pub fn new(base_url: &str) -> Result<Self, LedgerError> {
        let base_url =
            Url::parse(base_url).map_err(|e| LedgerError::BadUrl(format!("{}: {}", base_url, e)))?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self { base_url, client })
    }

    async fn append<T: Serialize + Sync>(&self, tab: &str, row: &T) -> Result<(), LedgerError> {
        let response = self
            .client
            .post(self.base_url.clone())
            .json(&AppendRow { tab, row })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::TOO_MANY_REQUESTS => Err(LedgerError::Rejected(
                "rate limited after retries".to_string(),
            )),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(LedgerError::Rejected(format!("{}: {}", status, body)))
            }
        }
    }
}

#[async_trait]
impl Ledger for LedgerClient {
    async fn war_locked(&self, row: WarLockRow) -> Result<(), LedgerError> {
        self.append("wars", &row).await
    }

    async fn map_recorded(&self, row: MapRow) -> Result<(), LedgerError> {
        self.append("maps", &row).await
    }

    async fn vod_set(&self, war_id: WarId, vod_url: String) -> Result<(), LedgerError> {
        #[derive(Serialize)]
        struct VodRow {
            war_id: WarId,
            vod_url: String,
        }
        self.append("vod", &VodRow { war_id, vod_url }).await
    }

    async fn substitution(&self, row: SubstitutionRow) -> Result<(), LedgerError> {
        self.append("subs", &row).await
    }

    async fn no_show(&self, row: NoShowRow) -> Result<(), LedgerError> {
        self.append("noshow", &row).await
    }
}
