use super::{
    map_pool,
    states::{HasWarData, Open, WarStatus},
    CreateWar, MapResult, MapScore, ParticipantId, PlayerStats, Roster, RosterMember, SignalKind,
    SignupPool, Substitution, War, WarId, WarSnapshot, WarStore, WarSummary,
};
use crate::{
    domain::{Error, WizardField, WizardSession, WizardSessions},
    infra::{
        identity::{Authorizer, IdentityResolver},
        ledger::{Ledger, MapRow, NoShowRow, SubstitutionRow, WarLockRow},
        notifier::{BoardEvent, NotificationKind, Notifier, SignupBoard},
    },
};
use itertools::Itertools;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// An inbound availability event from the signal source. The transport has
/// already resolved the participant; the core never parses its payloads.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub war_id: WarId,
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub kind: SignalEventKind,
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEventKind {
    Available,
    Unavailable,
    /// All signals withdrawn (e.g. the sign-up reaction was removed).
    Retract,
    /// A cancellation request for the whole war.
    CancelRequest,
}

/// One war's mutable state. The surrounding `Mutex` serializes transitions
/// per war: no two operations on the same war run concurrently, while
/// different wars proceed independently.
struct WarSession {
    status: Option<WarStatus>,
    pool: SignupPool,
}

impl WarSession {
    fn status_ref(&self) -> Result<&WarStatus, Error> {
        // None only if a prior operation lost the status mid-swap, which is
        // our bug, not the caller's.
        self.status
            .as_ref()
            .ok_or_else(|| Error::RosterInvariant("war session has no status".to_string()))
    }

    fn take_status(&mut self) -> Result<WarStatus, Error> {
        self.status
            .take()
            .ok_or_else(|| Error::RosterInvariant("war session has no status".to_string()))
    }
}

/// Owns every active war: the authoritative lifecycle state, the sign-up
/// pools, and the id allocator. All collaborator side effects (persistence,
/// ledger, notifications, board renders) run strictly after the in-memory
/// transition commits, and none of them can roll it back.
pub struct WarCoordinator {
    store: Arc<WarStore>,
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    board: Arc<dyn SignupBoard>,
    authorizer: Arc<dyn Authorizer>,
    resolver: Arc<dyn IdentityResolver>,
    wizards: Arc<WizardSessions>,
    wars: RwLock<HashMap<WarId, Arc<Mutex<WarSession>>>>,
    next_war_id: AtomicI64,
}

impl WarCoordinator {
    pub async fn new(
        store: Arc<WarStore>,
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        board: Arc<dyn SignupBoard>,
        authorizer: Arc<dyn Authorizer>,
        resolver: Arc<dyn IdentityResolver>,
        wizards: Arc<WizardSessions>,
    ) -> Result<Self, Error> {
        let seed = store.next_war_id().await?;
        info!("war id allocator seeded at {}", seed);

        Ok(Self {
            store,
            ledger,
            notifier,
            board,
            authorizer,
            resolver,
            wizards,
            wars: RwLock::new(HashMap::new()),
            next_war_id: AtomicI64::new(seed),
        })
    }

    pub fn wizards(&self) -> Arc<WizardSessions> {
        self.wizards.clone()
    }

    async fn ensure_manager(&self, actor: &str) -> Result<(), Error> {
        if self.authorizer.can_manage(actor).await {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    async fn session(&self, war_id: WarId) -> Result<Arc<Mutex<WarSession>>, Error> {
        self.wars
            .read()
            .await
            .get(&war_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("war #{}", war_id)))
    }

    /// The right error for an operation that is illegal in this state.
    fn state_error(status: &WarStatus) -> Error {
        if status.is_terminal() {
            Error::TerminalState(status.state_name().to_string())
        } else {
            Error::InvalidState(status.state_name().to_string())
        }
    }

    fn snapshot_of(status: &WarStatus, pool: &SignupPool) -> WarSnapshot {
        let war = status.war();
        let (starters, backups) = match status.roster() {
            Some(roster) => (roster.starters.clone(), roster.backups.clone()),
            None => (Vec::new(), Vec::new()),
        };
        WarSnapshot {
            id: war.id,
            message_id: war.message_id.clone(),
            opponent: war.opponent.clone(),
            format: war.format,
            team_size: war.team_size,
            start_display: war.start_display.clone(),
            timezone: war.timezone.clone(),
            state: status.state_name().to_string(),
            planned_maps: war.planned_maps.clone(),
            scores: war.scores.clone(),
            starters,
            backups,
            pool: pool.snapshot(),
        }
    }

    fn snapshot_session(session: &WarSession) -> Result<WarSnapshot, Error> {
        Ok(Self::snapshot_of(session.status_ref()?, &session.pool))
    }

    /// Fire-and-forget notification request. The request itself is recorded
    /// (id in the log); delivery is the sink's problem.
    async fn request_notification(
        &self,
        audience: &[ParticipantId],
        kind: NotificationKind,
        snapshot: &WarSnapshot,
    ) {
        let request_id = Uuid::now_v7();
        debug!(
            "notification {} requested for war {}: {:?} -> {} recipient(s)",
            request_id,
            snapshot.id,
            kind,
            audience.len()
        );
        if let Err(e) = self.notifier.notify(audience, kind, snapshot).await {
            warn!("notification {} not delivered: {}", request_id, e);
        }
    }

    async fn refresh_board(&self, snapshot: &WarSnapshot) {
        if let Err(e) = self.board.refresh(snapshot).await {
            warn!("board refresh failed for war {}: {}", snapshot.id, e);
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a new war in the Open state with an empty pool. The creation
    /// fact is persisted before the war becomes visible, so the id seed
    /// survives restarts.
    pub async fn create_war(&self, actor: &str, params: CreateWar) -> Result<WarSnapshot, Error> {
        self.ensure_manager(actor).await?;

        if !super::ALLOWED_TEAM_SIZES.contains(&params.team_size) {
            return Err(Error::InvalidFieldValue(format!(
                "team size must be 6, 7 or 8, got {}",
                params.team_size
            )));
        }

        let war_id = self.next_war_id.fetch_add(1, Ordering::SeqCst);
        let status = WarStatus::Open(Open::new(war_id, &params));
        self.store.war_created(status.war()).await?;

        let pool = SignupPool::new();
        let snapshot = Self::snapshot_of(&status, &pool);
        let session = WarSession {
            status: Some(status),
            pool,
        };
        self.wars
            .write()
            .await
            .insert(war_id, Arc::new(Mutex::new(session)));

        info!(
            "war {} created vs {} ({} {}v{}, {})",
            war_id,
            snapshot.opponent,
            snapshot.format,
            snapshot.team_size,
            snapshot.team_size,
            snapshot.start_display
        );
        self.refresh_board(&snapshot).await;
        Ok(snapshot)
    }

    /// Remember which transport surface shows this war. Kept as an
    /// attribute; the surface id never keys core state.
    pub async fn attach_message(&self, war_id: WarId, message_id: &str) -> Result<(), Error> {
        let handle = self.session(war_id).await?;
        let mut session = handle.lock().await;
        if let Some(status) = session.status.as_mut() {
            status.war_mut().message_id = Some(message_id.to_string());
        }
        if let Err(e) = self.store.message_attached(war_id, message_id).await {
            warn!("could not persist message id for war {}: {}", war_id, e);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Apply one availability event. Events for the same war are serialized
    /// by the session lock; a retraction arriving mid-reconciliation for
    /// another participant queues behind it.
    pub async fn handle_signal(&self, event: SignalEvent) -> Result<(), Error> {
        let handle = self.session(event.war_id).await?;
        let mut session = handle.lock().await;

        if session.status_ref()?.is_terminal() {
            // Late reactions on a finished war are routine noise.
            debug!(
                "ignoring {:?} for {} war {}",
                event.kind,
                session.status_ref()?.state_name(),
                event.war_id
            );
            return Ok(());
        }

        match event.kind {
            SignalEventKind::Available => {
                let team_size = session.status_ref()?.war().team_size as usize;
                let was_filled = session.pool.available_count() >= team_size;
                session.pool.signal(
                    &event.participant_id,
                    &event.display_name,
                    SignalKind::Available,
                    event.at,
                );

                let filled_now = session.pool.available_count() >= team_size;
                let is_open = matches!(session.status_ref()?, WarStatus::Open(_));
                let snapshot = Self::snapshot_session(&session)?;
                self.refresh_board(&snapshot).await;
                if is_open && !was_filled && filled_now {
                    let count = session.pool.available_count();
                    if let Err(e) = self
                        .board
                        .announce(&snapshot, BoardEvent::PoolFilled { count })
                        .await
                    {
                        warn!("pool-filled announcement failed: {}", e);
                    }
                }
            }
            SignalEventKind::Unavailable => {
                session.pool.signal(
                    &event.participant_id,
                    &event.display_name,
                    SignalKind::Unavailable,
                    event.at,
                );
                self.reconcile(&mut session, &event.participant_id).await?;
                let snapshot = Self::snapshot_session(&session)?;
                self.refresh_board(&snapshot).await;
            }
            SignalEventKind::Retract => {
                // Idempotent: a duplicate retraction changes nothing.
                if !session.pool.retract(&event.participant_id) {
                    debug!(
                        "retract for {} on war {} was a no-op",
                        event.participant_id, event.war_id
                    );
                    return Ok(());
                }
                self.reconcile(&mut session, &event.participant_id).await?;
                let snapshot = Self::snapshot_session(&session)?;
                self.refresh_board(&snapshot).await;
            }
            SignalEventKind::CancelRequest => {
                drop(session);
                self.cancel(
                    &event.participant_id,
                    event.war_id,
                    "cancelled by staff".to_string(),
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Post-lock roster repair after a starter withdraws. Promotion consults
    /// the live pool, so participants who signed up after the lock are
    /// eligible replacements.
    async fn reconcile(&self, session: &mut WarSession, participant_id: &str) -> Result<(), Error> {
        let status = session.take_status()?;

        let locked = match status {
            WarStatus::Locked(locked) if locked.roster.is_starter(participant_id) => locked,
            other => {
                // Routine: an unselected participant changed their mind, or
                // the war is not locked. Nothing to repair.
                session.status = Some(other);
                return Ok(());
            }
        };

        let war_id = locked.war_id;
        let team_size = locked.war().team_size;
        let mut roster = locked.roster.clone();
        if let Some(withdrawn) = roster.remove_starter(participant_id) {
            debug!(
                "starter {} withdrew from locked war {}",
                withdrawn.display_name, war_id
            );
        }

        let replacement = session
            .pool
            .available()
            .into_iter()
            .find(|e| !roster.is_starter(&e.participant_id));

        match replacement {
            Some(entry) => {
                let promoted = RosterMember::from(&entry);
                roster.starters.push(promoted.clone());
                roster.backups = session
                    .pool
                    .available()
                    .iter()
                    .filter(|e| !roster.is_starter(&e.participant_id))
                    .map(RosterMember::from)
                    .collect();

                if let Err(e) = roster.validate(team_size) {
                    error!(
                        "reconciliation produced a bad roster for war {}: {}",
                        war_id, e
                    );
                    session.status = Some(WarStatus::Locked(locked));
                    return Err(e);
                }

                session.status = Some(locked.relock(roster.clone()));
                info!(
                    "war {} re-locked: {} promoted to starter",
                    war_id, promoted.display_name
                );

                let war = session.status_ref()?.war().clone();
                let snapshot = Self::snapshot_session(session)?;
                self.persist_lock(&war, &roster).await;
                self.request_notification(
                    &[promoted.participant_id],
                    NotificationKind::StarterConfirmed,
                    &snapshot,
                )
                .await;
            }
            None => {
                let missing = team_size as usize - roster.starters.len();
                let former = roster.starter_ids();
                session.status = Some(locked.reopen());
                warn!(
                    "war {} re-opened: no backup available, {} starter slot(s) empty",
                    war_id, missing
                );

                if let Err(e) = self.store.roster_cleared(war_id).await {
                    warn!("could not persist roster clear for war {}: {}", war_id, e);
                }

                let snapshot = Self::snapshot_session(session)?;
                self.request_notification(&former, NotificationKind::RosterReopened, &snapshot)
                    .await;
                // Empty audience: the sink broadcasts to the channel.
                self.request_notification(
                    &[],
                    NotificationKind::RecruitmentEscalation {
                        missing_starters: missing,
                    },
                    &snapshot,
                )
                .await;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Roster selection
    // ------------------------------------------------------------------

    /// Earliest-first roster selection and lock.
    pub async fn auto_select(&self, actor: &str, war_id: WarId) -> Result<WarSnapshot, Error> {
        self.ensure_manager(actor).await?;
        let handle = self.session(war_id).await?;
        let mut session = handle.lock().await;

        let status = session.take_status()?;
        let open = match status {
            WarStatus::Open(open) => open,
            other => {
                let err = Self::state_error(&other);
                session.status = Some(other);
                return Err(err);
            }
        };

        let team_size = open.war().team_size;
        let roster = match Roster::auto(&session.pool, team_size) {
            Ok(roster) => roster,
            Err(e) => {
                session.status = Some(WarStatus::Open(open));
                return Err(e);
            }
        };

        self.install_roster(&mut session, open, roster).await
    }

    /// Explicit roster selection and lock. Tokens may be transport mentions,
    /// raw ids, or display names as captured in the pool.
    pub async fn manual_select(
        &self,
        actor: &str,
        war_id: WarId,
        starter_tokens: &[String],
    ) -> Result<WarSnapshot, Error> {
        self.ensure_manager(actor).await?;
        let handle = self.session(war_id).await?;
        let mut session = handle.lock().await;

        let mut starter_ids = Vec::with_capacity(starter_tokens.len());
        for token in starter_tokens {
            starter_ids.push(self.resolve_token(token, &session.pool).await?);
        }

        let status = session.take_status()?;
        let open = match status {
            WarStatus::Open(open) => open,
            other => {
                let err = Self::state_error(&other);
                session.status = Some(other);
                return Err(err);
            }
        };

        let team_size = open.war().team_size;
        let roster = match Roster::manual(&session.pool, team_size, &starter_ids) {
            Ok(roster) => roster,
            Err(e) => {
                session.status = Some(WarStatus::Open(open));
                return Err(e);
            }
        };

        self.install_roster(&mut session, open, roster).await
    }

    /// Resolve one starter token: transport-native forms first, then a
    /// display-name match against the pool snapshot.
    async fn resolve_token(&self, token: &str, pool: &SignupPool) -> Result<ParticipantId, Error> {
        match self.resolver.resolve(token).await {
            Ok(id) => Ok(id),
            Err(Error::UnresolvedParticipant(_)) => {
                let wanted = token.trim().to_lowercase();
                pool.snapshot()
                    .iter()
                    .find(|e| e.display_name.to_lowercase() == wanted)
                    .map(|e| e.participant_id.clone())
                    .ok_or_else(|| Error::UnresolvedParticipant(token.trim().to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Install a validated roster: commit the lock transition, then run the
    /// persistence/ledger/notification side effects in that order.
    async fn install_roster(
        &self,
        session: &mut WarSession,
        open: Open,
        roster: Roster,
    ) -> Result<WarSnapshot, Error> {
        let team_size = open.war().team_size;
        if let Err(e) = roster.validate(team_size) {
            error!("selection produced a bad roster: {}", e);
            session.status = Some(WarStatus::Open(open));
            return Err(e);
        }

        session.status = Some(open.lock(roster.clone()));

        let war = session.status_ref()?.war().clone();
        let snapshot = Self::snapshot_session(session)?;
        info!("war {} locked: {}", snapshot.id, roster.describe());

        self.persist_lock(&war, &roster).await;
        self.request_notification(
            &roster.starter_ids(),
            NotificationKind::StarterConfirmed,
            &snapshot,
        )
        .await;
        if !roster.backups.is_empty() {
            self.request_notification(
                &roster.backup_ids(),
                NotificationKind::BackupConfirmed,
                &snapshot,
            )
            .await;
        }
        self.refresh_board(&snapshot).await;

        Ok(snapshot)
    }

    /// Best-effort lock bookkeeping: the relational snapshot and the ledger
    /// row. Failures are logged and never unwind the lock.
    async fn persist_lock(&self, war: &War, roster: &Roster) {
        let locked_at = war
            .locked_at
            .and_then(|at| at.format(&Rfc3339).ok())
            .unwrap_or_default();
        let row = WarLockRow {
            war_id: war.id,
            opponent: war.opponent.clone(),
            format: war.format.to_string(),
            start_display: war.start_display.clone(),
            locked_at,
            team_size: war.team_size,
            starters: roster
                .starters
                .iter()
                .map(|m| format!("{} ({})", m.display_name, m.participant_id))
                .join(", "),
            backups: roster
                .backups
                .iter()
                .map(|m| format!("{} ({})", m.display_name, m.participant_id))
                .join(", "),
            planned_maps: war.planned_maps.join(" | "),
        };

        let (stored, ledgered) = futures::join!(
            self.store.roster_locked(war, roster),
            self.ledger.war_locked(row)
        );
        if let Err(e) = stored {
            warn!("could not persist lock for war {}: {}", war.id, e);
        }
        if let Err(e) = ledgered {
            warn!("could not ledger lock for war {}: {}", war.id, e);
        }
    }

    // ------------------------------------------------------------------
    // Maps and results
    // ------------------------------------------------------------------

    /// Plan the map list for a locked war: exact count for the format, last
    /// map from the decider subset.
    pub async fn plan_maps(
        &self,
        actor: &str,
        war_id: WarId,
        names: Vec<String>,
    ) -> Result<WarSnapshot, Error> {
        self.ensure_manager(actor).await?;
        let handle = self.session(war_id).await?;
        let mut session = handle.lock().await;

        let mut status = session.take_status()?;
        let outcome = match &mut status {
            WarStatus::Locked(locked) => {
                map_pool::validate_plan(locked.war().format, &names).map(|()| {
                    locked.war_mut().planned_maps = names.clone();
                })
            }
            other => Err(Self::state_error(other)),
        };
        session.status = Some(status);
        outcome?;

        let snapshot = Self::snapshot_session(&session)?;

        if let Err(e) = self.store.maps_planned(war_id, &names).await {
            warn!("could not persist map plan for war {}: {}", war_id, e);
        }
        for (i, name) in names.iter().enumerate() {
            let row = MapRow {
                war_id,
                map_order: (i + 1) as u32,
                map_name: name.clone(),
                our_score: None,
                opp_score: None,
                side: None,
            };
            if let Err(e) = self.ledger.map_recorded(row).await {
                warn!("could not ledger planned map for war {}: {}", war_id, e);
            }
        }
        self.refresh_board(&snapshot).await;
        Ok(snapshot)
    }

    /// Record one map result. The first score moves a locked war into play.
    pub async fn record_map_result(
        &self,
        actor: &str,
        war_id: WarId,
        result: MapResult,
    ) -> Result<WarSnapshot, Error> {
        self.ensure_manager(actor).await?;
        result.validate()?;
        let handle = self.session(war_id).await?;
        let mut session = handle.lock().await;

        let status = session.take_status()?;
        let mut status = match status {
            WarStatus::Locked(locked) => locked.begin(),
            playing @ WarStatus::InProgress(_) => playing,
            other => {
                let err = Self::state_error(&other);
                session.status = Some(other);
                return Err(err);
            }
        };

        let order = next_map_order(status.war(), &result.map_name);
        status.war_mut().scores.push(MapScore {
            map_order: order,
            map_name: result.map_name.clone(),
            our_score: result.our_score,
            opp_score: result.opp_score,
        });
        session.status = Some(status);

        let snapshot = Self::snapshot_session(&session)?;
        info!(
            "war {} map {} recorded: {} {}-{}",
            war_id, order, result.map_name, result.our_score, result.opp_score
        );

        if let Err(e) = self
            .store
            .map_scored(war_id, &result.map_name, result.our_score, result.opp_score)
            .await
        {
            warn!("could not persist map score for war {}: {}", war_id, e);
        }
        let row = MapRow {
            war_id,
            map_order: order,
            map_name: result.map_name.clone(),
            our_score: Some(result.our_score),
            opp_score: Some(result.opp_score),
            side: Some(result.side.to_string()),
        };
        if let Err(e) = self.ledger.map_recorded(row).await {
            warn!("could not ledger map score for war {}: {}", war_id, e);
        }
        self.refresh_board(&snapshot).await;
        Ok(snapshot)
    }

    /// Finalize results: VOD, notes and substitutions, then conclude.
    pub async fn finalize(
        &self,
        actor: &str,
        war_id: WarId,
        summary: WarSummary,
    ) -> Result<WarSnapshot, Error> {
        self.ensure_manager(actor).await?;

        // Validate everything up front; nothing transitions on bad input.
        let subs = summary
            .substitutions
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Substitution::parse(line))
            .collect::<Result<Vec<_>, _>>()?;

        let handle = self.session(war_id).await?;
        let mut session = handle.lock().await;

        let status = session.take_status()?;
        let mut playing = match status {
            WarStatus::InProgress(playing) => playing,
            other => {
                let err = Self::state_error(&other);
                session.status = Some(other);
                return Err(err);
            }
        };

        playing.war_mut().vod_url = summary.vod_url.clone();
        playing.war_mut().notes = summary.notes.clone();
        session.status = Some(playing.conclude());

        let war = session.status_ref()?.war().clone();
        let concluded_at = war.concluded_at.unwrap_or_else(OffsetDateTime::now_utc);
        let (our_maps, opp_maps) = war.series_score();
        let snapshot = Self::snapshot_session(&session)?;
        info!(
            "war {} concluded {}-{} vs {}",
            war_id, our_maps, opp_maps, snapshot.opponent
        );

        if let Err(e) = self
            .store
            .war_concluded(
                war_id,
                concluded_at,
                summary.vod_url.as_deref(),
                summary.notes.as_deref(),
            )
            .await
        {
            warn!("could not persist conclusion for war {}: {}", war_id, e);
        }
        if let Some(vod) = &summary.vod_url {
            if let Err(e) = self.ledger.vod_set(war_id, vod.clone()).await {
                warn!("could not ledger vod for war {}: {}", war_id, e);
            }
        }
        for sub in &subs {
            if let Err(e) = self
                .store
                .substitution_logged(war_id, sub, concluded_at)
                .await
            {
                warn!("could not persist substitution for war {}: {}", war_id, e);
            }
            if let Err(e) = self
                .ledger
                .substitution(SubstitutionRow::from((&war_id, sub)))
                .await
            {
                warn!("could not ledger substitution for war {}: {}", war_id, e);
            }
        }

        let audience: Vec<ParticipantId> = snapshot
            .starters
            .iter()
            .chain(snapshot.backups.iter())
            .map(|m| m.participant_id.clone())
            .collect();
        self.request_notification(
            &audience,
            NotificationKind::ResultPosted { our_maps, opp_maps },
            &snapshot,
        )
        .await;
        self.refresh_board(&snapshot).await;
        Ok(snapshot)
    }

    /// Record a no-show against a locked or in-progress war.
    pub async fn record_no_show(
        &self,
        actor: &str,
        war_id: WarId,
        participant_id: &str,
        display_name: &str,
    ) -> Result<(), Error> {
        self.ensure_manager(actor).await?;
        let handle = self.session(war_id).await?;
        let session = handle.lock().await;

        let status = session.status_ref()?;
        if !matches!(status, WarStatus::Locked(_) | WarStatus::InProgress(_)) {
            return Err(Self::state_error(status));
        }

        let at = OffsetDateTime::now_utc();
        let (stored, ledgered) = futures::join!(
            self.store
                .no_show_logged(war_id, participant_id, display_name, at),
            self.ledger.no_show(NoShowRow {
                war_id,
                participant_id: participant_id.to_string(),
                display_name: display_name.to_string(),
            })
        );
        if let Err(e) = stored {
            warn!("could not persist no-show for war {}: {}", war_id, e);
        }
        if let Err(e) = ledgered {
            warn!("could not ledger no-show for war {}: {}", war_id, e);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Cancel an open or locked war: the pool and roster are cleared and the
    /// war stops accepting transitions. The stored record stays for audit.
    pub async fn cancel(
        &self,
        actor: &str,
        war_id: WarId,
        reason: String,
    ) -> Result<WarSnapshot, Error> {
        self.ensure_manager(actor).await?;
        let handle = self.session(war_id).await?;
        let mut session = handle.lock().await;

        let status = session.take_status()?;
        let next = match status {
            WarStatus::Open(open) => open.cancel(reason),
            WarStatus::Locked(locked) => locked.cancel(reason),
            other => {
                let err = Self::state_error(&other);
                session.status = Some(other);
                return Err(err);
            }
        };
        session.pool.clear();
        let cancelled_at = next
            .war()
            .cancelled_at
            .unwrap_or_else(OffsetDateTime::now_utc);
        session.status = Some(next);

        let snapshot = Self::snapshot_session(&session)?;
        info!("war {} cancelled", war_id);

        if let Err(e) = self.store.war_cancelled(war_id, cancelled_at).await {
            warn!("could not persist cancellation for war {}: {}", war_id, e);
        }
        self.refresh_board(&snapshot).await;
        Ok(snapshot)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn snapshot(&self, war_id: WarId) -> Result<WarSnapshot, Error> {
        let handle = self.session(war_id).await?;
        let session = handle.lock().await;
        Self::snapshot_session(&session)
    }

    pub async fn player_stats(&self, participant_id: &str) -> Result<PlayerStats, Error> {
        let rows = self.store.player_war_rows(participant_id).await?;
        Ok(PlayerStats::from_rows(&rows))
    }

    // ------------------------------------------------------------------
    // Wizard
    // ------------------------------------------------------------------

    pub async fn start_wizard(&self, actor: &str) -> Result<WizardSession, Error> {
        self.ensure_manager(actor).await?;
        Ok(self.wizards.start(actor))
    }

    pub fn set_wizard_field(
        &self,
        actor: &str,
        field: WizardField,
        value: &str,
    ) -> Result<WizardSession, Error> {
        self.wizards.set_field(actor, field, value)
    }

    /// Complete the wizard and open the war it described in one step.
    pub async fn complete_wizard(&self, actor: &str) -> Result<WarSnapshot, Error> {
        self.ensure_manager(actor).await?;
        let params = self.wizards.complete(actor)?;
        self.create_war(actor, params).await
    }

    pub fn cancel_wizard(&self, actor: &str) {
        self.wizards.cancel(actor)
    }
}

/// Fill the earliest unscored planned slot matching this map, else append
/// after everything recorded or planned so far.
fn next_map_order(war: &War, map_name: &str) -> u32 {
    let scored: Vec<u32> = war.scores.iter().map(|s| s.map_order).collect();
    for (i, planned) in war.planned_maps.iter().enumerate() {
        let order = (i + 1) as u32;
        if planned == map_name && !scored.contains(&order) {
            return order;
        }
    }
    let high = scored
        .iter()
        .copied()
        .max()
        .unwrap_or(0)
        .max(war.planned_maps.len() as u32);
    high + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wars::{MapSide, WarFormat};
    use crate::infra::{
        db::DBConnection,
        identity::{MentionResolver, RoleAuthorizer},
        ledger_mock::MockLedger,
        notifier_mock::{MockBoard, MockNotifier},
    };
    use sqlx::SqlitePool;
    use time::Duration;

    const ADMIN: &str = "admin1";

    struct Harness {
        coordinator: WarCoordinator,
        notifier: Arc<MockNotifier>,
        board: Arc<MockBoard>,
        ledger: Arc<MockLedger>,
        store: Arc<WarStore>,
    }

    async fn harness(pool: SqlitePool) -> Harness {
        let db = DBConnection::new_with_pools(
            "test".to_string(),
            ":memory:".to_string(),
            pool.clone(),
            pool,
        );
        let store = Arc::new(WarStore::new(db));
        let notifier = Arc::new(MockNotifier::new());
        let board = Arc::new(MockBoard::new());
        let ledger = Arc::new(MockLedger::new());
        let wizards = Arc::new(WizardSessions::new("America/New_York".to_string(), 900));
        let coordinator = WarCoordinator::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            board.clone(),
            Arc::new(RoleAuthorizer::new(vec![ADMIN.to_string()])),
            Arc::new(MentionResolver::new()),
            wizards,
        )
        .await
        .unwrap();

        Harness {
            coordinator,
            notifier,
            board,
            ledger,
            store,
        }
    }

    fn params(team_size: u8) -> CreateWar {
        CreateWar {
            opponent: "RivalClan".into(),
            format: WarFormat::Bo3,
            team_size,
            start_display: "Sat Aug 9, 8:30 PM".into(),
            timezone: "America/New_York".into(),
        }
    }

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn available(war_id: WarId, pid: &str, secs: i64) -> SignalEvent {
        SignalEvent {
            war_id,
            participant_id: pid.to_string(),
            display_name: format!("Player {}", pid),
            kind: SignalEventKind::Available,
            at: at(secs),
        }
    }

    fn retract(war_id: WarId, pid: &str, secs: i64) -> SignalEvent {
        SignalEvent {
            war_id,
            participant_id: pid.to_string(),
            display_name: format!("Player {}", pid),
            kind: SignalEventKind::Retract,
            at: at(secs),
        }
    }

    async fn filled_war(h: &Harness, signups: usize) -> WarId {
        let snapshot = h.coordinator.create_war(ADMIN, params(6)).await.unwrap();
        for i in 1..=signups {
            h.coordinator
                .handle_signal(available(snapshot.id, &format!("p{}", i), i as i64))
                .await
                .unwrap();
        }
        snapshot.id
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn auto_select_locks_in_arrival_order(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 6).await;

        let snapshot = h.coordinator.auto_select(ADMIN, war_id).await.unwrap();
        assert_eq!(snapshot.state, "locked");
        let starter_ids: Vec<_> = snapshot
            .starters
            .iter()
            .map(|m| m.participant_id.as_str())
            .collect();
        assert_eq!(starter_ids, vec!["p1", "p2", "p3", "p4", "p5", "p6"]);
        assert!(snapshot.backups.is_empty());

        // starters notified, lock persisted and ledgered
        let confirmed = h
            .notifier
            .sent_of_kind(&NotificationKind::StarterConfirmed);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].audience.len(), 6);
        assert_eq!(h.ledger.locks().len(), 1);
        assert!(h.store.get_war(war_id).await.unwrap().locked_at.is_some());

        // a late signup lands in the pool without touching the roster
        h.coordinator
            .handle_signal(available(war_id, "p7", 99))
            .await
            .unwrap();
        let snapshot = h.coordinator.snapshot(war_id).await.unwrap();
        assert_eq!(snapshot.state, "locked");
        assert_eq!(snapshot.pool.len(), 7);
        assert_eq!(snapshot.starters.len(), 6);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn message_id_is_an_attribute_not_a_key(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 2).await;

        h.coordinator
            .attach_message(war_id, "msg-1001")
            .await
            .unwrap();
        let snapshot = h.coordinator.snapshot(war_id).await.unwrap();
        assert_eq!(snapshot.message_id.as_deref(), Some("msg-1001"));

        // the transport can re-post the surface without disturbing the war
        h.coordinator
            .attach_message(war_id, "msg-1002")
            .await
            .unwrap();
        let stored = h.store.get_war(war_id).await.unwrap();
        assert_eq!(stored.message_id.as_deref(), Some("msg-1002"));
        assert_eq!(h.coordinator.snapshot(war_id).await.unwrap().state, "open");
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn insufficient_pool_fails_without_a_transition(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 3).await;

        let err = h.coordinator.auto_select(ADMIN, war_id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientPool {
                available: 3,
                needed: 6
            }
        ));

        let snapshot = h.coordinator.snapshot(war_id).await.unwrap();
        assert_eq!(snapshot.state, "open");
        assert!(h.notifier.sent().is_empty());
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn manual_select_resolves_names_and_rejects_strangers(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 7).await;

        let unknown: Vec<String> = [
            "Player p1", "Player p2", "Player p3", "Player p4", "Player p5", "Stranger",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert!(matches!(
            h.coordinator
                .manual_select(ADMIN, war_id, &unknown)
                .await
                .unwrap_err(),
            Error::UnresolvedParticipant(_)
        ));
        assert_eq!(
            h.coordinator.snapshot(war_id).await.unwrap().state,
            "open"
        );

        // display names (as snapshotted in the pool) are fine
        let by_name: Vec<String> = [
            "Player p2", "Player p1", "Player p3", "Player p4", "Player p5", "Player p6",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let snapshot = h
            .coordinator
            .manual_select(ADMIN, war_id, &by_name)
            .await
            .unwrap();
        assert_eq!(snapshot.state, "locked");
        assert_eq!(snapshot.starters[0].participant_id, "p2");
        assert_eq!(snapshot.starters[1].participant_id, "p1");
        assert_eq!(snapshot.backups.len(), 1);
        assert_eq!(snapshot.backups[0].participant_id, "p7");
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn reconciliation_promotes_the_earliest_backup(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 8).await; // p7, p8 become backups
        h.coordinator.auto_select(ADMIN, war_id).await.unwrap();

        h.coordinator
            .handle_signal(retract(war_id, "p2", 100))
            .await
            .unwrap();

        let snapshot = h.coordinator.snapshot(war_id).await.unwrap();
        assert_eq!(snapshot.state, "locked");
        let starter_ids: Vec<_> = snapshot
            .starters
            .iter()
            .map(|m| m.participant_id.as_str())
            .collect();
        assert_eq!(starter_ids, vec!["p1", "p3", "p4", "p5", "p6", "p7"]);
        let backup_ids: Vec<_> = snapshot
            .backups
            .iter()
            .map(|m| m.participant_id.as_str())
            .collect();
        assert_eq!(backup_ids, vec!["p8"]);

        // the promoted backup was told they now start
        let confirmed = h
            .notifier
            .sent_of_kind(&NotificationKind::StarterConfirmed);
        assert_eq!(confirmed.last().unwrap().audience, vec!["p7".to_string()]);
        // and the re-lock produced a fresh ledger row
        assert_eq!(h.ledger.locks().len(), 2);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn reconciliation_exhaustion_reopens_and_escalates(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 6).await; // no backups
        h.coordinator.auto_select(ADMIN, war_id).await.unwrap();

        h.coordinator
            .handle_signal(retract(war_id, "p4", 100))
            .await
            .unwrap();

        let snapshot = h.coordinator.snapshot(war_id).await.unwrap();
        assert_eq!(snapshot.state, "open");
        assert!(snapshot.starters.is_empty());

        let escalations = h.notifier.sent_of_kind(&NotificationKind::RecruitmentEscalation {
            missing_starters: 1,
        });
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].war_id, war_id);
        assert_eq!(
            h.notifier
                .sent_of_kind(&NotificationKind::RosterReopened)
                .len(),
            1
        );

        // a second retraction for the same participant is a no-op
        let refreshes = h.board.refresh_count();
        h.coordinator
            .handle_signal(retract(war_id, "p4", 101))
            .await
            .unwrap();
        assert_eq!(h.board.refresh_count(), refreshes);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn unavailable_switch_also_triggers_reconciliation(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 7).await;
        h.coordinator.auto_select(ADMIN, war_id).await.unwrap();

        h.coordinator
            .handle_signal(SignalEvent {
                war_id,
                participant_id: "p1".into(),
                display_name: "Player p1".into(),
                kind: SignalEventKind::Unavailable,
                at: at(100),
            })
            .await
            .unwrap();

        let snapshot = h.coordinator.snapshot(war_id).await.unwrap();
        assert_eq!(snapshot.state, "locked");
        assert!(!snapshot.starters.iter().any(|m| m.participant_id == "p1"));
        assert!(snapshot.starters.iter().any(|m| m.participant_id == "p7"));
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn terminal_wars_refuse_everything(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 6).await;
        h.coordinator
            .cancel(ADMIN, war_id, "called off".into())
            .await
            .unwrap();

        assert!(matches!(
            h.coordinator.auto_select(ADMIN, war_id).await.unwrap_err(),
            Error::TerminalState(_)
        ));
        assert!(matches!(
            h.coordinator
                .cancel(ADMIN, war_id, "again".into())
                .await
                .unwrap_err(),
            Error::TerminalState(_)
        ));

        // the pool was cleared and late signals are ignored quietly
        let snapshot = h.coordinator.snapshot(war_id).await.unwrap();
        assert!(snapshot.pool.is_empty());
        h.coordinator
            .handle_signal(available(war_id, "p9", 200))
            .await
            .unwrap();
        assert!(h.coordinator.snapshot(war_id).await.unwrap().pool.is_empty());
        assert!(h.store.get_war(war_id).await.unwrap().cancelled_at.is_some());
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn unauthorized_actors_are_refused(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 6).await;

        assert!(matches!(
            h.coordinator.auto_select("rando", war_id).await.unwrap_err(),
            Error::Unauthorized
        ));
        assert!(matches!(
            h.coordinator.create_war("rando", params(6)).await.unwrap_err(),
            Error::Unauthorized
        ));
        assert!(matches!(
            h.coordinator.start_wizard("rando").await.unwrap_err(),
            Error::Unauthorized
        ));
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn pool_filling_up_is_announced_once(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 6).await;

        let filled: Vec<_> = h
            .board
            .announcements()
            .into_iter()
            .filter(|(id, e)| *id == war_id && matches!(e, BoardEvent::PoolFilled { .. }))
            .collect();
        assert_eq!(filled.len(), 1);

        // the seventh signup does not re-announce
        h.coordinator
            .handle_signal(available(war_id, "p7", 7))
            .await
            .unwrap();
        assert_eq!(h.board.announcements().len(), 1);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn full_match_lifecycle(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 6).await;
        h.coordinator.auto_select(ADMIN, war_id).await.unwrap();

        let plan: Vec<String> = [
            "Blizzard - Demolition",
            "Abandoned - Suppression",
            "Crossroads - Demolition",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        h.coordinator
            .plan_maps(ADMIN, war_id, plan)
            .await
            .unwrap();

        // bad plan is rejected outright
        assert!(matches!(
            h.coordinator
                .plan_maps(ADMIN, war_id, vec!["Sujo - Breach".to_string()])
                .await
                .unwrap_err(),
            Error::InvalidFieldValue(_)
        ));

        let snapshot = h
            .coordinator
            .record_map_result(
                ADMIN,
                war_id,
                MapResult {
                    map_name: "Blizzard - Demolition".into(),
                    our_score: 6,
                    opp_score: 2,
                    side: MapSide::Seals,
                },
            )
            .await
            .unwrap();
        assert_eq!(snapshot.state, "in_progress");
        assert_eq!(snapshot.scores[0].map_order, 1);

        h.coordinator
            .record_map_result(
                ADMIN,
                war_id,
                MapResult {
                    map_name: "Crossroads - Demolition".into(),
                    our_score: 6,
                    opp_score: 4,
                    side: MapSide::Terrorists,
                },
            )
            .await
            .unwrap();

        // cancel is no longer possible once play started
        assert!(matches!(
            h.coordinator
                .cancel(ADMIN, war_id, "too late".into())
                .await
                .unwrap_err(),
            Error::InvalidState(_)
        ));

        h.coordinator
            .record_no_show(ADMIN, war_id, "p6", "Player p6")
            .await
            .unwrap();

        let snapshot = h
            .coordinator
            .finalize(
                ADMIN,
                war_id,
                WarSummary {
                    vod_url: Some("https://vods.example/w1".into()),
                    notes: Some("close one".into()),
                    substitutions: vec!["Viper -> Ghost (map 2)".into()],
                },
            )
            .await
            .unwrap();
        assert_eq!(snapshot.state, "concluded");

        let posted = h.notifier.sent_of_kind(&NotificationKind::ResultPosted {
            our_maps: 2,
            opp_maps: 0,
        });
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].audience.len(), 6);

        assert_eq!(h.ledger.vods(), vec![(war_id, "https://vods.example/w1".to_string())]);
        assert_eq!(h.ledger.subs().len(), 1);
        assert_eq!(h.ledger.no_shows().len(), 1);
        // 3 planned rows + 2 scored rows
        assert_eq!(h.ledger.maps().len(), 5);

        let stored = h.store.get_war(war_id).await.unwrap();
        assert!(stored.concluded_at.is_some());
        assert_eq!(stored.vod_url.as_deref(), Some("https://vods.example/w1"));

        // stats see one war, two maps won
        let stats = h.coordinator.player_stats("p1").await.unwrap();
        assert_eq!(stats.wars, 1);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.maps_won, 2);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn wizard_flow_creates_the_war(pool: SqlitePool) {
        let h = harness(pool).await;

        let date = {
            use time::macros::format_description;
            (OffsetDateTime::now_utc().date() + Duration::days(2))
                .format(&format_description!("[year]-[month]-[day]"))
                .unwrap()
        };

        h.coordinator.start_wizard(ADMIN).await.unwrap();
        h.coordinator
            .set_wizard_field(ADMIN, WizardField::TeamSize, "8")
            .unwrap();
        h.coordinator
            .set_wizard_field(ADMIN, WizardField::Format, "BO3")
            .unwrap();
        h.coordinator
            .set_wizard_field(ADMIN, WizardField::Opponent, "RivalClan")
            .unwrap();
        h.coordinator
            .set_wizard_field(ADMIN, WizardField::Date, &date)
            .unwrap();
        h.coordinator
            .set_wizard_field(ADMIN, WizardField::Time, "20:30")
            .unwrap();

        let snapshot = h.coordinator.complete_wizard(ADMIN).await.unwrap();
        assert_eq!(snapshot.state, "open");
        assert_eq!(snapshot.team_size, 8);
        assert_eq!(snapshot.opponent, "RivalClan");

        // one-shot: completing again finds no session
        assert!(matches!(
            h.coordinator.complete_wizard(ADMIN).await.unwrap_err(),
            Error::NotFound(_)
        ));

        // ids keep climbing
        let second = h.coordinator.create_war(ADMIN, params(6)).await.unwrap();
        assert_eq!(second.id, snapshot.id + 1);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn notification_failure_never_unwinds_a_lock(pool: SqlitePool) {
        let h = harness(pool).await;
        let war_id = filled_war(&h, 6).await;

        h.notifier.fail_next();
        let snapshot = h.coordinator.auto_select(ADMIN, war_id).await.unwrap();
        assert_eq!(snapshot.state, "locked");
        assert!(h.store.get_war(war_id).await.unwrap().locked_at.is_some());
    }
}
