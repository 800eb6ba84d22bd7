//! Recording doubles for the notifier and board traits, used by the
//! coordinator tests and the e2e harness.

use super::notifier::{BoardEvent, NotificationKind, Notifier, NotifyError, SignupBoard};
use crate::domain::{ParticipantId, WarId, WarSnapshot};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub war_id: WarId,
    pub audience: Vec<ParticipantId>,
    pub kind: NotificationKind,
}

#[derive(Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    fail_next: Arc<Mutex<bool>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of_kind(&self, kind: &NotificationKind) -> Vec<SentNotification> {
        self.sent()
            .into_iter()
            .filter(|n| &n.kind == kind)
            .collect()
    }

    /// Make the next delivery fail, to exercise the best-effort path.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(
        &self,
        audience: &[ParticipantId],
        kind: NotificationKind,
        war: &WarSnapshot,
    ) -> Result<(), NotifyError> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(NotifyError::Unreachable("mock failure".into()));
        }
        self.sent.lock().unwrap().push(SentNotification {
            war_id: war.id,
            audience: audience.to_vec(),
            kind,
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct MockBoard {
    refreshes: Arc<Mutex<Vec<WarSnapshot>>>,
    announcements: Arc<Mutex<Vec<(WarId, BoardEvent)>>>,
}

impl MockBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.lock().unwrap().len()
    }

    pub fn last_refresh(&self) -> Option<WarSnapshot> {
        self.refreshes.lock().unwrap().last().cloned()
    }

    pub fn announcements(&self) -> Vec<(WarId, BoardEvent)> {
        self.announcements.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignupBoard for MockBoard {
    async fn refresh(&self, war: &WarSnapshot) -> Result<(), NotifyError> {
        self.refreshes.lock().unwrap().push(war.clone());
        Ok(())
    }

    async fn announce(&self, war: &WarSnapshot, event: BoardEvent) -> Result<(), NotifyError> {
        self.announcements.lock().unwrap().push((war.id, event));
        Ok(())
    }
}
