//! Outbound notification interfaces. Delivery is fire-and-forget from the
//! core's perspective: the coordinator records that a notification was
//! requested and moves on, it never waits on or rolls back for delivery.

use crate::domain::{ParticipantId, WarSnapshot};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("problem reaching the chat transport: {0}")]
    Transport(String),
    #[error("recipient unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NotificationKind {
    StarterConfirmed,
    BackupConfirmed,
    RosterReopened,
    RecruitmentEscalation { missing_starters: usize },
    ResultPosted { our_maps: u8, opp_maps: u8 },
}

/// Direct messages to one or many participants.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        audience: &[ParticipantId],
        kind: NotificationKind,
        war: &WarSnapshot,
    ) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    /// The pool just reached team size while the war is still open.
    PoolFilled { count: usize },
}

/// The sign-up surface owned by the presentation collaborator. `refresh` is
/// the re-render hook fired after every pool or roster mutation.
#[async_trait]
pub trait SignupBoard: Send + Sync {
    async fn refresh(&self, war: &WarSnapshot) -> Result<(), NotifyError>;

    async fn announce(&self, war: &WarSnapshot, event: BoardEvent) -> Result<(), NotifyError>;
}

/// Stand-in used when no chat transport is wired up: notifications land in
/// the log instead of a channel.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        audience: &[ParticipantId],
        kind: NotificationKind,
        war: &WarSnapshot,
    ) -> Result<(), NotifyError> {
        info!(
            "war {} notification {:?} for {} recipient(s)",
            war.id,
            kind,
            audience.len()
        );
        Ok(())
    }
}

pub struct LogBoard;

#[async_trait]
impl SignupBoard for LogBoard {
    async fn refresh(&self, war: &WarSnapshot) -> Result<(), NotifyError> {
        info!(
            "war {} board refresh ({}, pool {})",
            war.id,
            war.state,
            war.pool.len()
        );
        Ok(())
    }

    async fn announce(&self, war: &WarSnapshot, event: BoardEvent) -> Result<(), NotifyError> {
        info!("war {} board announce {:?}", war.id, event);
        Ok(())
    }
}
