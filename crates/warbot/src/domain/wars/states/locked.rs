//! Locked state - a roster is installed and committed.

use super::{Cancelled, HasWarData, InProgress, Open, WarStatus};
use crate::domain::wars::{Roster, War, WarId};
use time::OffsetDateTime;

/// A roster has been installed. Pool mutations no longer touch the starters
/// directly; a starter withdrawing goes through reconciliation instead.
#[derive(Debug, Clone)]
pub struct Locked {
    pub war_id: WarId,
    pub locked_at: OffsetDateTime,
    pub(crate) war: War,
    pub roster: Roster,
}

impl Locked {
    pub(crate) fn install(war: War, roster: Roster) -> Self {
        let locked_at = war.locked_at.unwrap_or_else(OffsetDateTime::now_utc);
        Self {
            war_id: war.id,
            locked_at,
            war,
            roster,
        }
    }

    /// Self-transition: swap in an adjusted roster after a backup promotion.
    /// The state name does not change but this counts as a fresh lock for
    /// notification purposes, so the lock timestamp moves.
    pub fn relock(mut self, roster: Roster) -> WarStatus {
        self.war.locked_at = Some(OffsetDateTime::now_utc());
        WarStatus::Locked(Locked::install(self.war, roster))
    }

    /// Reconciliation ran out of backups: drop the roster and return to
    /// collecting sign-ups.
    pub fn reopen(mut self) -> WarStatus {
        self.war.locked_at = None;
        WarStatus::Open(Open::from_war(self.war))
    }

    /// First map score recorded: play has begun.
    pub fn begin(mut self) -> WarStatus {
        self.war.started_at = Some(OffsetDateTime::now_utc());
        WarStatus::InProgress(InProgress::from_parts(self.war, self.roster))
    }

    pub fn cancel(mut self, reason: String) -> WarStatus {
        self.war.cancelled_at = Some(OffsetDateTime::now_utc());
        WarStatus::Cancelled(Cancelled::from_war(self.war, reason, "locked"))
    }
}

impl HasWarData for Locked {
    fn war(&self) -> &War {
        &self.war
    }

    fn war_mut(&mut self) -> &mut War {
        &mut self.war
    }

    fn into_war(self) -> War {
        self.war
    }
}
