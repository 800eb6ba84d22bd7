//! Open state - sign-ups are being collected, no roster exists.

use super::{Cancelled, HasWarData, Locked, WarStatus};
use crate::domain::wars::{CreateWar, Roster, War, WarId};
use time::OffsetDateTime;

/// Initial state: the sign-up pool fills while the war sits here. A war also
/// returns to this state when reconciliation runs out of backups.
#[derive(Debug, Clone)]
pub struct Open {
    pub war_id: WarId,
    pub(crate) war: War,
}

impl Open {
    /// Create a new war in the Open state.
    pub fn new(war_id: WarId, params: &CreateWar) -> Self {
        let war = War::new(war_id, params);
        Self { war_id, war }
    }

    pub(crate) fn from_war(war: War) -> Self {
        Self {
            war_id: war.id,
            war,
        }
    }

    /// Install a roster and lock. The caller has already validated the
    /// roster against the pool and team size; the transition itself is
    /// atomic - either a Locked state with this roster exists afterwards or
    /// the Open state is untouched.
    pub fn lock(mut self, roster: Roster) -> WarStatus {
        self.war.locked_at = Some(OffsetDateTime::now_utc());
        WarStatus::Locked(Locked::install(self.war, roster))
    }

    pub fn cancel(mut self, reason: String) -> WarStatus {
        self.war.cancelled_at = Some(OffsetDateTime::now_utc());
        WarStatus::Cancelled(Cancelled::from_war(self.war, reason, "open"))
    }
}

impl HasWarData for Open {
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
