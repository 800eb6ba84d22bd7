//! InProgress state - at least one map score has been recorded.

use super::{Concluded, HasWarData, WarStatus};
use crate::domain::wars::{Roster, War, WarId};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct InProgress {
    pub war_id: WarId,
    pub started_at: OffsetDateTime,
    pub(crate) war: War,
    pub roster: Roster,
}

impl InProgress {
    pub(crate) fn from_parts(war: War, roster: Roster) -> Self {
        let started_at = war.started_at.unwrap_or_else(OffsetDateTime::now_utc);
        Self {
            war_id: war.id,
            started_at,
            war,
            roster,
        }
    }

    /// Result entry has been finalized by an authorized actor. VOD, notes
    /// and substitutions were already written onto the war by the caller.
    pub fn conclude(mut self) -> WarStatus {
        self.war.concluded_at = Some(OffsetDateTime::now_utc());
        WarStatus::Concluded(Concluded::from_parts(self.war, self.roster))
    }
}

impl HasWarData for InProgress {
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
