//! Concluded state - terminal, results recorded.

use super::HasWarData;
use crate::domain::wars::{Roster, War, WarId};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct Concluded {
    pub war_id: WarId,
    pub concluded_at: OffsetDateTime,
    pub(crate) war: War,
    pub roster: Roster,
}

impl Concluded {
    pub(crate) fn from_parts(war: War, roster: Roster) -> Self {
        let concluded_at = war.concluded_at.unwrap_or_else(OffsetDateTime::now_utc);
        Self {
            war_id: war.id,
            concluded_at,
            war,
            roster,
        }
    }
}

impl HasWarData for Concluded {
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
