//! Cancelled state - terminal, reachable from Open or Locked only.

use super::HasWarData;
use crate::domain::wars::{War, WarId};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct Cancelled {
    pub war_id: WarId,
    pub cancelled_at: OffsetDateTime,
    pub reason: String,
    pub previous_state: &'static str,
    pub(crate) war: War,
}

impl Cancelled {
    pub(crate) fn from_war(war: War, reason: String, previous_state: &'static str) -> Self {
        let cancelled_at = war.cancelled_at.unwrap_or_else(OffsetDateTime::now_utc);
        Self {
            war_id: war.id,
            cancelled_at,
            reason,
            previous_state,
            war,
        }
    }
}

impl HasWarData for Cancelled {
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
