//! Roster selection: the starters/backups split installed at lock time.

use super::{ParticipantId, PoolEntry, SignupPool};
use crate::domain::Error;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub participant_id: ParticipantId,
    pub display_name: String,
}

impl From<&PoolEntry> for RosterMember {
    fn from(entry: &PoolEntry) -> Self {
        Self {
            participant_id: entry.participant_id.clone(),
            display_name: entry.display_name.clone(),
        }
    }
}

/// The selection outcome for one war. Only meaningful while the war is
/// locked or later; starters are ordered, backups keep arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    pub starters: Vec<RosterMember>,
    pub backups: Vec<RosterMember>,
}

impl Roster {
    /// Earliest-first selection: the first `team_size` available entries
    /// become starters, the rest become backups.
    pub fn auto(pool: &SignupPool, team_size: u8) -> Result<Self, Error> {
        let available = pool.available();
        let needed = team_size as usize;
        if available.len() < needed {
            return Err(Error::InsufficientPool {
                available: available.len(),
                needed,
            });
        }
        let starters = available[..needed].iter().map(RosterMember::from).collect();
        let backups = available[needed..].iter().map(RosterMember::from).collect();
        Ok(Self { starters, backups })
    }

    /// Explicit selection: the supplied participants become starters in the
    /// given order, every other available pool entry becomes a backup.
    pub fn manual(
        pool: &SignupPool,
        team_size: u8,
        starter_ids: &[ParticipantId],
    ) -> Result<Self, Error> {
        let unique: HashSet<&ParticipantId> = starter_ids.iter().collect();
        if starter_ids.len() != team_size as usize || unique.len() != starter_ids.len() {
            return Err(Error::InvalidFieldValue(format!(
                "please select exactly {} distinct starters",
                team_size
            )));
        }

        let mut starters = Vec::with_capacity(starter_ids.len());
        for id in starter_ids {
            let entry = pool
                .get(id)
                .filter(|e| pool.is_available(&e.participant_id))
                .ok_or_else(|| Error::UnresolvedParticipant(id.clone()))?;
            starters.push(RosterMember::from(entry));
        }

        let backups = pool
            .available()
            .iter()
            .filter(|e| !unique.contains(&e.participant_id))
            .map(RosterMember::from)
            .collect();

        Ok(Self { starters, backups })
    }

    /// Check the invariants that must hold for any installed roster. A
    /// violation here is our own bug, not bad input.
    pub fn validate(&self, team_size: u8) -> Result<(), Error> {
        if self.starters.len() != team_size as usize {
            return Err(Error::RosterInvariant(format!(
                "{} starters installed, team size is {}",
                self.starters.len(),
                team_size
            )));
        }
        let mut seen = HashSet::new();
        for member in self.starters.iter().chain(self.backups.iter()) {
            if !seen.insert(&member.participant_id) {
                return Err(Error::RosterInvariant(format!(
                    "participant {} appears twice in the roster",
                    member.participant_id
                )));
            }
        }
        Ok(())
    }

    pub fn is_starter(&self, participant_id: &str) -> bool {
        self.starters
            .iter()
            .any(|m| m.participant_id == participant_id)
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.is_starter(participant_id)
            || self
                .backups
                .iter()
                .any(|m| m.participant_id == participant_id)
    }

    pub fn remove_starter(&mut self, participant_id: &str) -> Option<RosterMember> {
        let idx = self
            .starters
            .iter()
            .position(|m| m.participant_id == participant_id)?;
        Some(self.starters.remove(idx))
    }

    pub fn starter_ids(&self) -> Vec<ParticipantId> {
        self.starters
            .iter()
            .map(|m| m.participant_id.clone())
            .collect()
    }

    pub fn backup_ids(&self) -> Vec<ParticipantId> {
        self.backups
            .iter()
            .map(|m| m.participant_id.clone())
            .collect()
    }

    pub fn describe(&self) -> String {
        format!(
            "starters: {}; backups: {}",
            self.starters.iter().map(|m| &m.display_name).join(", "),
            self.backups.iter().map(|m| &m.display_name).join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wars::SignalKind;
    use time::{Duration, OffsetDateTime};

    fn pool_of(ids: &[&str]) -> SignupPool {
        let mut pool = SignupPool::new();
        for (i, id) in ids.iter().enumerate() {
            pool.signal(
                id,
                &format!("Player {}", id),
                SignalKind::Available,
                OffsetDateTime::UNIX_EPOCH + Duration::seconds(i as i64),
            );
        }
        pool
    }

    #[test]
    fn auto_select_takes_earliest_first() {
        let pool = pool_of(&["p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8"]);
        let roster = Roster::auto(&pool, 6).unwrap();
        assert_eq!(
            roster.starter_ids(),
            vec!["p1", "p2", "p3", "p4", "p5", "p6"]
        );
        assert_eq!(roster.backup_ids(), vec!["p7", "p8"]);
        roster.validate(6).unwrap();
    }

    #[test]
    fn auto_select_fails_on_insufficient_pool() {
        let pool = pool_of(&["p1", "p2", "p3"]);
        assert!(matches!(
            Roster::auto(&pool, 6),
            Err(Error::InsufficientPool {
                available: 3,
                needed: 6
            })
        ));
    }

    #[test]
    fn manual_select_requires_exact_count_and_known_participants() {
        let pool = pool_of(&["p1", "p2", "p3", "p4", "p5", "p6", "p7"]);

        let too_few: Vec<String> = vec!["p1".into(), "p2".into()];
        assert!(matches!(
            Roster::manual(&pool, 6, &too_few),
            Err(Error::InvalidFieldValue(_))
        ));

        let unknown: Vec<String> = ["p1", "p2", "p3", "p4", "p5", "stranger"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(matches!(
            Roster::manual(&pool, 6, &unknown),
            Err(Error::UnresolvedParticipant(_))
        ));

        let ids: Vec<String> = ["p2", "p1", "p3", "p4", "p5", "p6"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let roster = Roster::manual(&pool, 6, &ids).unwrap();
        assert_eq!(roster.starter_ids(), ids);
        assert_eq!(roster.backup_ids(), vec!["p7"]);
    }

    #[test]
    fn starters_and_backups_stay_disjoint() {
        let pool = pool_of(&["p1", "p2", "p3", "p4", "p5", "p6", "p7"]);
        let roster = Roster::auto(&pool, 6).unwrap();
        for starter in &roster.starters {
            assert!(!roster
                .backups
                .iter()
                .any(|b| b.participant_id == starter.participant_id));
        }

        let dup: Vec<String> = ["p1", "p1", "p2", "p3", "p4", "p5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(Roster::manual(&pool, 6, &dup).is_err());
    }
}
