//! Per-war sign-up pool: participant -> signal, ordered by arrival.

use super::ParticipantId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Available,
    Unavailable,
}

/// One participant's current signal for one war.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub participant_id: ParticipantId,
    /// Name captured at signal time, never re-resolved.
    pub display_name: String,
    pub kind: SignalKind,
    #[serde(with = "time::serde::rfc3339")]
    pub arrived_at: OffsetDateTime,
    /// Insertion sequence, the tie-break when two signals share a timestamp.
    pub seq: u64,
}

/// The sign-up pool for a single war. All mutation goes through `signal`
/// and `retract`; selection order is arrival time ascending with the
/// insertion sequence as a stable tie-break.
#[derive(Debug, Clone, Default)]
pub struct SignupPool {
    entries: Vec<PoolEntry>,
    next_seq: u64,
}

impl SignupPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a signal. Re-signalling the same kind only refreshes the
    /// display-name snapshot; switching kind is a fresh commitment and
    /// resets the arrival position to `at`.
    ///
    /// Returns true when anything changed.
    pub fn signal(
        &mut self,
        participant_id: &str,
        display_name: &str,
        kind: SignalKind,
        at: OffsetDateTime,
    ) -> bool {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.participant_id == participant_id)
        {
            if entry.kind == kind {
                entry.display_name = display_name.to_string();
            } else {
                entry.kind = kind;
                entry.display_name = display_name.to_string();
                entry.arrived_at = at;
                entry.seq = self.next_seq;
                self.next_seq += 1;
            }
            return true;
        }

        self.entries.push(PoolEntry {
            participant_id: participant_id.to_string(),
            display_name: display_name.to_string(),
            kind,
            arrived_at: at,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        true
    }

    /// Remove a participant's entry entirely. Retracting an absent entry is
    /// a no-op, not an error; returns whether anything was removed.
    pub fn retract(&mut self, participant_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.participant_id != participant_id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, participant_id: &str) -> Option<&PoolEntry> {
        self.entries
            .iter()
            .find(|e| e.participant_id == participant_id)
    }

    pub fn is_available(&self, participant_id: &str) -> bool {
        self.get(participant_id)
            .is_some_and(|e| e.kind == SignalKind::Available)
    }

    /// All entries, arrival time ascending.
    pub fn snapshot(&self) -> Vec<PoolEntry> {
        let mut out = self.entries.clone();
        out.sort_by_key(|e| (e.arrived_at, e.seq));
        out
    }

    /// Entries currently signalling available, in selection order.
    pub fn available(&self) -> Vec<PoolEntry> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.kind == SignalKind::Available)
            .collect()
    }

    pub fn available_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.kind == SignalKind::Available)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
