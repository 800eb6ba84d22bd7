mod coordinator;
pub mod map_pool;
mod pool;
mod roster;
mod stats;
pub mod states;
mod store;

pub use coordinator::*;
pub use pool::*;
pub use roster::*;
pub use stats::*;
pub use store::*;

use super::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

pub type WarId = i64;
pub type ParticipantId = String;

pub const ALLOWED_TEAM_SIZES: [u8; 3] = [6, 7, 8];

/// Match format, which fixes how many maps get planned and played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WarFormat {
    Bo3,
    Bo5,
}

impl WarFormat {
    pub fn required_maps(&self) -> usize {
        match self {
            WarFormat::Bo3 => 3,
            WarFormat::Bo5 => 5,
        }
    }
}

impl fmt::Display for WarFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarFormat::Bo3 => write!(f, "BO3"),
            WarFormat::Bo5 => write!(f, "BO5"),
        }
    }
}

impl FromStr for WarFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BO3" => Ok(WarFormat::Bo3),
            "BO5" => Ok(WarFormat::Bo5),
            other => Err(Error::InvalidFieldValue(format!(
                "format must be BO3 or BO5, got '{}'",
                other
            ))),
        }
    }
}

/// Which side our team played a map on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapSide {
    Seals,
    Terrorists,
}

impl fmt::Display for MapSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapSide::Seals => write!(f, "SEALS"),
            MapSide::Terrorists => write!(f, "TERRORISTS"),
        }
    }
}

impl FromStr for MapSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seals" => Ok(MapSide::Seals),
            "terrorists" => Ok(MapSide::Terrorists),
            other => Err(Error::InvalidFieldValue(format!(
                "side must be SEALs or Terrorists, got '{}'",
                other
            ))),
        }
    }
}

pub const MAX_ROUNDS_PER_MAP: u8 = 6;

/// One recorded map result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapScore {
    pub map_order: u32,
    pub map_name: String,
    pub our_score: u8,
    pub opp_score: u8,
}

/// Input for recording a single map result. The side goes to the audit
/// ledger only; the relational rows do not carry it.
#[derive(Debug, Clone)]
pub struct MapResult {
    pub map_name: String,
    pub our_score: u8,
    pub opp_score: u8,
    pub side: MapSide,
}

impl MapResult {
    pub fn validate(&self) -> Result<(), Error> {
        if !map_pool::is_known_map(&self.map_name) {
            return Err(Error::InvalidFieldValue(format!(
                "unknown map '{}'",
                self.map_name
            )));
        }
        if self.our_score > MAX_ROUNDS_PER_MAP || self.opp_score > MAX_ROUNDS_PER_MAP {
            return Err(Error::InvalidFieldValue(format!(
                "scores must be between 0 and {}",
                MAX_ROUNDS_PER_MAP
            )));
        }
        Ok(())
    }
}

/// One logged substitution, parsed from an `IN -> OUT (note)` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub participant_in: String,
    pub participant_out: String,
    pub note: Option<String>,
}

impl Substitution {
    /// Parse one substitution line. Lines that do not contain the arrow are
    /// rejected rather than guessed at.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let line = line.trim();
        let (incoming, rest) = line.split_once("->").ok_or_else(|| {
            Error::InvalidFieldValue(format!(
                "substitution '{}' must look like 'IN -> OUT (note)'",
                line
            ))
        })?;
        let rest = rest.trim();
        let (outgoing, note) = match rest.split_once('(') {
            Some((out, tail)) => {
                let note = tail.trim_end_matches(')').trim();
                (
                    out.trim(),
                    (!note.is_empty()).then(|| note.to_string()),
                )
            }
            None => (rest, None),
        };
        if incoming.trim().is_empty() || outgoing.is_empty() {
            return Err(Error::InvalidFieldValue(format!(
                "substitution '{}' is missing a participant",
                line
            )));
        }
        Ok(Substitution {
            participant_in: incoming.trim().to_string(),
            participant_out: outgoing.to_string(),
            note,
        })
    }
}

/// Closing details accepted when a war is finalized.
#[derive(Debug, Clone, Default)]
pub struct WarSummary {
    pub vod_url: Option<String>,
    pub notes: Option<String>,
    /// Raw substitution lines, one `IN -> OUT (note)` per line.
    pub substitutions: Vec<String>,
}

/// Immutable parameter bundle produced by a completed wizard session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWar {
    pub opponent: String,
    pub format: WarFormat,
    pub team_size: u8,
    pub start_display: String,
    pub timezone: String,
}

/// One scheduled war. Owned by the state machine in `states`; everything
/// else sees it through snapshots or the coordinator's transition API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct War {
    pub id: WarId,
    /// Transport surface pointer (e.g. the sign-up post id). Stored as an
    /// attribute so message lifetimes never key core state.
    pub message_id: Option<String>,
    pub opponent: String,
    pub format: WarFormat,
    pub team_size: u8,
    pub start_display: String,
    pub timezone: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub planned_maps: Vec<String>,
    pub scores: Vec<MapScore>,
    pub vod_url: Option<String>,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub locked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub concluded_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
}

impl War {
    pub fn new(id: WarId, params: &CreateWar) -> Self {
        Self {
            id,
            message_id: None,
            opponent: params.opponent.clone(),
            format: params.format,
            team_size: params.team_size,
            start_display: params.start_display.clone(),
            timezone: params.timezone.clone(),
            created_at: OffsetDateTime::now_utc(),
            planned_maps: Vec::new(),
            scores: Vec::new(),
            vod_url: None,
            notes: None,
            locked_at: None,
            started_at: None,
            concluded_at: None,
            cancelled_at: None,
        }
    }

    pub fn next_map_order(&self) -> u32 {
        self.scores
            .iter()
            .map(|s| s.map_order)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Maps won by each team so far.
    pub fn series_score(&self) -> (u8, u8) {
        let mut ours = 0;
        let mut theirs = 0;
        for score in &self.scores {
            if score.our_score > score.opp_score {
                ours += 1;
            } else if score.opp_score > score.our_score {
                theirs += 1;
            }
        }
        (ours, theirs)
    }
}

/// Read-only view handed to the notifier and board collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarSnapshot {
    pub id: WarId,
    pub message_id: Option<String>,
    pub opponent: String,
    pub format: WarFormat,
    pub team_size: u8,
    pub start_display: String,
    pub timezone: String,
    pub state: String,
    pub planned_maps: Vec<String>,
    pub scores: Vec<MapScore>,
    pub starters: Vec<RosterMember>,
    pub backups: Vec<RosterMember>,
    pub pool: Vec<PoolEntry>,
}
