//! Typestate machine for the war lifecycle.
//!
//! Each state is a separate struct; transitions consume `self` and return
//! the next state, so an illegal transition does not compile. The roster
//! lives inside the `Locked`/`InProgress`/`Concluded` states, which is what
//! makes "a valid roster exists" equivalent to "the war is locked or later"
//! rather than a separately tracked flag.
//!
//! # State Flow
//!
//! ```text
//! Open
//!   ↓ lock (roster installed atomically)
//! Locked ──────relock──────→ Locked (backup promoted into a vacated slot)
//!   ↓ first map score         │
//! InProgress                  │ reopen (no backup left; roster cleared)
//!   ↓ finalize                ↓
//! Concluded                 Open
//!
//! (Open and Locked can also transition to Cancelled)
//! ```

mod cancelled;
mod concluded;
mod in_progress;
mod locked;
mod open;

pub use cancelled::*;
pub use concluded::*;
pub use in_progress::*;
pub use locked::*;
pub use open::*;

use super::{Roster, War, WarId};
use std::fmt;

/// Wrapper enum for dynamic dispatch when the state type isn't known at
/// compile time: session storage, snapshots, logging.
#[derive(Debug, Clone)]
pub enum WarStatus {
    Open(Open),
    Locked(Locked),
    InProgress(InProgress),
    Concluded(Concluded),
    Cancelled(Cancelled),
}

impl WarStatus {
    pub fn war_id(&self) -> WarId {
        match self {
            Self::Open(s) => s.war_id,
            Self::Locked(s) => s.war_id,
            Self::InProgress(s) => s.war_id,
            Self::Concluded(s) => s.war_id,
            Self::Cancelled(s) => s.war_id,
        }
    }

    /// State name for logging and display.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Locked(_) => "locked",
            Self::InProgress(_) => "in_progress",
            Self::Concluded(_) => "concluded",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Concluded(_) | Self::Cancelled(_))
    }

    pub fn war(&self) -> &War {
        match self {
            Self::Open(s) => s.war(),
            Self::Locked(s) => s.war(),
            Self::InProgress(s) => s.war(),
            Self::Concluded(s) => s.war(),
            Self::Cancelled(s) => s.war(),
        }
    }

    pub fn war_mut(&mut self) -> &mut War {
        match self {
            Self::Open(s) => s.war_mut(),
            Self::Locked(s) => s.war_mut(),
            Self::InProgress(s) => s.war_mut(),
            Self::Concluded(s) => s.war_mut(),
            Self::Cancelled(s) => s.war_mut(),
        }
    }

    pub fn into_war(self) -> War {
        match self {
            Self::Open(s) => s.into_war(),
            Self::Locked(s) => s.into_war(),
            Self::InProgress(s) => s.into_war(),
            Self::Concluded(s) => s.into_war(),
            Self::Cancelled(s) => s.into_war(),
        }
    }

    /// The installed roster, present exactly in locked-or-later states.
    pub fn roster(&self) -> Option<&Roster> {
        match self {
            Self::Locked(s) => Some(&s.roster),
            Self::InProgress(s) => Some(&s.roster),
            Self::Concluded(s) => Some(&s.roster),
            Self::Open(_) | Self::Cancelled(_) => None,
        }
    }
}

impl fmt::Display for WarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state_name())
    }
}

/// Trait for states that hold war data and can be converted back.
pub trait HasWarData {
    fn war(&self) -> &War;
    fn war_mut(&mut self) -> &mut War;
    fn into_war(self) -> War;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wars::{CreateWar, RosterMember, WarFormat};

    fn params() -> CreateWar {
        CreateWar {
            opponent: "RivalClan".into(),
            format: WarFormat::Bo3,
            team_size: 6,
            start_display: "Sat Aug 9, 8:30 PM".into(),
            timezone: "America/New_York".into(),
        }
    }

    fn roster_of(n: usize, backups: usize) -> Roster {
        let member = |i: usize| RosterMember {
            participant_id: format!("p{}", i),
            display_name: format!("Player {}", i),
        };
        Roster {
            starters: (0..n).map(member).collect(),
            backups: (n..n + backups).map(member).collect(),
        }
    }

    #[test]
    fn lock_moves_roster_into_the_state() {
        let open = Open::new(7, &params());
        let status = open.lock(roster_of(6, 2));
        assert_eq!(status.state_name(), "locked");
        assert_eq!(status.roster().unwrap().starters.len(), 6);
        assert!(status.war().locked_at.is_some());
    }

    #[test]
    fn reopen_clears_the_roster() {
        let open = Open::new(7, &params());
        let WarStatus::Locked(locked) = open.lock(roster_of(6, 0)) else {
            panic!("expected locked");
        };
        let status = locked.reopen();
        assert_eq!(status.state_name(), "open");
        assert!(status.roster().is_none());
        assert!(status.war().locked_at.is_none());
    }

    #[test]
    fn terminal_states_report_terminal() {
        let open = Open::new(7, &params());
        let cancelled = open.cancel("called off".into());
        assert!(cancelled.is_terminal());
        assert_eq!(cancelled.state_name(), "cancelled");

        let WarStatus::Locked(locked) = Open::new(8, &params()).lock(roster_of(6, 0)) else {
            panic!("expected locked");
        };
        let WarStatus::InProgress(playing) = locked.begin() else {
            panic!("expected in_progress");
        };
        let done = playing.conclude();
        assert!(done.is_terminal());
        assert_eq!(done.state_name(), "concluded");
        assert!(done.roster().is_some());
    }
}
