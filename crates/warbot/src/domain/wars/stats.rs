//! Per-player aggregation over recorded map results.

use super::PlayerWarRow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    pub wars: u32,
    pub wins: u32,
    pub losses: u32,
    pub maps_won: u32,
    pub maps_played: u32,
}

impl PlayerStats {
    /// Fold the per-war rows into totals. A war counts as a win when the
    /// player's team took more than half of its scored maps; wars with no
    /// scored maps count toward `wars` but neither column.
    pub fn from_rows(rows: &[PlayerWarRow]) -> Self {
        let mut stats = PlayerStats::default();
        for row in rows {
            stats.wars += 1;
            stats.maps_won += row.maps_won as u32;
            stats.maps_played += row.maps_total as u32;
            if row.maps_total > 0 {
                if row.maps_won * 2 > row.maps_total {
                    stats.wins += 1;
                } else {
                    stats.losses += 1;
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(war_id: i64, maps_won: i64, maps_total: i64) -> PlayerWarRow {
        PlayerWarRow {
            war_id,
            opponent: "RivalClan".into(),
            format: "BO3".into(),
            start_display: "Sat Aug 9, 8:30 PM".into(),
            maps_won,
            maps_total,
        }
    }

    #[test]
    fn unscored_wars_are_neither_won_nor_lost() {
        let stats = PlayerStats::from_rows(&[row(1, 2, 3), row(2, 0, 0), row(3, 1, 3)]);
        assert_eq!(stats.wars, 3);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.maps_won, 3);
        assert_eq!(stats.maps_played, 6);
    }

    #[test]
    fn an_even_split_counts_as_a_loss() {
        let stats = PlayerStats::from_rows(&[row(1, 2, 4)]);
        assert_eq!(stats.wins, 0);
        assert_eq!(stats.losses, 1);
    }
}
