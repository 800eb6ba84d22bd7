//! Append-only persistence for war facts. The in-memory state machine stays
//! authoritative; nothing here is read back to reconstruct lifecycle state.
//! The only queries are the id seed and the stats aggregation.

use super::{Roster, Substitution, War, WarFormat, WarId};
use crate::{
    domain::Error,
    infra::db::{parse_optional_datetime, parse_required_datetime, DBConnection},
};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::str::FromStr;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// A war row as the store keeps it. Used for audit reads and tests, never to
/// rebuild the state machine.
#[derive(Debug, Clone)]
pub struct StoredWar {
    pub id: WarId,
    pub message_id: Option<String>,
    pub opponent: String,
    pub format: WarFormat,
    pub team_size: u8,
    pub start_display: String,
    pub timezone: String,
    pub created_at: OffsetDateTime,
    pub locked_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub concluded_at: Option<OffsetDateTime>,
    pub vod_url: Option<String>,
    pub notes: Option<String>,
}

impl FromRow<'_, SqliteRow> for StoredWar {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let format_str: String = row.get("format");
        let format =
            WarFormat::from_str(&format_str).map_err(|e| sqlx::Error::ColumnDecode {
                index: "format".to_string(),
                source: Box::new(std::io::Error::other(e.to_string())),
            })?;

        Ok(StoredWar {
            id: row.get("id"),
            message_id: row.get("message_id"),
            opponent: row.get("opponent"),
            format,
            team_size: row.get::<i64, _>("team_size") as u8,
            start_display: row.get("start_display"),
            timezone: row.get("timezone"),
            created_at: parse_required_datetime(row, "created_at")?,
            locked_at: parse_optional_datetime(row, "locked_at")?,
            cancelled_at: parse_optional_datetime(row, "cancelled_at")?,
            concluded_at: parse_optional_datetime(row, "concluded_at")?,
            vod_url: row.get("vod_url"),
            notes: row.get("notes"),
        })
    }
}

/// One war's outcome for a single participant, the raw material for stats.
#[derive(Debug, Clone)]
pub struct PlayerWarRow {
    pub war_id: WarId,
    pub opponent: String,
    pub format: String,
    pub start_display: String,
    pub maps_won: i64,
    pub maps_total: i64,
}

impl FromRow<'_, SqliteRow> for PlayerWarRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(PlayerWarRow {
            war_id: row.get("war_id"),
            opponent: row.get("opponent"),
            format: row.get("format"),
            start_display: row.get("start_display"),
            maps_won: row.try_get("maps_won").unwrap_or(0),
            maps_total: row.try_get("maps_total").unwrap_or(0),
        })
    }
}

fn rfc3339(at: OffsetDateTime) -> Result<String, Error> {
    at.format(&Rfc3339)
        .map_err(|e| Error::InvalidFieldValue(format!("unformattable timestamp: {}", e)))
}

#[derive(Debug, Clone)]
pub struct WarStore {
    db_connection: DBConnection,
}

impl WarStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        self.db_connection.ping().await
    }

    /// Seed for the in-process id allocator. Ids keep growing across
    /// restarts because the wars table remembers the high-water mark.
    pub async fn next_war_id(&self) -> Result<WarId, Error> {
        let next: i64 = sqlx::query_scalar("SELECT IFNULL(MAX(id), 0) + 1 FROM wars")
            .fetch_one(self.db_connection.read())
            .await?;
        Ok(next)
    }

    pub async fn war_created(&self, war: &War) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO wars (id, message_id, opponent, format, team_size, start_display, timezone, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(war.id)
        .bind(&war.message_id)
        .bind(&war.opponent)
        .bind(war.format.to_string())
        .bind(war.team_size as i64)
        .bind(&war.start_display)
        .bind(&war.timezone)
        .bind(rfc3339(war.created_at)?)
        .execute(self.db_connection.write())
        .await?;
        Ok(())
    }

    pub async fn message_attached(&self, war_id: WarId, message_id: &str) -> Result<(), Error> {
        sqlx::query("UPDATE wars SET message_id = ? WHERE id = ?")
            .bind(message_id)
            .bind(war_id)
            .execute(self.db_connection.write())
            .await?;
        Ok(())
    }

    /// Record a lock (or re-lock): stamp the war and replace the member
    /// snapshot. Runs in one transaction so a crash never leaves a locked
    /// war with half a roster.
    pub async fn roster_locked(&self, war: &War, roster: &Roster) -> Result<(), Error> {
        let locked_at: Option<String> = war.locked_at.map(rfc3339).transpose()?;

        let mut tx = self.db_connection.write().begin().await?;

        sqlx::query("UPDATE wars SET locked_at = ? WHERE id = ?")
            .bind(&locked_at)
            .bind(war.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM war_players WHERE war_id = ?")
            .bind(war.id)
            .execute(&mut *tx)
            .await?;

        for member in &roster.starters {
            sqlx::query(
                "INSERT OR REPLACE INTO war_players (war_id, participant_id, display_name, role)
                 VALUES (?, ?, ?, 'starter')",
            )
            .bind(war.id)
            .bind(&member.participant_id)
            .bind(&member.display_name)
            .execute(&mut *tx)
            .await?;
        }
        for member in &roster.backups {
            sqlx::query(
                "INSERT OR REPLACE INTO war_players (war_id, participant_id, display_name, role)
                 VALUES (?, ?, ?, 'backup')",
            )
            .bind(war.id)
            .bind(&member.participant_id)
            .bind(&member.display_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn roster_cleared(&self, war_id: WarId) -> Result<(), Error> {
        let mut tx = self.db_connection.write().begin().await?;
        sqlx::query("UPDATE wars SET locked_at = NULL WHERE id = ?")
            .bind(war_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM war_players WHERE war_id = ?")
            .bind(war_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replace the score-less draft rows with the planned map list.
    pub async fn maps_planned(&self, war_id: WarId, names: &[String]) -> Result<(), Error> {
        let mut tx = self.db_connection.write().begin().await?;

        sqlx::query("DELETE FROM maps WHERE war_id = ? AND our_score IS NULL")
            .bind(war_id)
            .execute(&mut *tx)
            .await?;

        let start: i64 =
            sqlx::query_scalar("SELECT IFNULL(MAX(map_order), 0) FROM maps WHERE war_id = ?")
                .bind(war_id)
                .fetch_one(&mut *tx)
                .await?;

        for (i, name) in names.iter().enumerate() {
            sqlx::query(
                "INSERT INTO maps (war_id, map_order, map_name, our_score, opp_score)
                 VALUES (?, ?, ?, NULL, NULL)",
            )
            .bind(war_id)
            .bind(start + 1 + i as i64)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record a map result. Fills the earliest matching draft row if one
    /// exists, otherwise appends a new row. Returns the map order used.
    pub async fn map_scored(
        &self,
        war_id: WarId,
        map_name: &str,
        our_score: u8,
        opp_score: u8,
    ) -> Result<u32, Error> {
        let mut tx = self.db_connection.write().begin().await?;

        let draft: Option<i64> = sqlx::query_scalar(
            "SELECT map_order FROM maps
             WHERE war_id = ? AND map_name = ? AND our_score IS NULL
             ORDER BY map_order LIMIT 1",
        )
        .bind(war_id)
        .bind(map_name)
        .fetch_optional(&mut *tx)
        .await?;

        let order = match draft {
            Some(order) => {
                sqlx::query(
                    "UPDATE maps SET our_score = ?, opp_score = ?
                     WHERE war_id = ? AND map_order = ?",
                )
                .bind(our_score as i64)
                .bind(opp_score as i64)
                .bind(war_id)
                .bind(order)
                .execute(&mut *tx)
                .await?;
                order
            }
            None => {
                let next: i64 = sqlx::query_scalar(
                    "SELECT IFNULL(MAX(map_order), 0) + 1 FROM maps WHERE war_id = ?",
                )
                .bind(war_id)
                .fetch_one(&mut *tx)
                .await?;
                sqlx::query(
                    "INSERT INTO maps (war_id, map_order, map_name, our_score, opp_score)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(war_id)
                .bind(next)
                .bind(map_name)
                .bind(our_score as i64)
                .bind(opp_score as i64)
                .execute(&mut *tx)
                .await?;
                next
            }
        };

        tx.commit().await?;
        Ok(order as u32)
    }

    pub async fn war_concluded(
        &self,
        war_id: WarId,
        concluded_at: OffsetDateTime,
        vod_url: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query(
            "UPDATE wars SET concluded_at = ?, vod_url = COALESCE(?, vod_url), notes = COALESCE(?, notes)
             WHERE id = ?",
        )
        .bind(rfc3339(concluded_at)?)
        .bind(vod_url)
        .bind(notes)
        .bind(war_id)
        .execute(self.db_connection.write())
        .await?;
        Ok(())
    }

    pub async fn war_cancelled(&self, war_id: WarId, at: OffsetDateTime) -> Result<(), Error> {
        sqlx::query("UPDATE wars SET cancelled_at = ? WHERE id = ?")
            .bind(rfc3339(at)?)
            .bind(war_id)
            .execute(self.db_connection.write())
            .await?;
        Ok(())
    }

    pub async fn substitution_logged(
        &self,
        war_id: WarId,
        sub: &Substitution,
        at: OffsetDateTime,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO substitutions (war_id, participant_in, participant_out, note, at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(war_id)
        .bind(&sub.participant_in)
        .bind(&sub.participant_out)
        .bind(&sub.note)
        .bind(rfc3339(at)?)
        .execute(self.db_connection.write())
        .await?;
        Ok(())
    }

    pub async fn no_show_logged(
        &self,
        war_id: WarId,
        participant_id: &str,
        display_name: &str,
        at: OffsetDateTime,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO no_shows (war_id, participant_id, display_name, at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(war_id)
        .bind(participant_id)
        .bind(display_name)
        .bind(rfc3339(at)?)
        .execute(self.db_connection.write())
        .await?;
        Ok(())
    }

    pub async fn get_war(&self, war_id: WarId) -> Result<StoredWar, Error> {
        let war = sqlx::query_as::<_, StoredWar>(
            "SELECT id, message_id, opponent, format, team_size, start_display, timezone,
                    created_at, locked_at, cancelled_at, concluded_at, vod_url, notes
             FROM wars WHERE id = ?",
        )
        .bind(war_id)
        .fetch_optional(self.db_connection.read())
        .await?;

        war.ok_or_else(|| Error::NotFound(format!("war #{}", war_id)))
    }

    /// Per-war map tallies for one participant, newest war first.
    pub async fn player_war_rows(&self, participant_id: &str) -> Result<Vec<PlayerWarRow>, Error> {
        let rows = sqlx::query_as::<_, PlayerWarRow>(
            "SELECT w.id AS war_id, w.opponent, w.format, w.start_display,
                    SUM(CASE WHEN m.our_score > m.opp_score THEN 1 ELSE 0 END) AS maps_won,
                    COUNT(m.id) AS maps_total
             FROM wars w
             LEFT JOIN maps m ON m.war_id = w.id AND m.our_score IS NOT NULL
             JOIN war_players p ON p.war_id = w.id AND p.participant_id = ?
             GROUP BY w.id
             ORDER BY w.id DESC",
        )
        .bind(participant_id)
        .fetch_all(self.db_connection.read())
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wars::{CreateWar, RosterMember};
    use sqlx::SqlitePool;

    fn create_store(pool: SqlitePool) -> WarStore {
        let db = DBConnection::new_with_pools(
            "test".to_string(),
            ":memory:".to_string(),
            pool.clone(),
            pool,
        );
        WarStore::new(db)
    }

    fn sample_war(id: WarId) -> War {
        War::new(
            id,
            &CreateWar {
                opponent: "RivalClan".into(),
                format: WarFormat::Bo3,
                team_size: 6,
                start_display: "Sat Aug 9, 8:30 PM".into(),
                timezone: "America/New_York".into(),
            },
        )
    }

    fn member(id: &str) -> RosterMember {
        RosterMember {
            participant_id: id.to_string(),
            display_name: format!("Player {}", id),
        }
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn id_seed_tracks_the_high_water_mark(pool: SqlitePool) {
        let store = create_store(pool);
        assert_eq!(store.next_war_id().await.unwrap(), 1);

        store.war_created(&sample_war(7)).await.unwrap();
        assert_eq!(store.next_war_id().await.unwrap(), 8);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn lock_snapshot_replaces_members(pool: SqlitePool) {
        let store = create_store(pool);
        let mut war = sample_war(1);
        store.war_created(&war).await.unwrap();

        war.locked_at = Some(OffsetDateTime::now_utc());
        let roster = Roster {
            starters: vec![member("p1"), member("p2")],
            backups: vec![member("p3")],
        };
        store.roster_locked(&war, &roster).await.unwrap();

        // Re-lock after a promotion: p1 out, p3 promoted
        let relocked = Roster {
            starters: vec![member("p2"), member("p3")],
            backups: vec![],
        };
        store.roster_locked(&war, &relocked).await.unwrap();

        let stored = store.get_war(1).await.unwrap();
        assert!(stored.locked_at.is_some());

        let rows = store.player_war_rows("p1").await.unwrap();
        assert!(rows.is_empty(), "demoted starter should be out of the snapshot");
        let rows = store.player_war_rows("p3").await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn draft_maps_fill_in_as_scores_arrive(pool: SqlitePool) {
        let store = create_store(pool);
        let war = sample_war(1);
        store.war_created(&war).await.unwrap();

        store
            .maps_planned(
                1,
                &[
                    "Blizzard - Demolition".to_string(),
                    "Abandoned - Suppression".to_string(),
                    "Crossroads - Demolition".to_string(),
                ],
            )
            .await
            .unwrap();

        let order = store
            .map_scored(1, "Blizzard - Demolition", 6, 3)
            .await
            .unwrap();
        assert_eq!(order, 1);

        // Unplanned map appends after the draft rows
        let order = store.map_scored(1, "Sujo - Breach", 2, 6).await.unwrap();
        assert_eq!(order, 4);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn stats_rows_count_only_scored_maps(pool: SqlitePool) {
        let store = create_store(pool);
        let mut war = sample_war(1);
        store.war_created(&war).await.unwrap();

        war.locked_at = Some(OffsetDateTime::now_utc());
        let roster = Roster {
            starters: vec![member("p1")],
            backups: vec![],
        };
        store.roster_locked(&war, &roster).await.unwrap();

        store
            .maps_planned(1, &["Crossroads - Demolition".to_string()])
            .await
            .unwrap();
        store
            .map_scored(1, "Crossroads - Demolition", 6, 4)
            .await
            .unwrap();

        let rows = store.player_war_rows("p1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].maps_total, 1);
        assert_eq!(rows[0].maps_won, 1);
    }

    #[sqlx::test(migrations = "./migrations/wars")]
    async fn conclusion_and_bookkeeping_rows(pool: SqlitePool) {
        let store = create_store(pool);
        let war = sample_war(1);
        store.war_created(&war).await.unwrap();

        let now = OffsetDateTime::now_utc();
        store
            .substitution_logged(
                1,
                &Substitution {
                    participant_in: "Viper".into(),
                    participant_out: "Ghost".into(),
                    note: Some("late".into()),
                },
                now,
            )
            .await
            .unwrap();
        store.no_show_logged(1, "p9", "Niner", now).await.unwrap();
        store
            .war_concluded(1, now, Some("https://vods.example/w1"), Some("gg"))
            .await
            .unwrap();

        let stored = store.get_war(1).await.unwrap();
        assert!(stored.concluded_at.is_some());
        assert_eq!(stored.vod_url.as_deref(), Some("https://vods.example/w1"));
        assert_eq!(stored.notes.as_deref(), Some("gg"));
    }
}
