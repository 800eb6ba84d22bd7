//! Per-administrator creation wizard: a transient, multi-step collection of
//! the parameters needed to open a new war. One live session per admin,
//! last writer wins, one-shot completion.

use super::{Error, ALLOWED_TEAM_SIZES};
use crate::domain::wars::{CreateWar, WarFormat};
use log::{debug, info};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use time::{
    macros::format_description, Date, Duration, OffsetDateTime, Time,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How far out a war may be scheduled.
pub const DATE_WINDOW_DAYS: i64 = 14;
/// Wars start in the evening: 17:00 through 23:30, on the half hour.
pub const EVENING_START: Time = time::macros::time!(17:00);
pub const EVENING_END: Time = time::macros::time!(23:30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardField {
    TeamSize,
    Format,
    Opponent,
    Date,
    Time,
}

impl WizardField {
    fn name(&self) -> &'static str {
        match self {
            WizardField::TeamSize => "team size",
            WizardField::Format => "format",
            WizardField::Opponent => "opponent",
            WizardField::Date => "date",
            WizardField::Time => "time",
        }
    }
}

/// The start time as collected: either a validated evening slot or a
/// free-text override taken verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StartTime {
    Slot(Time),
    Override(String),
}

#[derive(Debug, Clone)]
pub struct WizardSession {
    pub id: Uuid,
    pub admin_id: String,
    /// Interactive surface being edited, when the transport has one.
    pub surface_id: Option<String>,
    team_size: Option<u8>,
    format: Option<WarFormat>,
    opponent: Option<String>,
    date: Option<Date>,
    time: Option<StartTime>,
    last_touched: OffsetDateTime,
}

impl WizardSession {
    fn new(admin_id: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            admin_id: admin_id.to_string(),
            surface_id: None,
            team_size: None,
            format: None,
            opponent: None,
            date: None,
            time: None,
            last_touched: OffsetDateTime::now_utc(),
        }
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.team_size.is_none() {
            missing.push("team size");
        }
        if self.format.is_none() {
            missing.push("format");
        }
        if self.opponent.is_none() {
            missing.push("opponent");
        }
        if self.date.is_none() {
            missing.push("date");
        }
        if self.time.is_none() {
            missing.push("time");
        }
        missing
    }
}

/// Registry of live wizard sessions, keyed by administrator.
pub struct WizardSessions {
    sessions: Mutex<HashMap<String, WizardSession>>,
    display_timezone: String,
    idle_ttl: Duration,
}

impl WizardSessions {
    pub fn new(display_timezone: String, idle_ttl_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            display_timezone,
            idle_ttl: Duration::seconds(idle_ttl_secs as i64),
        }
    }

    /// Start a fresh session for this admin, silently replacing any prior
    /// one - only one interactive surface can be live per admin.
    pub fn start(&self, admin_id: &str) -> WizardSession {
        let session = WizardSession::new(admin_id);
        debug!("wizard {} started for admin {}", session.id, admin_id);
        self.sessions
            .lock()
            .unwrap()
            .insert(admin_id.to_string(), session.clone());
        session
    }

    pub fn attach_surface(&self, admin_id: &str, surface_id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(admin_id) {
            session.surface_id = Some(surface_id.to_string());
        }
    }

    /// Validate and set one field. Nothing changes when validation fails.
    pub fn set_field(
        &self,
        admin_id: &str,
        field: WizardField,
        value: &str,
    ) -> Result<WizardSession, Error> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(admin_id).ok_or_else(|| {
            Error::NotFound(format!("no wizard in progress for setting {}", field.name()))
        })?;

        match field {
            WizardField::TeamSize => {
                let size: u8 = value.trim().parse().map_err(|_| {
                    Error::InvalidFieldValue(format!("team size must be a number, got '{}'", value))
                })?;
                if !ALLOWED_TEAM_SIZES.contains(&size) {
                    return Err(Error::InvalidFieldValue(format!(
                        "team size must be 6, 7 or 8, got {}",
                        size
                    )));
                }
                session.team_size = Some(size);
            }
            WizardField::Format => {
                session.format = Some(WarFormat::from_str(value)?);
            }
            WizardField::Opponent => {
                let opponent = value.trim();
                if opponent.is_empty() {
                    return Err(Error::InvalidFieldValue(
                        "opponent name cannot be empty".to_string(),
                    ));
                }
                session.opponent = Some(opponent.to_string());
            }
            WizardField::Date => {
                session.date = Some(parse_date(value)?);
            }
            WizardField::Time => {
                session.time = Some(parse_time(value)?);
            }
        }

        session.last_touched = OffsetDateTime::now_utc();
        Ok(session.clone())
    }

    /// One-shot completion: returns the immutable parameter bundle and
    /// discards the session. Fails without consuming anything while fields
    /// are missing.
    pub fn complete(&self, admin_id: &str) -> Result<CreateWar, Error> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .remove(admin_id)
            .ok_or_else(|| Error::NotFound("no wizard in progress".to_string()))?;

        let missing = session.missing_fields();
        if !missing.is_empty() {
            let reason = missing.join(", ");
            sessions.insert(admin_id.to_string(), session);
            return Err(Error::IncompleteWizard(reason));
        }

        let WizardSession {
            id,
            admin_id,
            team_size: Some(team_size),
            format: Some(format),
            opponent: Some(opponent),
            date: Some(date),
            time: Some(time),
            ..
        } = session
        else {
            return Err(Error::IncompleteWizard("wizard state".to_string()));
        };

        let start_display = match time {
            StartTime::Slot(slot) => format_start(date, slot),
            StartTime::Override(text) => format!("{} {}", format_date(date), text),
        };

        info!("wizard {} completed by admin {}", id, admin_id);

        Ok(CreateWar {
            opponent,
            format,
            team_size,
            start_display,
            timezone: self.display_timezone.clone(),
        })
    }

    /// Discard the admin's session. Idempotent when none exists.
    pub fn cancel(&self, admin_id: &str) {
        if self.sessions.lock().unwrap().remove(admin_id).is_some() {
            debug!("wizard cancelled for admin {}", admin_id);
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Drop sessions idle past the TTL. Abandoned wizards cost almost
    /// nothing but there is no reason to keep them forever.
    pub fn sweep(&self) -> usize {
        let cutoff = OffsetDateTime::now_utc() - self.idle_ttl;
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_touched > cutoff);
        before - sessions.len()
    }

    #[cfg(test)]
    fn age_session(&self, admin_id: &str, by: Duration) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(admin_id) {
            session.last_touched -= by;
        }
    }
}

fn parse_date(value: &str) -> Result<Date, Error> {
    let format = format_description!("[year]-[month]-[day]");
    let date = Date::parse(value.trim(), &format).map_err(|_| {
        Error::InvalidFieldValue(format!("date must look like 2026-08-09, got '{}'", value))
    })?;

    let today = OffsetDateTime::now_utc().date();
    if date < today || date >= today + Duration::days(DATE_WINDOW_DAYS) {
        return Err(Error::InvalidFieldValue(format!(
            "date must fall within the next {} days",
            DATE_WINDOW_DAYS
        )));
    }
    Ok(date)
}

fn parse_time(value: &str) -> Result<StartTime, Error> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidFieldValue("time cannot be empty".to_string()));
    }

    // `HH:MM` is validated against the evening window; anything else is an
    // explicit free-text override.
    let looks_like_time = trimmed.len() <= 5
        && trimmed.contains(':')
        && trimmed.chars().all(|c| c.is_ascii_digit() || c == ':');
    if !looks_like_time {
        return Ok(StartTime::Override(trimmed.to_string()));
    }

    let format = format_description!("[hour padding:none]:[minute]");
    let time = Time::parse(trimmed, &format).map_err(|_| {
        Error::InvalidFieldValue(format!("time must look like 19:30, got '{}'", value))
    })?;

    if time < EVENING_START || time > EVENING_END {
        return Err(Error::InvalidFieldValue(format!(
            "start time must be between {}:00 and {}:{:02}",
            EVENING_START.hour(),
            EVENING_END.hour(),
            EVENING_END.minute()
        )));
    }
    if time.minute() % 30 != 0 {
        return Err(Error::InvalidFieldValue(
            "start time must land on a half hour".to_string(),
        ));
    }
    Ok(StartTime::Slot(time))
}

fn format_date(date: Date) -> String {
    let format = format_description!("[weekday repr:short] [month repr:short] [day padding:none]");
    date.format(&format).unwrap_or_else(|_| date.to_string())
}

fn format_start(date: Date, time: Time) -> String {
    let time_format = format_description!("[hour repr:12 padding:none]:[minute] [period]");
    let time_text = time.format(&time_format).unwrap_or_else(|_| time.to_string());
    format!("{}, {}", format_date(date), time_text)
}

/// Background sweep evicting idle wizard sessions.
pub struct WizardSweeper {
    sessions: std::sync::Arc<WizardSessions>,
    sweep_interval: std::time::Duration,
    cancel_token: CancellationToken,
}

impl WizardSweeper {
    pub fn new(
        sessions: std::sync::Arc<WizardSessions>,
        cancel_token: CancellationToken,
        sweep_interval: std::time::Duration,
    ) -> Self {
        Self {
            sessions,
            sweep_interval,
            cancel_token,
        }
    }

    pub async fn watch(&self) -> Result<(), anyhow::Error> {
        info!("Starting wizard session sweeper");

        loop {
            if self.cancel_token.is_cancelled() {
                info!("Wizard sweeper received cancellation");
                break;
            }

            let evicted = self.sessions.sweep();
            if evicted > 0 {
                info!("Evicted {} idle wizard session(s)", evicted);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => continue,
                _ = self.cancel_token.cancelled() => {
                    info!("Wizard sweeper cancelled during sleep");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sessions() -> WizardSessions {
        WizardSessions::new("America/New_York".to_string(), 900)
    }

    fn valid_date() -> String {
        let format = format_description!("[year]-[month]-[day]");
        (OffsetDateTime::now_utc().date() + Duration::days(2))
            .format(&format)
            .unwrap()
    }

    #[test]
    fn full_flow_produces_a_bundle_and_consumes_the_session() {
        let wizards = sessions();
        wizards.start("admin1");
        wizards
            .set_field("admin1", WizardField::TeamSize, "8")
            .unwrap();
        wizards
            .set_field("admin1", WizardField::Format, "BO3")
            .unwrap();
        wizards
            .set_field("admin1", WizardField::Opponent, "RivalClan")
            .unwrap();
        wizards
            .set_field("admin1", WizardField::Date, &valid_date())
            .unwrap();
        wizards
            .set_field("admin1", WizardField::Time, "20:30")
            .unwrap();

        let params = wizards.complete("admin1").unwrap();
        assert_eq!(params.team_size, 8);
        assert_eq!(params.format, WarFormat::Bo3);
        assert_eq!(params.opponent, "RivalClan");
        assert!(params.start_display.contains("8:30 PM"));
        assert_eq!(params.timezone, "America/New_York");

        // one-shot: a second complete finds nothing
        assert!(matches!(
            wizards.complete("admin1"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn out_of_domain_values_leave_the_session_untouched() {
        let wizards = sessions();
        wizards.start("admin1");

        assert!(matches!(
            wizards.set_field("admin1", WizardField::TeamSize, "9"),
            Err(Error::InvalidFieldValue(_))
        ));
        assert!(matches!(
            wizards.set_field("admin1", WizardField::Format, "bo4"),
            Err(Error::InvalidFieldValue(_))
        ));
        assert!(matches!(
            wizards.set_field("admin1", WizardField::Time, "12:00"),
            Err(Error::InvalidFieldValue(_))
        ));
        assert!(matches!(
            wizards.set_field("admin1", WizardField::Time, "19:45"),
            Err(Error::InvalidFieldValue(_))
        ));
        assert!(matches!(
            wizards.set_field("admin1", WizardField::Date, "never"),
            Err(Error::InvalidFieldValue(_))
        ));

        let err = wizards.complete("admin1").unwrap_err();
        assert!(matches!(err, Error::IncompleteWizard(_)));
    }

    #[test]
    fn free_text_time_override_is_accepted() {
        let wizards = sessions();
        wizards.start("admin1");
        let session = wizards
            .set_field("admin1", WizardField::Time, "whenever EU wakes up")
            .unwrap();
        assert_eq!(
            session.time,
            Some(StartTime::Override("whenever EU wakes up".into()))
        );
    }

    #[test]
    fn restart_replaces_the_previous_session() {
        let wizards = sessions();
        wizards.start("admin1");
        wizards
            .set_field("admin1", WizardField::Opponent, "RivalClan")
            .unwrap();
        wizards.attach_surface("admin1", "surface-1");

        let fresh = wizards.start("admin1");
        assert!(fresh.missing_fields().contains(&"opponent"));
        assert_eq!(fresh.surface_id, None);
        assert_eq!(wizards.active_count(), 1);

        wizards.attach_surface("admin1", "surface-2");
        let session = wizards
            .set_field("admin1", WizardField::Format, "BO5")
            .unwrap();
        assert_eq!(session.surface_id.as_deref(), Some("surface-2"));
    }

    #[test]
    fn cancel_is_idempotent() {
        let wizards = sessions();
        wizards.cancel("admin1");
        wizards.start("admin1");
        wizards.cancel("admin1");
        wizards.cancel("admin1");
        assert_eq!(wizards.active_count(), 0);
    }

    #[test]
    fn sweep_evicts_only_idle_sessions() {
        let wizards = sessions();
        wizards.start("fresh");
        wizards.start("stale");
        wizards.age_session("stale", Duration::seconds(1800));

        assert_eq!(wizards.sweep(), 1);
        assert_eq!(wizards.active_count(), 1);
        assert!(wizards.complete("fresh").is_err()); // still present, just incomplete
    }
}
