pub mod config;
pub mod domain;
pub mod infra;
pub mod startup;

pub use config::*;
pub use domain::{
    CreateWar, Error as WarbotError, SignalEvent, SignalEventKind, WarCoordinator, WarStore,
    WizardField, WizardSessions,
};
pub use infra::db::*;
pub use infra::identity::{Authorizer, IdentityResolver, MentionResolver, RoleAuthorizer};
pub use infra::ledger::{Ledger, LedgerClient};
pub use infra::notifier::{NotificationKind, Notifier, SignupBoard};
pub use startup::*;
