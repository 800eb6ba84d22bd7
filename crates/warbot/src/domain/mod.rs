pub mod wars;
pub mod wizard;

use thiserror::Error;
pub use wars::*;
pub use wizard::*;

/// Expected, recoverable failures surfaced to the invoking actor. Every
/// variant renders a message suitable for direct display; internal ids and
/// backtraces stay out of the text.
#[derive(Error, Debug)]
pub enum Error {
    #[error("war not found: {0}")]
    NotFound(String),
    #[error("that is not possible while the war is {0}")]
    InvalidState(String),
    #[error("not enough sign-ups: {available} in the pool, {needed} needed")]
    InsufficientPool { available: usize, needed: usize },
    #[error("could not match '{0}' to anyone in the sign-up pool")]
    UnresolvedParticipant(String),
    #[error("{0}")]
    InvalidFieldValue(String),
    #[error("the wizard is missing: {0}")]
    IncompleteWizard(String),
    #[error("this war is already {0} and can no longer change")]
    TerminalState(String),
    #[error("you do not have permission to do that")]
    Unauthorized,
    #[error("problem querying db: {0}")]
    Db(#[from] sqlx::Error),
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Invariant violation in our own state. Not user-recoverable; callers
    /// log it loudly and drop the operation.
    #[error("roster invariant violated: {0}")]
    RosterInvariant(String),
}
