//! Herald error type — one enum shared across all crates.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HeraldError>;

/// All errors Herald can produce.
#[derive(Debug, Error)]
pub enum HeraldError {
    /// Invalid scheduling definition (past time, empty targeting rule, bad input).
    #[error("validation error: {0}")]
    Validation(String),

    /// A targeting rule resolved to zero usable recipients.
    #[error("no recipients resolved")]
    NoRecipients,

    /// Operation not allowed in the notification's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Persistence layer failure.
    #[error("store error: {0}")]
    Store(String),

    /// Delivery channel failure (per-recipient send, platform API error).
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration load/parse failure.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeraldError {
    /// Short machine-readable tag, used by the gateway for error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            HeraldError::Validation(_) => "validation",
            HeraldError::NoRecipients => "no_recipients",
            HeraldError::InvalidState(_) => "invalid_state",
            HeraldError::Store(_) => "store",
            HeraldError::Channel(_) => "channel",
            HeraldError::Config(_) => "config",
            HeraldError::Io(_) => "io",
        }
    }
}
