//! Domain error taxonomy.
//!
//! Transient external failures are retried on the next natural trigger and
//! never cached as terminal. Persistence failures roll the surrounding
//! transaction back and propagate to the caller.

use crate::types::LogId;

pub type Result<T> = std::result::Result<T, MixError>;

#[derive(Debug, thiserror::Error)]
pub enum MixError {
    /// Transient failure talking to an external service (reputation source,
    /// match log source). Includes rate-limit responses.
    #[error("external service failure: {0}")]
    External(String),

    /// Operation rejected up front; no state was changed.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The log was already imported by this process instance.
    #[error("log {0} already imported")]
    AlreadyImported(LogId),

    /// Transactional write failure; the transaction rolled back.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MixError {
    pub fn invalid(reason: impl Into<String>) -> MixError {
        MixError::InvalidOperation(reason.into())
    }

    /// Transient errors are safe to retry without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, MixError::External(_) | MixError::Http(_))
    }
}
