//! HAProxy client errors

use thiserror::Error;

/// Errors returned by configuration transactions and the runtime API
#[derive(Debug, Error)]
pub enum HAProxyError {
    /// Filesystem or socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Referenced section or child object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation rejected by the configuration model (e.g. rule index out of range)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A transaction is already open
    #[error("Transaction {0} is already active")]
    TransactionActive(String),

    /// Commit or dispose called with a handle that is not the active transaction
    #[error("Transaction {0} is not the active transaction")]
    TransactionMismatch(String),

    /// Runtime API answered with an error message
    #[error("Runtime API error: {0}")]
    Runtime(String),
}

impl HAProxyError {
    /// True for the `NotFound` sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
