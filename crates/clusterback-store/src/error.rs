//! Version store error types.

use thiserror::Error;

/// Result type for version store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during version store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Version not found.
    #[error("Version not found: {0}")]
    NotFound(String),

    /// Git error.
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Store contents are inconsistent (e.g. a commit without a payload).
    #[error("Version store corrupted: {0}")]
    Corrupted(String),

    /// Operation failed.
    #[error("Version store operation failed: {0}")]
    OperationFailed(String),

    /// Lock was poisoned (another thread panicked while holding the lock)
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::OperationFailed(message.into())
    }

    /// Whether this error means the requested version does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
