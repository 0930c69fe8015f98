//! The Backend's logical error taxonomy. Transient failures (timeouts,
//! 5xx responses) are returned verbatim by wrapping the underlying SDK
//! error; they are the caller's concern to retry, typically via
//! [`crate::retry::Retry`].

use crate::types::LockInfo;

/// Errors a [`crate::Backend`] implementation may return.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// The requested object, version, or workspace does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lock record already exists for this state key.
    #[error("already locked by {lock_info:?}")]
    AlreadyLocked { lock_info: LockInfo },

    /// A conditional write (content hash, generation, lease) lost the race
    /// against a concurrent writer.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The backend rejected the credentials or permissions presented.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend could not be reached, or returned a retryable error.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The operation exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// This backend instance does not support the requested capability
    /// (e.g. workspace operations on a backend configured without them).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The lock id presented to `unlock` does not match any lock this
    /// backend issued.
    #[error("unknown lock id: {0}")]
    UnknownLockId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
}

impl BackendError {
    /// Whether this error represents a transient condition worth retrying
    /// with backoff, per spec: `BackendUnavailable` / `Timeout`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::BackendUnavailable(_) | BackendError::Timeout(_))
    }
}
