//! The State Store's error taxonomy (spec §7), layered on top of
//! [`driftmgr_backend::BackendError`].

use driftmgr_backend::BackendError;

use crate::validator::ValidationIssue;

#[derive(thiserror::Error, Debug)]
pub enum StateStoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("state failed validation: {0:?}")]
    Validation(Vec<ValidationIssue>),

    #[error("resource {0} not found")]
    ResourceNotFound(String),

    #[error("resource {0} already present")]
    DuplicateResource(String),

    #[error("address {0} is not a valid two-part or indexed resource address")]
    InvalidAddress(String),

    #[error("move target {0} already exists")]
    MoveTargetExists(String),

    #[error("state version {0} not found")]
    VersionNotFound(String),

    #[error("exceeded max_retries ({0}) reconciling a precondition conflict")]
    RetriesExhausted(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
