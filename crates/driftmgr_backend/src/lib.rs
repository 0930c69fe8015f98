//! The `Backend` capability: durable, lockable storage of opaque Terraform
//! state blobs, with workspaces and version history, behind one contract
//! satisfied by four concrete implementations.

pub mod backends;
pub mod error;
pub mod pool;
pub mod retry;
pub mod types;

mod backend;

pub use backend::{Backend, Capability};
pub use error::BackendError;
pub use types::{
    BackendMetadata, BackendKind, LockInfo, StateData, StateVersion, WorkspaceName, DEFAULT_WORKSPACE,
};
