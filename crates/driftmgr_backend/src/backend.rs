//! The `Backend` capability contract (spec §4.1): durable, lockable storage
//! of opaque state blobs, with workspaces and version history.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::types::{BackendMetadata, LockInfo, StateData, StateVersion, WorkspaceName};

/// A small tagged-capability bitset, per spec §9's "capability set
/// `{pull, push, lock, unlock, versions, workspaces, validate, metadata}`"
/// guidance. Every [`Backend`] method exists on every implementation; this
/// type is what [`Backend::capabilities`] reports so callers can check
/// support without attempting an operation just to learn it is unsupported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capability {
    pub locking: bool,
    pub versions: bool,
    pub workspaces: bool,
}

/// Durable, lockable storage of an opaque Terraform state blob, with
/// workspace selection and (where supported) version history.
///
/// Implementations: object-store+lock-table (S3/DynamoDB), blob+lease
/// (Azure), versioned object store (GCS), and local filesystem.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the latest state bytes for the currently selected workspace.
    /// If the backing object does not exist, returns
    /// [`StateData::empty_initial`] rather than an error.
    async fn pull(&self) -> Result<StateData, BackendError>;

    /// Atomically replaces the latest state object for the currently
    /// selected workspace. Implementations must use a conditional write
    /// (content hash, generation number, or lease) so two concurrent pushes
    /// never silently clobber each other; the loser observes
    /// [`BackendError::PreconditionFailed`].
    async fn push(&self, state: StateData) -> Result<(), BackendError>;

    /// Acquires the lock for the currently selected workspace's state key.
    /// Returns the assigned lock id (the caller's `info.id` concatenated
    /// with a monotonic nanosecond timestamp) on success, or
    /// [`BackendError::AlreadyLocked`] carrying the existing holder's
    /// [`LockInfo`] on conflict.
    async fn lock(&self, info: LockInfo) -> Result<String, BackendError>;

    /// Releases the lock identified by `lock_id`. No-op if this backend
    /// instance was not configured with locking. Only the exact id
    /// returned by [`Backend::lock`] is accepted; any other id is rejected
    /// with [`BackendError::UnknownLockId`] per spec §9 open question (c).
    async fn unlock(&self, lock_id: &str) -> Result<(), BackendError>;

    /// Reads back the [`LockInfo`] of the current holder, if any.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>, BackendError>;

    /// Lists known versions of the current workspace's state, newest first.
    /// Backends without native object versioning return a synthetic
    /// single-entry list reflecting the current state.
    async fn get_versions(&self) -> Result<Vec<StateVersion>, BackendError>;

    /// Fetches the raw bytes of a specific version by id.
    async fn get_version(&self, version_id: &str) -> Result<StateData, BackendError>;

    /// Lists known workspace names. Returns
    /// [`BackendError::Unsupported`] if this instance does not support
    /// workspaces.
    async fn list_workspaces(&self) -> Result<Vec<WorkspaceName>, BackendError>;

    /// Selects `workspace` as the target of subsequent `pull`/`push`/`lock`
    /// calls. Returns [`BackendError::NotFound`] if the workspace does not
    /// exist and is not `"default"`.
    async fn select_workspace(&self, workspace: WorkspaceName) -> Result<(), BackendError>;

    /// Creates a new, empty workspace. Rejects the default workspace name.
    async fn create_workspace(&self, workspace: WorkspaceName) -> Result<(), BackendError>;

    /// Deletes a workspace. Rejects the default workspace name: it "cannot
    /// be deleted" per spec §3.
    async fn delete_workspace(&self, workspace: WorkspaceName) -> Result<(), BackendError>;

    /// Checks that this backend instance is reachable and correctly
    /// configured (credentials, bucket/container existence, lock table
    /// existence) without mutating anything.
    async fn validate(&self) -> Result<(), BackendError>;

    /// Self-description: kind, capability booleans, currently selected
    /// workspace, resolved state key, and echoed configuration.
    fn get_metadata(&self) -> BackendMetadata;

    /// The capability bitset implied by [`Backend::get_metadata`].
    fn capabilities(&self) -> Capability {
        let meta = self.get_metadata();
        Capability {
            locking: meta.supports_locking,
            versions: meta.supports_versions,
            workspaces: meta.supports_workspaces,
        }
    }
}

/// Resolves the storage key for a non-default workspace, per spec §6:
/// `<dir(key)>/env:/<workspace>/<base(key)>`.
pub fn workspace_key(base_key: &str, workspace: &str) -> String {
    if workspace == crate::types::DEFAULT_WORKSPACE {
        return base_key.to_owned();
    }
    let (dir, base) = match base_key.rsplit_once('/') {
        Some((dir, base)) => (dir, base),
        None => ("", base_key),
    };
    if dir.is_empty() {
        format!("env:/{workspace}/{base}")
    } else {
        format!("{dir}/env:/{workspace}/{base}")
    }
}

#[cfg(test)]
mod backend_test {
    use super::*;

    #[test]
    fn default_workspace_key_is_unchanged() {
        assert_eq!(workspace_key("terraform.tfstate", "default"), "terraform.tfstate");
    }

    #[test]
    fn non_default_workspace_key_is_namespaced() {
        assert_eq!(
            workspace_key("prod/terraform.tfstate", "staging"),
            "prod/env:/staging/terraform.tfstate"
        );
    }

    #[test]
    fn non_default_workspace_key_with_no_directory() {
        assert_eq!(workspace_key("terraform.tfstate", "staging"), "env:/staging/terraform.tfstate");
    }
}
