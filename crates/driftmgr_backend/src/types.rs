//! Shared value types for the [`crate::Backend`] capability: the wire shape
//! of a pulled/pushed state blob, lock records, version metadata, and
//! backend self-description.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The default workspace. Always present; cannot be created or deleted.
pub const DEFAULT_WORKSPACE: &str = "default";

/// A workspace name, validated only by the backend that resolves it to a
/// storage key (the core never rejects a workspace name on its own).
pub type WorkspaceName = String;

/// The opaque bytes of a Terraform state object as the backend sees them,
/// plus the metadata the backend already had lying around from the object
/// store (so the State Store doesn't need a second round-trip just to learn
/// a serial it can get from object metadata).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateData {
    /// Raw JSON bytes of the state document.
    pub bytes: Vec<u8>,
    /// Serial recorded as object metadata, if the backend stores it there.
    pub serial: Option<u64>,
    /// Lineage recorded as object metadata, if the backend stores it there.
    pub lineage: Option<String>,
}

impl StateData {
    /// The spec-mandated empty initial state returned by `pull` when the
    /// backing object does not exist: `version=4, serial=0, data={}`.
    pub fn empty_initial() -> Self {
        let doc = serde_json::json!({
            "version": 4,
            "terraform_version": "",
            "serial": 0,
            "lineage": "",
            "outputs": {},
            "resources": [],
        });
        Self {
            bytes: serde_json::to_vec(&doc).expect("static json always serializes"),
            serial: Some(0),
            lineage: None,
        }
    }
}

/// Identity and provenance of a held lock, written atomically by the
/// holder. Conflicting acquirers read this back to report who holds it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique identifier for this lock record, assigned by the holder.
    pub id: String,
    /// Storage key (state path) the lock guards.
    pub path: String,
    /// Terraform-style operation name (e.g. `"OperationTypeApply"`).
    pub operation: String,
    /// Free-form identity of the process/user holding the lock.
    pub who: String,
    /// Terraform version of the holder, for diagnostics only.
    pub version: String,
    /// When the lock was created.
    pub created: DateTime<Utc>,
    /// Free-form annotation supplied by the holder.
    pub info: String,
}

/// Historical snapshot metadata surfaced by `get_versions`/`get_version`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVersion {
    /// Backend-assigned version identifier (native or synthesized).
    pub id: String,
    /// The `serial` recorded in that version's state document.
    pub serial: u64,
    /// When this version was written.
    pub created: DateTime<Utc>,
    /// Content checksum (hex-encoded SHA-256 of the canonical bytes).
    pub checksum: String,
    /// Size in bytes of the version's state document.
    pub size: u64,
    /// Whether this is the current (latest) version.
    pub is_latest: bool,
    /// Free-form description, if the backend or caller supplied one.
    pub description: String,
}

/// Which capability-set variant a `Backend` implementation satisfies, per
/// spec §9's "small tagged-variant dispatch" guidance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Object store with an external conditional-write lock table (S3 + DynamoDB).
    ObjectStoreWithLockTable,
    /// Blob store whose lease IS the lock (Azure Blob).
    BlobWithLease,
    /// Object store with native generation numbers, no external lock table (GCS).
    VersionedObjectStore,
    /// Local filesystem with a lock file and per-write backups.
    Local,
}

/// Self-description a backend reports so callers (and the State Store) can
/// make capability-aware decisions without downcasting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendMetadata {
    /// Which variant this instance is.
    pub kind: BackendKind,
    /// Whether `lock`/`unlock` are meaningful for this instance.
    pub supports_locking: bool,
    /// Whether `get_versions`/`get_version` return real history.
    pub supports_versions: bool,
    /// Whether workspace operations are implemented for this instance.
    ///
    /// Per spec §9 open question (b): some backends in the source declare
    /// workspace support without a complete implementation. Here it is a
    /// plain per-instance boolean; operations on an instance that reports
    /// `false` return [`crate::BackendError::Unsupported`].
    pub supports_workspaces: bool,
    /// Currently selected workspace.
    pub workspace: WorkspaceName,
    /// The storage key the current workspace resolves to.
    pub state_key: String,
    /// Name of the external lock table, if this kind uses one.
    pub lock_table: Option<String>,
    /// Free-form backend configuration, echoed back for diagnostics.
    pub configuration: BTreeMap<String, String>,
}
