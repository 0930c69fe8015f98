//! Configuration recognized by the composition root (spec §6): one struct
//! per wired component, each describable via [`SerializeConfig`] and
//! checked via [`validator::Validate`], composed into [`DriftMgrConfig`]
//! and loaded with [`driftmgr_config::loading::load_and_process_config`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use driftmgr_config::dumping::{append_sub_config_name, ser_param, SerializeConfig};
use driftmgr_config::{ParamPath, SerializedParam};
use driftmgr_drift::{BlastThresholds, RemediationStrategy};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Which concrete [`driftmgr_backend::Backend`] to construct.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    #[default]
    Local,
    S3,
    Azure,
    Gcs,
}

/// Configuration for the wired [`driftmgr_backend::Backend`].
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackendConfig {
    pub r#type: BackendType,
    pub bucket: String,
    pub key: String,
    pub region: String,
    pub lock_table: String,
    pub encrypt: bool,
    pub profile: String,
    pub role_arn: String,
    pub workspace: String,
    #[validate(range(min = 1))]
    pub max_connections: usize,
    #[validate(range(min = 1))]
    pub max_idle_connections: usize,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    #[validate(range(min = 1))]
    pub max_retries: usize,
    pub retry_delay_millis: u64,
    pub retry_backoff: u32,
    pub lock_timeout_seconds: u64,
    pub lock_retry_delay_millis: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            r#type: BackendType::default(),
            bucket: String::new(),
            key: "terraform.tfstate".to_owned(),
            region: String::new(),
            lock_table: String::new(),
            encrypt: true,
            profile: String::new(),
            role_arn: String::new(),
            workspace: driftmgr_backend::DEFAULT_WORKSPACE.to_owned(),
            max_connections: 10,
            max_idle_connections: 5,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 90,
            max_retries: 3,
            retry_delay_millis: 200,
            retry_backoff: 2,
            lock_timeout_seconds: 600,
            lock_retry_delay_millis: 500,
        }
    }
}

impl SerializeConfig for BackendConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        BTreeMap::from([
            ser_param("type", &self.r#type, "Which storage backend to construct."),
            ser_param("bucket", &self.bucket, "Bucket or container name (S3/Azure/GCS)."),
            ser_param("key", &self.key, "Base object key the state document is stored under."),
            ser_param("region", &self.region, "Cloud region, where the backend requires one."),
            ser_param("lock_table", &self.lock_table, "External lock table name (S3 backend only)."),
            ser_param("encrypt", &self.encrypt, "Request server-side encryption from the backend."),
            ser_param("profile", &self.profile, "Named credentials profile to assume."),
            ser_param("role_arn", &self.role_arn, "IAM role to assume before talking to the backend."),
            ser_param("workspace", &self.workspace, "Workspace selected on construction."),
            ser_param("max_connections", &self.max_connections, "Pool size for concurrent backend calls."),
            ser_param("max_idle_connections", &self.max_idle_connections, "Idle connections the pool retains."),
            ser_param(
                "connection_timeout_seconds",
                &self.connection_timeout_seconds,
                "Deadline for establishing a new backend connection.",
            ),
            ser_param(
                "idle_timeout_seconds",
                &self.idle_timeout_seconds,
                "How long an idle pooled connection is kept before eviction.",
            ),
            ser_param("max_retries", &self.max_retries, "Bound on retries for a single backend or state mutation."),
            ser_param("retry_delay_millis", &self.retry_delay_millis, "Base delay before the first retry."),
            ser_param("retry_backoff", &self.retry_backoff, "Exponential backoff multiplier applied between retries."),
            ser_param("lock_timeout_seconds", &self.lock_timeout_seconds, "TTL before a held lock is considered stale."),
            ser_param(
                "lock_retry_delay_millis",
                &self.lock_retry_delay_millis,
                "Delay between attempts to acquire an already-held lock.",
            ),
        ])
    }
}

impl BackendConfig {
    /// Converts the retry-related fields into the
    /// [`driftmgr_backend::retry::RetryConfig`] the backend retry helper
    /// takes.
    pub fn to_retry_config(&self) -> driftmgr_backend::retry::RetryConfig {
        driftmgr_backend::retry::RetryConfig {
            retry_delay_millis: self.retry_delay_millis,
            retry_backoff: self.retry_backoff,
            max_retries: self.max_retries,
        }
    }
}

/// Configuration for the wired [`driftmgr_state::StateStore`].
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StateStoreConfig {
    pub cache_ttl_seconds: u64,
    #[validate(range(min = 1))]
    pub cache_max_size: usize,
    pub strict_validation: bool,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self { cache_ttl_seconds: 3600, cache_max_size: 100, strict_validation: false }
    }
}

impl SerializeConfig for StateStoreConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        BTreeMap::from([
            ser_param("cache_ttl_seconds", &self.cache_ttl_seconds, "Lifetime of a cached state entry."),
            ser_param("cache_max_size", &self.cache_max_size, "Maximum number of cached state entries."),
            ser_param(
                "strict_validation",
                &self.strict_validation,
                "Treat validation warnings as errors (reject the mutation) instead of just surfacing them.",
            ),
        ])
    }
}

impl StateStoreConfig {
    /// Converts the cache-related fields into the
    /// [`driftmgr_state::CacheConfig`] the cache constructor takes.
    pub fn to_cache_config(&self) -> driftmgr_state::CacheConfig {
        driftmgr_state::CacheConfig {
            max_size: self.cache_max_size,
            ttl: std::time::Duration::from_secs(self.cache_ttl_seconds),
        }
    }
}

/// Configuration for the wired [`driftmgr_state::BackupManager`].
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackupManagerConfig {
    pub backup_dir: PathBuf,
    #[validate(range(min = 1))]
    pub max_backups: usize,
    pub compress: bool,
    pub encrypt: bool,
    /// Hex-encoded 32-byte AES-256-GCM key. Required when `encrypt` is set;
    /// empty otherwise.
    pub encryption_key: String,
}

impl Default for BackupManagerConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(".backups"),
            max_backups: 10,
            compress: true,
            encrypt: false,
            encryption_key: String::new(),
        }
    }
}

impl SerializeConfig for BackupManagerConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        BTreeMap::from([
            ser_param("backup_dir", &self.backup_dir, "Directory backup snapshots are written under."),
            ser_param("max_backups", &self.max_backups, "Number of backups retained per state key before rotation."),
            ser_param("compress", &self.compress, "Gzip-compress backup payloads."),
            ser_param("encrypt", &self.encrypt, "Encrypt backup payloads with AES-256-GCM."),
            ser_param(
                "encryption_key",
                &if self.encryption_key.is_empty() { "" } else { "(sensitive value)" },
                "Hex-encoded 32-byte AES-256-GCM key (required when encrypt is set).",
            ),
        ])
    }
}

impl BackupManagerConfig {
    /// Converts the non-key fields into the
    /// [`driftmgr_state::BackupConfig`] the manager constructor takes.
    pub fn to_backup_config(&self) -> driftmgr_state::BackupConfig {
        driftmgr_state::BackupConfig {
            backup_dir: self.backup_dir.clone(),
            max_backups: self.max_backups,
            compress: self.compress,
            encrypt: self.encrypt,
        }
    }

    /// Decodes [`Self::encryption_key`] into the 32-byte key
    /// [`driftmgr_state::BackupManager::open`] expects. Returns `None` when
    /// the field is empty (backups not encrypted); an empty key with
    /// `encrypt = true` is a configuration error surfaced by the caller.
    pub fn decode_encryption_key(&self) -> Result<Option<[u8; 32]>, crate::error::DriftMgrError> {
        if self.encryption_key.is_empty() {
            return Ok(None);
        }
        let bytes = hex::decode(&self.encryption_key)
            .map_err(|err| crate::error::DriftMgrError::InvalidConfig(format!("backup_manager.encryption_key: {err}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            crate::error::DriftMgrError::InvalidConfig(format!(
                "backup_manager.encryption_key must decode to 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Some(key))
    }
}

/// Configuration for the wired [`driftmgr_drift::DriftEngine`] and the
/// remediation/simulation components built on top of it.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DriftEngineConfig {
    pub providers: Vec<String>,
    #[validate(range(min = 1))]
    pub max_parallel_providers: usize,
    #[validate(range(min = 1))]
    pub max_parallel_kinds: usize,
    #[validate(range(min = 1))]
    pub blast_threshold_medium: usize,
    #[validate(range(min = 1))]
    pub blast_threshold_high: usize,
    pub ignored_fields: Vec<String>,
    pub remediation_strategy: RemediationStrategy,
    pub auto_rollback: bool,
}

impl Default for DriftEngineConfig {
    fn default() -> Self {
        let thresholds = BlastThresholds::default();
        Self {
            providers: Vec::new(),
            max_parallel_providers: 4,
            max_parallel_kinds: 4,
            blast_threshold_medium: thresholds.medium,
            blast_threshold_high: thresholds.high,
            ignored_fields: Vec::new(),
            remediation_strategy: RemediationStrategy::CloudAsTruth,
            auto_rollback: false,
        }
    }
}

impl SerializeConfig for DriftEngineConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        BTreeMap::from([
            ser_param("providers", &self.providers, "Cloud providers to query for live resource state."),
            ser_param(
                "max_parallel_providers",
                &self.max_parallel_providers,
                "Upper bound on providers queried concurrently during discovery.",
            ),
            ser_param(
                "max_parallel_kinds",
                &self.max_parallel_kinds,
                "Upper bound on resource kinds queried concurrently within a provider.",
            ),
            ser_param(
                "blast_threshold_medium",
                &self.blast_threshold_medium,
                "Dependent-resource count at or above which blast radius is classified medium.",
            ),
            ser_param(
                "blast_threshold_high",
                &self.blast_threshold_high,
                "Dependent-resource count at or above which blast radius is classified high.",
            ),
            ser_param("ignored_fields", &self.ignored_fields, "Attribute paths excluded from diffing."),
            ser_param(
                "remediation_strategy",
                &self.remediation_strategy,
                "Default resolution applied when remediating a detected drift.",
            ),
            ser_param(
                "auto_rollback",
                &self.auto_rollback,
                "Automatically restore the prior state version if remediation fails partway through.",
            ),
        ])
    }
}

impl DriftEngineConfig {
    /// Converts this flat, serializable shape into the
    /// [`driftmgr_drift::EngineConfig`] the engine actually takes.
    pub fn to_engine_config(&self) -> driftmgr_drift::EngineConfig {
        driftmgr_drift::EngineConfig {
            providers: self.providers.clone(),
            max_parallel_providers: self.max_parallel_providers,
            max_parallel_kinds: self.max_parallel_kinds,
            blast_thresholds: BlastThresholds {
                medium: self.blast_threshold_medium,
                high: self.blast_threshold_high,
            },
            ignored_fields: self.ignored_fields.clone(),
        }
    }
}

/// The full configuration tree for one [`crate::DriftMgr`] instance.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DriftMgrConfig {
    #[validate]
    pub backend: BackendConfig,
    #[validate]
    pub state_store: StateStoreConfig,
    #[validate]
    pub backup_manager: BackupManagerConfig,
    #[validate]
    pub drift_engine: DriftEngineConfig,
}

impl SerializeConfig for DriftMgrConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        let mut dumped = BTreeMap::new();
        dumped.extend(append_sub_config_name(self.backend.dump(), "backend"));
        dumped.extend(append_sub_config_name(self.state_store.dump(), "state_store"));
        dumped.extend(append_sub_config_name(self.backup_manager.dump(), "backup_manager"));
        dumped.extend(append_sub_config_name(self.drift_engine.dump(), "drift_engine"));
        dumped
    }
}

#[cfg(test)]
mod config_test {
    use validator::Validate;

    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(DriftMgrConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_max_retries_is_rejected() {
        let mut config = DriftMgrConfig::default();
        config.backend.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn dump_prefixes_every_sub_config() {
        let dumped = DriftMgrConfig::default().dump();
        assert!(dumped.contains_key("backend.max_retries"));
        assert!(dumped.contains_key("state_store.cache_max_size"));
        assert!(dumped.contains_key("backup_manager.max_backups"));
        assert!(dumped.contains_key("drift_engine.max_parallel_providers"));
    }

    #[test]
    fn encryption_key_is_masked_in_dump() {
        let mut config = DriftMgrConfig::default();
        config.backup_manager.encryption_key = "deadbeef".repeat(8);
        let dumped = config.dump();
        assert_ne!(dumped["backup_manager.encryption_key"].value, serde_json::json!(config.backup_manager.encryption_key));
    }
}
