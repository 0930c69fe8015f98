//! Metric names updated in place by the components that own them. No
//! exporter lives in this workspace; whatever process embeds DriftMgr wires
//! these into its own `metrics` recorder.

/// Cache hits in the State Store's state cache.
pub const DRIFTMGR_STATE_CACHE_HITS: &str = "driftmgr_state_cache_hits";

/// Cache misses in the State Store's state cache.
pub const DRIFTMGR_STATE_CACHE_MISSES: &str = "driftmgr_state_cache_misses";

/// Entries evicted by the cache's background sweeper.
pub const DRIFTMGR_STATE_CACHE_EVICTIONS: &str = "driftmgr_state_cache_evictions";

/// Locks currently held across all backends known to this process.
pub const DRIFTMGR_ACTIVE_LOCKS: &str = "driftmgr_active_locks";

/// Drift items found in the most recent run, labeled by severity.
pub const DRIFTMGR_DRIFT_ITEMS_LOW: &str = "driftmgr_drift_items_low";
pub const DRIFTMGR_DRIFT_ITEMS_MEDIUM: &str = "driftmgr_drift_items_medium";
pub const DRIFTMGR_DRIFT_ITEMS_HIGH: &str = "driftmgr_drift_items_high";
pub const DRIFTMGR_DRIFT_ITEMS_CRITICAL: &str = "driftmgr_drift_items_critical";

/// Number of backups currently retained by a `BackupManager`.
pub const DRIFTMGR_BACKUP_COUNT: &str = "driftmgr_backup_count";
