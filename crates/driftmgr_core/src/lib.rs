//! The composition root: wires a [`driftmgr_backend::Backend`] and a
//! [`driftmgr_drift::CloudAdapter`] into a [`StateStore`], a
//! [`BackupManager`], a [`DriftEngine`], a [`Remediator`], and a
//! [`Simulator`] behind one [`DriftMgr`] facade. The [`DependencyGraph`] is
//! deliberately not stored here: it is cheap to rebuild and is constructed
//! fresh from the current state on every call that needs it, per spec
//! §4.4's graph-per-run contract.

pub mod config;
pub mod error;
pub mod logging;

use std::sync::Arc;

use driftmgr_backend::Backend;
use driftmgr_drift::{
    CloudAdapter, DriftEngine, DriftItem, DriftReport, RemediationLog, RemediationStrategy, Remediator,
    RollbackData, SimulatedDriftKind, Simulator,
};
use driftmgr_graph::DependencyGraph;
use driftmgr_state::{BackupManager, BackupMetadata, StateStore, TerraformState, Validator};
use validator::Validate;

pub use config::{BackendConfig, BackendType, BackupManagerConfig, DriftEngineConfig, DriftMgrConfig, StateStoreConfig};
pub use error::DriftMgrError;
pub use logging::init_tracing;

/// Identity reported to the backend as the holder of any lock this
/// instance acquires.
const DEFAULT_WHO: &str = "driftmgr_core";

/// The facade: one value per logically independent state backend,
/// constructed once and shared (behind an `Arc`, typically) across
/// whichever API surface (CLI, server, test) drives it.
pub struct DriftMgr {
    state_store: Arc<StateStore>,
    backup_manager: Arc<BackupManager>,
    drift_engine: DriftEngine,
    remediator: Remediator,
    simulator: Simulator,
}

impl DriftMgr {
    /// Wires every component from `config`, an already-constructed
    /// [`Backend`], and an already-constructed [`CloudAdapter`]. Neither
    /// dependency is built here: which concrete backend or adapter to use
    /// is a deployment decision made by the caller, not by this facade.
    pub fn new(
        config: &DriftMgrConfig,
        backend: Arc<dyn Backend>,
        adapter: Arc<dyn CloudAdapter>,
    ) -> Result<Self, DriftMgrError> {
        config.validate().map_err(driftmgr_config::ConfigError::from)?;

        let cache = Arc::new(driftmgr_state::StateCache::new(config.state_store.to_cache_config()));
        let validator = Validator::with_default_rules().strict(config.state_store.strict_validation);
        let state_store = Arc::new(StateStore::with_retry_config(
            backend,
            cache,
            validator,
            DEFAULT_WHO.to_owned(),
            config.backend.to_retry_config(),
        ));

        let encryption_key = config.backup_manager.decode_encryption_key()?;
        let backup_manager =
            Arc::new(BackupManager::open(config.backup_manager.to_backup_config(), encryption_key)?);

        let drift_engine =
            DriftEngine::new(state_store.clone(), adapter.clone(), config.drift_engine.to_engine_config());
        let remediator = Remediator::new(state_store.clone(), adapter.clone(), backup_manager.clone());
        let simulator = Simulator::new(state_store.clone(), adapter, Vec::new());

        Ok(Self { state_store, backup_manager, drift_engine, remediator, simulator })
    }

    /// The wired [`StateStore`], for callers that need direct state
    /// operations (import, move, workspace management, ...) beyond what
    /// this facade re-exposes.
    pub fn state_store(&self) -> &Arc<StateStore> {
        &self.state_store
    }

    /// The wired [`BackupManager`].
    pub fn backup_manager(&self) -> &Arc<BackupManager> {
        &self.backup_manager
    }

    /// Builds a fresh [`DependencyGraph`] from the current state stored
    /// under `key`. Not cached: a graph reflects one snapshot in time and
    /// a stored graph would silently drift from state mutations made
    /// between calls.
    pub async fn dependency_graph(&self, key: &str) -> Result<DependencyGraph, DriftMgrError> {
        let state = self.state_store.get_state(key).await?;
        Ok(DependencyGraph::build(&state)?)
    }

    /// Runs drift detection for the state stored under `key`, optionally
    /// streaming per-`(provider, kind)` progress to `progress`.
    pub async fn detect_drift(
        &self,
        key: &str,
        progress: Option<tokio::sync::mpsc::UnboundedSender<driftmgr_drift::DiscoveryProgress>>,
    ) -> Result<DriftReport, DriftMgrError> {
        Ok(self.drift_engine.detect_drift(key, progress).await?)
    }

    /// Remediates `items` (typically the contents of a prior
    /// [`DriftReport`]) against the state stored under `key`, using
    /// `strategy` (falling back to the configured default when `None`).
    pub async fn remediate(
        &self,
        key: &str,
        items: &[DriftItem],
        strategy: Option<RemediationStrategy>,
        default_strategy: RemediationStrategy,
    ) -> Result<RemediationLog, DriftMgrError> {
        Ok(self.remediator.remediate(key, items, strategy.unwrap_or(default_strategy)).await?)
    }

    /// Applies a synthetic out-of-band change to a live resource managed
    /// under `key`, for exercising detection and remediation without
    /// waiting on a real external actor. See [`Simulator::simulate_drift`].
    pub async fn simulate_drift(
        &self,
        key: &str,
        provider: &str,
        kind: SimulatedDriftKind,
    ) -> Result<(SimulatedDriftKind, String, RollbackData), DriftMgrError> {
        Ok(self.simulator.simulate_drift(key, provider, kind).await?)
    }

    /// Reverses a previously simulated drift. See [`Simulator::rollback`].
    pub async fn rollback_simulated_drift(&self, rollback_data: RollbackData) -> Result<(), DriftMgrError> {
        Ok(self.simulator.rollback(rollback_data).await?)
    }

    /// Convenience snapshot: reads the state stored under `key` and takes
    /// a named, described backup of it immediately, independent of the
    /// automatic pre-remediation snapshot `remediate` already takes.
    pub async fn backup_now(
        &self,
        key: &str,
        id: &str,
        description: &str,
    ) -> Result<BackupMetadata, DriftMgrError> {
        let state: Arc<TerraformState> = self.state_store.get_state(key).await?;
        Ok(self.backup_manager.create_backup(id, &state, description, Default::default())?)
    }
}

#[cfg(test)]
mod driftmgr_test {
    use std::sync::Arc;

    use driftmgr_test_utils::{sample_state_with_dependencies, InMemoryBackend, InMemoryCloudAdapter};

    use super::*;

    async fn seeded_driftmgr(tmp: &std::path::Path) -> DriftMgr {
        let mut config = DriftMgrConfig::default();
        config.backup_manager.backup_dir = tmp.join("backups");

        let backend = Arc::new(InMemoryBackend::new());
        let state = sample_state_with_dependencies();
        let adapter = Arc::new(InMemoryCloudAdapter::mirroring(&state));

        let driftmgr = DriftMgr::new(&config, backend, adapter).expect("wiring should succeed");
        driftmgr.state_store().put_state("terraform.tfstate", state).await.expect("seed state");
        driftmgr
    }

    #[tokio::test]
    async fn wires_every_component_and_round_trips_state() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let driftmgr = seeded_driftmgr(tmp.path()).await;

        let state = driftmgr.state_store().get_state("terraform.tfstate").await.expect("get_state");
        assert!(!state.resources.is_empty());
    }

    #[tokio::test]
    async fn dependency_graph_is_rebuilt_from_current_state() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let driftmgr = seeded_driftmgr(tmp.path()).await;

        let graph = driftmgr.dependency_graph("terraform.tfstate").await.expect("graph should build");
        assert!(!graph.is_empty());
    }

    #[tokio::test]
    async fn detect_drift_reports_no_items_when_live_mirrors_state() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let driftmgr = seeded_driftmgr(tmp.path()).await;

        let report = driftmgr.detect_drift("terraform.tfstate", None).await.expect("detect_drift");
        assert!(report.items.is_empty());
    }

    #[tokio::test]
    async fn backup_now_creates_a_retrievable_backup() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let driftmgr = seeded_driftmgr(tmp.path()).await;

        let metadata =
            driftmgr.backup_now("terraform.tfstate", "manual-1", "ad-hoc snapshot").await.expect("backup_now");
        assert_eq!(metadata.id, "manual-1");
    }
}
