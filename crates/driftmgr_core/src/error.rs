//! The composition root's aggregate error type: every sub-component's
//! error taxonomy collapsed behind one enum so callers of [`crate::DriftMgr`]
//! handle a single error type regardless of which wired component failed.

#[derive(thiserror::Error, Debug)]
pub enum DriftMgrError {
    #[error(transparent)]
    Backend(#[from] driftmgr_backend::BackendError),

    #[error(transparent)]
    State(#[from] driftmgr_state::StateStoreError),

    #[error(transparent)]
    Backup(#[from] driftmgr_state::backup::BackupError),

    #[error(transparent)]
    Graph(#[from] driftmgr_graph::GraphError),

    #[error(transparent)]
    Drift(#[from] driftmgr_drift::DriftError),

    #[error(transparent)]
    Simulator(#[from] driftmgr_drift::SimulatorError),

    #[error(transparent)]
    Config(#[from] driftmgr_config::ConfigError),

    /// A configuration value was structurally valid JSON but semantically
    /// wrong in a way `validator::Validate` cannot express, e.g. an
    /// encryption key that isn't 32 bytes once hex-decoded.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
