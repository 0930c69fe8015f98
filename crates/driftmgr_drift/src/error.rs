//! Error taxonomies for the Drift Engine and Simulator (spec §7).

#[derive(thiserror::Error, Debug)]
pub enum DriftError {
    #[error(transparent)]
    State(#[from] driftmgr_state::StateStoreError),

    #[error(transparent)]
    Graph(#[from] driftmgr_graph::error::GraphError),

    #[error("unknown provider {0}")]
    UnknownProvider(String),

    #[error("adapter call failed: {0}")]
    AdapterFailure(String),

    #[error("remediation failed and rollback also failed; operator attention required: {0}")]
    NeedsOperatorAttention(String),

    #[error("discovery run exceeded its deadline")]
    Timeout,

    #[error("discovery run was cancelled")]
    Cancelled,
}

#[derive(thiserror::Error, Debug)]
pub enum SimulatorError {
    #[error(transparent)]
    Drift(#[from] DriftError),

    #[error("no resource of the requested kind was found to simulate drift on")]
    NoEligibleTarget,

    #[error("rollback data did not match any known action shape")]
    InvalidRollbackData,
}
