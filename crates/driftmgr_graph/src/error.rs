//! The Dependency Graph's error taxonomy (spec §7).

#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[error("dependency cycle detected: {0}")]
    CycleDetected(String),

    #[error("address {0} is not present in the graph")]
    UnknownAddress(String),
}
