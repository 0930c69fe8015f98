//! Types and helpers shared by every DriftMgr crate: the dynamic attribute
//! value tree, canonical JSON hashing, and process-wide metric names.

pub mod canonical;
pub mod metrics;
pub mod value;

pub use value::{AttributeMap, Value};
