//! A single resource node in the dependency graph (spec §3).

use serde::{Deserialize, Serialize};

/// One resource instance's position in the dependency graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// `type.name` or `type.name[index]`.
    pub address: String,
    pub r#type: String,
    pub name: String,
    pub provider: String,
    pub module: Option<String>,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    /// Topological rank; `-1` until assigned by level computation.
    pub level: i64,
}

impl DependencyNode {
    pub fn new(address: String, r#type: String, name: String, provider: String, module: Option<String>) -> Self {
        Self { address, r#type, name, provider, module, dependencies: Vec::new(), dependents: Vec::new(), level: -1 }
    }
}
