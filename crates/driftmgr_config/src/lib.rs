#![warn(missing_docs)]
//! Configuration description, dumping, and loading for DriftMgr.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//!
//! use driftmgr_config::dumping::{ser_param, SerializeConfig};
//! use driftmgr_config::{ParamPath, SerializedParam};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
//! struct CacheConfig {
//!     max_size: usize,
//! }
//!
//! impl SerializeConfig for CacheConfig {
//!     fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
//!         BTreeMap::from([ser_param("max_size", &self.max_size, "Maximum cache entries.")])
//!     }
//! }
//!
//! let dumped = CacheConfig { max_size: 100 }.dump();
//! assert_eq!(dumped["max_size"].value, serde_json::json!(100));
//! ```

pub mod dumping;
pub mod loading;

/// A nested path of a configuration parameter, e.g. `backend.max_retries`.
pub type ParamPath = String;
/// A human-readable description of a configuration parameter.
pub type Description = String;

/// A description and serialized JSON value of a configuration parameter.
#[derive(Clone, serde::Serialize, serde::Deserialize, Debug, PartialEq)]
pub struct SerializedParam {
    /// The description of the parameter.
    pub description: Description,
    /// The value of the parameter.
    pub value: serde_json::Value,
}

/// Errors encountered while describing, dumping, or loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("environment variable {name} could not be parsed as the expected type: {reason}")]
    BadEnvValue { name: String, reason: String },
    #[error(transparent)]
    Validation(#[from] validator::ValidationErrors),
}
