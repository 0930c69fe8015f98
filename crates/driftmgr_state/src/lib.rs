//! The State Store (§4.2): Terraform state parsing, validation, an
//! LRU+TTL cache, and the high-level state operations, plus the
//! `BackupManager` (§4.3), which operates directly on the
//! [`model::TerraformState`] values the State Store produces.

pub mod backup;
pub mod cache;
pub mod error;
pub mod model;
pub mod parser;
pub mod store;
pub mod validator;

pub use backup::{BackupConfig, BackupManager, BackupMetadata};
pub use cache::{CacheConfig, StateCache};
pub use error::StateStoreError;
pub use model::{Instance, OutputValue, Resource, ResourceMode, TerraformState};
pub use store::{StateComparison, StateStore};
pub use validator::{Severity, Validator};
