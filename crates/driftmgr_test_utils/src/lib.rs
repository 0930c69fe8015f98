//! Shared test fixtures for every DriftMgr crate: builders for sample
//! [`driftmgr_state::model::TerraformState`] values, a deterministic
//! in-memory [`driftmgr_backend::Backend`], and a deterministic in-memory
//! `CloudAdapter`. Plays the role the teacher's `test_utils`/
//! `papyrus_test_utils` crate plays: keep every other crate's tests short.

mod cloud_adapter;
mod memory_backend;
mod state_fixtures;

pub use cloud_adapter::InMemoryCloudAdapter;
pub use memory_backend::InMemoryBackend;
pub use state_fixtures::{
    lock_info_fixture, resource_fixture, sample_state, sample_state_with_dependencies,
};
