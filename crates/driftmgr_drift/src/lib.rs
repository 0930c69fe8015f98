//! The Drift Engine and Simulator (spec §4.5, §4.6): discovers live cloud
//! resources, classifies and scores divergence from Terraform state, and
//! drives remediation and controlled drift simulation.

pub mod adapter;
pub mod engine;
pub mod error;
pub mod identity;
pub mod remediation;
pub mod simulator;

pub use adapter::{CloudAction, CloudAdapter, LiveResource, LiveResourceStream};
pub use engine::{BlastThresholds, DiscoveryProgress, DriftEngine, DriftItem, DriftKind, DriftReport, EngineConfig, Impact};
pub use error::{DriftError, SimulatorError};
pub use remediation::{CloudActionRecord, RemediationLog, RemediationStep, RemediationStrategy, Remediator};
pub use simulator::{RollbackData, SimulatedDriftKind, Simulator};
