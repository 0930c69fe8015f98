//! The Drift Simulator (spec §4.6): deliberately introduces a controlled
//! divergence against a live cloud resource, for exercising the Drift
//! Engine and Remediator end to end without waiting for real drift.

use std::sync::Arc;

use driftmgr_common::{AttributeMap, Value};
use driftmgr_state::{Resource, ResourceMode, StateStore};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::adapter::{CloudAction, CloudAdapter, LiveResource};
use crate::engine::{DriftEngine, DriftReport, EngineConfig};
use crate::error::{DriftError, SimulatorError};

/// The shape of divergence to introduce. `Random` defers the choice to
/// [`Simulator::simulate`] itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedDriftKind {
    TagChange,
    RuleAddition,
    ResourceCreation,
    AttributeChange,
    ResourceDeletion,
    Random,
}

const CONCRETE_KINDS: [SimulatedDriftKind; 5] = [
    SimulatedDriftKind::TagChange,
    SimulatedDriftKind::RuleAddition,
    SimulatedDriftKind::ResourceCreation,
    SimulatedDriftKind::AttributeChange,
    SimulatedDriftKind::ResourceDeletion,
];

/// Enough information to reverse a simulated action without a full
/// remediation cycle: the forward action that was applied, recorded so
/// [`Simulator::rollback`] can invert it directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollbackData {
    action: CloudAction,
}

/// Drives [`CloudAdapter`] calls that introduce a chosen [`SimulatedDriftKind`]
/// against a resource picked from the current state.
pub struct Simulator {
    state_store: Arc<StateStore>,
    adapter: Arc<dyn CloudAdapter>,
    /// Resource types preferred as simulation targets, per provider, in
    /// priority order; falls back to a uniform random pick among all
    /// managed resources of that provider when none of the preferred
    /// types are present.
    preferred_targets: Vec<(String, Vec<String>)>,
}

impl Simulator {
    pub fn new(state_store: Arc<StateStore>, adapter: Arc<dyn CloudAdapter>, preferred_targets: Vec<(String, Vec<String>)>) -> Self {
        Self { state_store, adapter, preferred_targets }
    }

    /// Picks a target resource for `provider` (preferred types first,
    /// else uniform random among the provider's managed resources),
    /// resolves its kind if `Random`, and applies the corresponding
    /// [`CloudAction`]. Returns the chosen kind, the target's address,
    /// and the data needed to roll the change back.
    pub async fn simulate_drift(
        &self,
        key: &str,
        provider: &str,
        kind: SimulatedDriftKind,
    ) -> Result<(SimulatedDriftKind, String, RollbackData), SimulatorError> {
        let state = self.state_store.get_state(key).await.map_err(DriftError::from)?;
        let target = self.pick_target(&state, provider).ok_or(SimulatorError::NoEligibleTarget)?;

        let resolved_kind = if kind == SimulatedDriftKind::Random {
            *CONCRETE_KINDS.choose(&mut rand::thread_rng()).expect("CONCRETE_KINDS is non-empty")
        } else {
            kind
        };

        let instance = &target.instances[0];
        let cloud_id = instance
            .attributes
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(&target.name)
            .to_owned();
        let live = LiveResource {
            provider: provider.to_owned(),
            resource_type: target.r#type.clone(),
            cloud_id: cloud_id.clone(),
            attributes: instance.attributes.clone(),
        };

        let action = build_action(resolved_kind, live);
        self.adapter.apply(action.clone()).await?;
        let address = format!("{}.{}", target.r#type, target.name);
        Ok((resolved_kind, address, RollbackData { action }))
    }

    /// Runs a [`DriftEngine`] pass scoped to `providers` against the same
    /// state and adapter this simulator targets, exposing the uniform
    /// `simulate_drift` / `detect_drift` / `rollback` shape spec §4.6
    /// requires. A thin wrapper: detection logic itself lives in
    /// [`DriftEngine`], not duplicated here.
    pub async fn detect_drift(&self, key: &str, providers: Vec<String>) -> Result<DriftReport, SimulatorError> {
        let engine = DriftEngine::new(
            self.state_store.clone(),
            self.adapter.clone(),
            EngineConfig { providers, ..Default::default() },
        );
        Ok(engine.detect_drift(key, None).await?)
    }

    /// Reverses a previously applied [`Simulator::simulate_drift`] call
    /// via the adapter's inverse of the recorded forward action.
    pub async fn rollback(&self, rollback_data: RollbackData) -> Result<(), SimulatorError> {
        let inverse = self.adapter.inverse(&rollback_data.action);
        self.adapter.apply(inverse).await.map_err(DriftError::from)?;
        Ok(())
    }

    fn pick_target<'a>(&self, state: &'a driftmgr_state::TerraformState, provider: &str) -> Option<&'a Resource> {
        let candidates: Vec<&Resource> = state
            .resources
            .iter()
            .filter(|r| matches!(r.mode, ResourceMode::Managed) && r.provider == provider && !r.instances.is_empty())
            .collect();
        if candidates.is_empty() {
            return None;
        }

        if let Some((_, preferred_types)) = self.preferred_targets.iter().find(|(p, _)| p == provider) {
            for preferred in preferred_types {
                if let Some(found) = candidates.iter().find(|r| &r.r#type == preferred) {
                    return Some(found);
                }
            }
        }
        candidates.choose(&mut rand::thread_rng()).copied()
    }
}

/// Builds the forward [`CloudAction`] for a concrete [`SimulatedDriftKind`]
/// against `live`.
fn build_action(kind: SimulatedDriftKind, live: LiveResource) -> CloudAction {
    match kind {
        SimulatedDriftKind::ResourceDeletion => CloudAction::Delete(live),
        SimulatedDriftKind::ResourceCreation => {
            let mut created = live;
            created.cloud_id = format!("{}-simulated", created.cloud_id);
            CloudAction::Create(created)
        }
        SimulatedDriftKind::TagChange => {
            let mut after = live.clone();
            after.attributes.insert("DriftSimulation".to_owned(), Value::String(chrono::Utc::now().to_rfc3339()));
            CloudAction::Update { before: live, after }
        }
        SimulatedDriftKind::RuleAddition => {
            let mut after = live.clone();
            let mut rule = AttributeMap::new();
            rule.insert("from_port".to_owned(), Value::Number(serde_json::Number::from(31337)));
            rule.insert("protocol".to_owned(), Value::String("tcp".to_owned()));
            after.attributes.insert("simulated_ingress_rule".to_owned(), Value::Map(rule));
            CloudAction::Update { before: live, after }
        }
        SimulatedDriftKind::AttributeChange | SimulatedDriftKind::Random => {
            let mut after = live.clone();
            after.attributes.insert("simulated_attribute".to_owned(), Value::String("drifted".to_owned()));
            CloudAction::Update { before: live, after }
        }
    }
}

#[cfg(test)]
mod simulator_test {
    use driftmgr_state::CacheConfig;
    use driftmgr_test_utils::{sample_state, InMemoryBackend, InMemoryCloudAdapter};

    use super::*;

    fn simulator(adapter: InMemoryCloudAdapter) -> Simulator {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(StateStore::new(
            backend,
            Arc::new(driftmgr_state::StateCache::new(CacheConfig::default())),
            driftmgr_state::Validator::with_default_rules(),
            "simulator-test".into(),
        ));
        Simulator::new(store, Arc::new(adapter), Vec::new())
    }

    #[tokio::test]
    async fn simulating_against_empty_state_errors() {
        let sim = simulator(InMemoryCloudAdapter::empty());
        let err = sim.simulate_drift("missing-key", "aws", SimulatedDriftKind::TagChange).await.unwrap_err();
        assert!(matches!(err, SimulatorError::Drift(DriftError::State(_))));
    }

    #[tokio::test]
    async fn tag_change_round_trips_through_rollback() {
        let state = sample_state();
        let adapter = InMemoryCloudAdapter::mirroring(&state);
        let sim = simulator(adapter);
        sim.state_store.put_state("k", state).await.unwrap();

        let (kind, address, rollback_data) = sim.simulate_drift("k", "aws", SimulatedDriftKind::TagChange).await.unwrap();
        assert_eq!(kind, SimulatedDriftKind::TagChange);
        assert!(!address.is_empty());
        sim.rollback(rollback_data).await.unwrap();
    }

    #[tokio::test]
    async fn detect_drift_delegates_to_the_engine_and_sees_its_own_simulated_change() {
        let state = sample_state();
        let adapter = InMemoryCloudAdapter::mirroring(&state);
        let sim = simulator(adapter);
        sim.state_store.put_state("k", state).await.unwrap();

        sim.simulate_drift("k", "aws", SimulatedDriftKind::TagChange).await.unwrap();
        let report = sim.detect_drift("k", vec!["aws".to_owned()]).await.unwrap();
        assert!(!report.items.is_empty());
    }

    #[tokio::test]
    async fn no_matching_provider_resources_errors() {
        let state = sample_state();
        let adapter = InMemoryCloudAdapter::mirroring(&state);
        let sim = simulator(adapter);
        sim.state_store.put_state("k", state).await.unwrap();
        let err = sim.simulate_drift("k", "azurerm", SimulatedDriftKind::TagChange).await.unwrap_err();
        assert!(matches!(err, SimulatorError::NoEligibleTarget));
    }
}
