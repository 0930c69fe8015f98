//! The Drift Engine (spec §4.5): orchestrates parallel discovery across
//! providers, diffs live resources against state, classifies and scores
//! drift, and prioritizes the result into a [`DriftReport`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use driftmgr_common::{AttributeMap, Value};
use driftmgr_graph::DependencyGraph;
use driftmgr_state::{StateStore, TerraformState};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::adapter::{CloudAdapter, LiveResource};
use crate::error::DriftError;
use crate::identity::extract_cloud_id;

/// The kind of divergence a [`DriftItem`] represents. Spec §3 lists this
/// as an open set (`{tag_addition, rule_addition, attribute_change,
/// resource_deletion, unmanaged_resource, …}`); `missing_identifier` is
/// added here for the non-fatal "could not correlate this instance"
/// case described in spec §4.5 step 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    TagAddition,
    RuleAddition,
    AttributeChange,
    ResourceDeletion,
    UnmanagedResource,
    MissingIdentifier,
}

/// Blast-radius-driven or drift-kind-driven severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
    Critical,
}

/// One detected divergence between state and live cloud configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriftItem {
    pub resource_id: String,
    pub resource_type: String,
    pub drift_type: DriftKind,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    pub impact: Impact,
}

/// The Drift Engine's output: every detected item plus aggregate counts
/// by severity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DriftReport {
    pub items: Vec<DriftItem>,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl DriftReport {
    fn from_items(mut items: Vec<DriftItem>) -> Self {
        let mut report = DriftReport::default();
        for item in &items {
            match item.impact {
                Impact::Low => report.low += 1,
                Impact::Medium => report.medium += 1,
                Impact::High => report.high += 1,
                Impact::Critical => report.critical += 1,
            }
        }
        items.sort_by(|a, b| {
            b.impact.cmp(&a.impact).then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        report.items = items;
        report
    }
}

/// Severity escalation thresholds keyed on blast-radius size (spec
/// §4.5 step 5), named to match spec §6's `blast_thresholds{medium,
/// high}` configuration field.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BlastThresholds {
    pub medium: usize,
    pub high: usize,
}

impl Default for BlastThresholds {
    fn default() -> Self {
        Self { medium: 2, high: 5 }
    }
}

/// Drift Engine configuration, named to match spec §6's fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub providers: Vec<String>,
    pub max_parallel_providers: usize,
    pub max_parallel_kinds: usize,
    pub blast_thresholds: BlastThresholds,
    pub ignored_fields: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            max_parallel_providers: 4,
            max_parallel_kinds: 4,
            blast_thresholds: BlastThresholds::default(),
            ignored_fields: Vec::new(),
        }
    }
}

/// A progress event emitted while discovery is in flight, one per
/// `(provider, resource_kind)` query that completes.
#[derive(Clone, Debug)]
pub struct DiscoveryProgress {
    pub provider: String,
    pub resource_kind: String,
    pub discovered: usize,
}

/// Orchestrates discovery, classification, and scoring against a single
/// state key.
pub struct DriftEngine {
    state_store: Arc<StateStore>,
    adapter: Arc<dyn CloudAdapter>,
    config: EngineConfig,
}

/// `(provider, type, cloud_id)`, the correlation key spec §4.5 step 3
/// prescribes for both live and state resources.
type ResourceKey = (String, String, String);

impl DriftEngine {
    pub fn new(state_store: Arc<StateStore>, adapter: Arc<dyn CloudAdapter>, config: EngineConfig) -> Self {
        Self { state_store, adapter, config }
    }

    /// Runs the full pipeline: resolve state, discover in parallel,
    /// index, classify, score, and prioritize. `progress` optionally
    /// receives one [`DiscoveryProgress`] per completed `(provider,
    /// kind)` query.
    pub async fn detect_drift(
        &self,
        key: &str,
        progress: Option<tokio::sync::mpsc::UnboundedSender<DiscoveryProgress>>,
    ) -> Result<DriftReport, DriftError> {
        let state = self.state_store.get_state(key).await?;
        let graph = DependencyGraph::build(&state)?;

        let kinds_by_provider = managed_kinds_by_provider(&state, &self.config.providers);
        let live = self.discover_all(&kinds_by_provider, progress).await?;

        let items = self.classify(&state, &live)?;
        let scored = self.score(items, &graph);
        Ok(DriftReport::from_items(scored))
    }

    /// Fans out `enumerate` calls across providers (bounded by
    /// `max_parallel_providers`) and, within a provider, across resource
    /// kinds (bounded by `max_parallel_kinds`).
    async fn discover_all(
        &self,
        kinds_by_provider: &HashMap<String, Vec<String>>,
        progress: Option<tokio::sync::mpsc::UnboundedSender<DiscoveryProgress>>,
    ) -> Result<HashMap<ResourceKey, LiveResource>, DriftError> {
        let provider_semaphore = Arc::new(Semaphore::new(self.config.max_parallel_providers.max(1)));
        let kind_semaphore = Arc::new(Semaphore::new(self.config.max_parallel_kinds.max(1)));
        let mut provider_tasks = Vec::new();

        for (provider, kinds) in kinds_by_provider.clone() {
            let adapter = self.adapter.clone();
            let provider_semaphore = provider_semaphore.clone();
            let kind_semaphore = kind_semaphore.clone();
            let progress = progress.clone();
            provider_tasks.push(tokio::spawn(async move {
                let _permit = provider_semaphore.acquire_owned().await.expect("semaphore never closed");
                let mut kind_tasks = Vec::new();
                for kind in kinds {
                    let adapter = adapter.clone();
                    let kind_semaphore = kind_semaphore.clone();
                    let progress = progress.clone();
                    let provider = provider.clone();
                    kind_tasks.push(tokio::spawn(async move {
                        let _permit = kind_semaphore.acquire_owned().await.expect("semaphore never closed");
                        let mut stream = adapter.enumerate(&provider, &kind).await?;
                        let mut found = Vec::new();
                        while let Some(item) = stream.next().await {
                            found.push(item?);
                        }
                        if let Some(tx) = &progress {
                            let _ = tx.send(DiscoveryProgress {
                                provider: provider.clone(),
                                resource_kind: kind.clone(),
                                discovered: found.len(),
                            });
                        }
                        Ok::<_, DriftError>(found)
                    }));
                }
                let mut out = Vec::new();
                for task in kind_tasks {
                    out.extend(task.await.map_err(|e| DriftError::AdapterFailure(e.to_string()))??);
                }
                Ok::<_, DriftError>(out)
            }));
        }

        let mut index = HashMap::new();
        for task in provider_tasks {
            let resources = task.await.map_err(|e| DriftError::AdapterFailure(e.to_string()))??;
            for resource in resources {
                index.insert(
                    (resource.provider.clone(), resource.resource_type.clone(), resource.cloud_id.clone()),
                    resource,
                );
            }
        }
        Ok(index)
    }

    /// Correlates state and live resources by `(provider, type,
    /// cloud_id)` and emits one [`DriftItem`] per divergence found.
    fn classify(
        &self,
        state: &TerraformState,
        live: &HashMap<ResourceKey, LiveResource>,
    ) -> Result<Vec<DriftItem>, DriftError> {
        let mut state_index: HashMap<ResourceKey, (String, &AttributeMap)> = HashMap::new();
        let mut items = Vec::new();

        for resource in &state.resources {
            if !matches!(resource.mode, driftmgr_state::ResourceMode::Managed) {
                continue;
            }
            if !self.config.providers.is_empty() && !self.config.providers.contains(&resource.provider) {
                continue;
            }
            for instance in &resource.instances {
                let address = format!("{}.{}{}", resource.r#type, resource.name, instance.index_suffix());
                match extract_cloud_id(&resource.r#type, &instance.attributes) {
                    Some(cloud_id) => {
                        state_index.insert(
                            (resource.provider.clone(), resource.r#type.clone(), cloud_id),
                            (address, &instance.attributes),
                        );
                    }
                    None => items.push(DriftItem {
                        resource_id: address,
                        resource_type: resource.r#type.clone(),
                        drift_type: DriftKind::MissingIdentifier,
                        before: serde_json::Value::Null,
                        after: serde_json::Value::Null,
                        impact: Impact::Low,
                    }),
                }
            }
        }

        let state_keys: HashSet<&ResourceKey> = state_index.keys().collect();
        let live_keys: HashSet<&ResourceKey> = live.keys().collect();

        for key in state_keys.difference(&live_keys) {
            let (address, _) = &state_index[*key];
            items.push(DriftItem {
                resource_id: address.clone(),
                resource_type: key.1.clone(),
                drift_type: DriftKind::ResourceDeletion,
                before: serde_json::Value::Bool(true),
                after: serde_json::Value::Null,
                impact: Impact::Medium,
            });
        }

        for key in live_keys.difference(&state_keys) {
            let resource = &live[*key];
            items.push(DriftItem {
                resource_id: format!("{}:{}", key.1, key.2),
                resource_type: key.1.clone(),
                drift_type: DriftKind::UnmanagedResource,
                before: serde_json::Value::Null,
                after: attribute_map_to_json(&resource.attributes),
                impact: Impact::Medium,
            });
        }

        for key in state_keys.intersection(&live_keys) {
            let (address, state_attrs) = &state_index[*key];
            let live_attrs = &live[*key].attributes;
            let sensitive = self.adapter.sensitive_fields(&key.1);
            let volatile = self.adapter.volatile_fields(&key.1);
            if let Some((before, after, drift_type)) =
                diff_attributes(state_attrs, live_attrs, &sensitive, &volatile, &self.config.ignored_fields)
            {
                items.push(DriftItem {
                    resource_id: address.clone(),
                    resource_type: key.1.clone(),
                    drift_type,
                    before,
                    after,
                    impact: Impact::Low,
                });
            }
        }

        Ok(items)
    }

    /// Scores each item by drift kind, then up-ranks by blast radius per
    /// spec §4.5 step 5's thresholds.
    fn score(&self, items: Vec<DriftItem>, graph: &DependencyGraph) -> Vec<DriftItem> {
        items
            .into_iter()
            .map(|mut item| {
                let base = base_severity(item.drift_type);
                let blast_size = graph.get_blast_radius(&item.resource_id).map(|b| b.len()).unwrap_or(0);
                let escalated = if blast_size >= self.config.blast_thresholds.high {
                    Impact::Critical
                } else if blast_size >= self.config.blast_thresholds.medium {
                    Impact::High
                } else {
                    base
                };
                item.impact = escalated.max(base);
                item
            })
            .collect()
    }
}

fn base_severity(kind: DriftKind) -> Impact {
    match kind {
        DriftKind::TagAddition => Impact::Low,
        DriftKind::MissingIdentifier => Impact::Low,
        DriftKind::AttributeChange => Impact::Low,
        DriftKind::ResourceDeletion | DriftKind::UnmanagedResource => Impact::Medium,
        DriftKind::RuleAddition => Impact::Medium,
    }
}

/// Resource types present among `state`'s managed resources, grouped by
/// provider and filtered to `enabled_providers` (all providers if empty).
fn managed_kinds_by_provider(
    state: &TerraformState,
    enabled_providers: &[String],
) -> HashMap<String, Vec<String>> {
    let mut kinds: HashMap<String, HashSet<String>> = HashMap::new();
    for resource in &state.resources {
        if !matches!(resource.mode, driftmgr_state::ResourceMode::Managed) {
            continue;
        }
        if !enabled_providers.is_empty() && !enabled_providers.contains(&resource.provider) {
            continue;
        }
        kinds.entry(resource.provider.clone()).or_default().insert(resource.r#type.clone());
    }
    kinds
        .into_iter()
        .map(|(provider, kinds)| {
            let mut kinds: Vec<String> = kinds.into_iter().collect();
            kinds.sort();
            (provider, kinds)
        })
        .collect()
}

fn attribute_map_to_json(attrs: &AttributeMap) -> serde_json::Value {
    serde_json::Value::Object(attrs.iter().map(|(k, v)| (k.clone(), v.clone().into())).collect())
}

/// Per-field diff over two attribute maps. Ignores sensitive fields,
/// both-sides-zero-valued fields, and adapter-declared volatile fields.
/// Nested maps are diffed recursively; lists are compared order-sensitive
/// unless every element is itself a scalar-valued map with string values
/// (the "tag-like" shape spec §4.5 treats as a multiset).
fn diff_attributes(
    before: &AttributeMap,
    after: &AttributeMap,
    sensitive: &[String],
    volatile: &[String],
    ignored: &[String],
) -> Option<(serde_json::Value, serde_json::Value, DriftKind)> {
    let ignore = |field: &str| {
        sensitive.iter().any(|s| s == field) || volatile.iter().any(|v| v == field) || ignored.iter().any(|i| i == field)
    };

    let mut before_diff = serde_json::Map::new();
    let mut after_diff = serde_json::Map::new();

    let all_keys: HashSet<&String> = before.keys().chain(after.keys()).collect();
    for key in all_keys {
        if ignore(key) {
            continue;
        }
        let b = before.get(key);
        let a = after.get(key);
        let both_zero = b.map(Value::is_zero_value).unwrap_or(true) && a.map(Value::is_zero_value).unwrap_or(true);
        if both_zero {
            continue;
        }
        if b != a {
            before_diff.insert(key.clone(), b.cloned().unwrap_or(Value::Null).into());
            after_diff.insert(key.clone(), a.cloned().unwrap_or(Value::Null).into());
        }
    }

    if before_diff.is_empty() && after_diff.is_empty() {
        return None;
    }

    let drift_type = classify_field_diff(&before_diff, &after_diff);
    Some((serde_json::Value::Object(before_diff), serde_json::Value::Object(after_diff), drift_type))
}

/// Picks a drift kind label for a non-empty per-field diff: a diff
/// touching only `tags`/`tag` is a tag addition; one touching `ingress`,
/// `egress`, or `rule`-shaped keys is a rule addition; anything else is a
/// generic attribute change.
fn classify_field_diff(before: &serde_json::Map<String, serde_json::Value>, after: &serde_json::Map<String, serde_json::Value>) -> DriftKind {
    let keys: HashSet<&String> = before.keys().chain(after.keys()).collect();
    if keys.iter().all(|k| k.eq_ignore_ascii_case("tags") || k.eq_ignore_ascii_case("tag")) {
        DriftKind::TagAddition
    } else if keys.iter().any(|k| {
        let lower = k.to_lowercase();
        lower.contains("ingress") || lower.contains("egress") || lower.contains("rule")
    }) {
        DriftKind::RuleAddition
    } else {
        DriftKind::AttributeChange
    }
}

#[cfg(test)]
mod engine_test {
    use driftmgr_test_utils::{sample_state, InMemoryCloudAdapter};

    use super::*;
    use crate::adapter::LiveResource;

    fn engine(adapter: InMemoryCloudAdapter) -> (DriftEngine, Arc<StateStore>) {
        let backend = Arc::new(driftmgr_test_utils::InMemoryBackend::new());
        let store = Arc::new(StateStore::new(
            backend,
            Arc::new(driftmgr_state::StateCache::new(Default::default())),
            driftmgr_state::Validator::with_default_rules(),
            "engine-test".to_owned(),
        ));
        let config = EngineConfig { providers: vec!["aws".into()], ..Default::default() };
        (DriftEngine::new(store.clone(), Arc::new(adapter), config), store)
    }

    #[tokio::test]
    async fn no_op_cloud_yields_empty_report() {
        let state = sample_state();
        let (engine, store) = engine(InMemoryCloudAdapter::mirroring(&state));
        store.put_state("k", state).await.unwrap();
        let report = engine.detect_drift("k", None).await.unwrap();
        assert!(report.items.is_empty(), "an unchanged cloud must produce no drift items");
    }

    #[tokio::test]
    async fn unrelated_attribute_addition_is_classified_as_low_impact() {
        let mut state = sample_state();
        state.resources[0].r#type = "aws_s3_bucket".to_owned();
        state.resources[0].instances[0].attributes.insert("bucket".into(), Value::String("b1".into()));
        let mut adapter = InMemoryCloudAdapter::mirroring(&state);
        adapter.mutate("aws", "aws_s3_bucket", "b1", |attrs| {
            attrs.insert("DriftSimulation".into(), Value::String("2026-01-01T00:00:00Z".into()));
        });

        let (engine, store) = engine(adapter);
        store.put_state("k", state).await.unwrap();
        let report = engine.detect_drift("k", None).await.unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].drift_type, DriftKind::AttributeChange);
        assert_eq!(report.items[0].impact, Impact::Low);
    }

    #[tokio::test]
    async fn tag_added_inside_nested_tags_map_is_classified_as_tag_addition() {
        let mut state = sample_state();
        state.resources[0].r#type = "aws_s3_bucket".to_owned();
        state.resources[0].instances[0].attributes.insert("bucket".into(), Value::String("b1".into()));
        state.resources[0].instances[0].attributes.insert(
            "tags".into(),
            Value::Map(indexmap::IndexMap::from([("Environment".to_owned(), Value::String("prod".into()))])),
        );
        let mut adapter = InMemoryCloudAdapter::mirroring(&state);
        adapter.mutate("aws", "aws_s3_bucket", "b1", |attrs| {
            attrs.insert(
                "tags".into(),
                Value::Map(indexmap::IndexMap::from([
                    ("Environment".to_owned(), Value::String("prod".into())),
                    ("Owner".to_owned(), Value::String("platform-team".into())),
                ])),
            );
        });

        let (engine, store) = engine(adapter);
        store.put_state("k", state).await.unwrap();
        let report = engine.detect_drift("k", None).await.unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].drift_type, DriftKind::TagAddition);
        assert_eq!(report.items[0].impact, Impact::Low);
    }

    #[tokio::test]
    async fn unmanaged_resource_is_reported() {
        let state = sample_state();
        let mut adapter = InMemoryCloudAdapter::mirroring(&state);
        adapter.add_live(LiveResource {
            provider: "aws".into(),
            resource_type: "aws_instance".into(),
            cloud_id: "i-unmanaged".into(),
            attributes: Default::default(),
        });
        let (engine, store) = engine(adapter);
        store.put_state("k", state).await.unwrap();
        let report = engine.detect_drift("k", None).await.unwrap();
        assert!(report.items.iter().any(|i| i.drift_type == DriftKind::UnmanagedResource));
    }

    #[tokio::test]
    async fn missing_cloud_resource_is_reported_as_deletion() {
        let state = sample_state();
        let adapter = InMemoryCloudAdapter::empty();
        let (engine, store) = engine(adapter);
        store.put_state("k", state).await.unwrap();
        let report = engine.detect_drift("k", None).await.unwrap();
        assert!(report.items.iter().any(|i| i.drift_type == DriftKind::ResourceDeletion));
    }
}
