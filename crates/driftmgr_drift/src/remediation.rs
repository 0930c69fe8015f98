//! Remediation (spec §4.5 "remediation strategies"): turns a
//! [`DriftItem`] into a forward [`CloudAction`] or [`Resource`] patch,
//! snapshots the state before acting, and rolls back on failure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use driftmgr_state::{BackupManager, StateStore};
use serde::{Deserialize, Serialize};

use crate::adapter::{CloudAction, CloudAdapter, LiveResource};
use crate::engine::{DriftItem, DriftKind};
use crate::error::DriftError;

/// Which side of a divergence is treated as authoritative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationStrategy {
    /// Terraform state wins: push the state's recorded configuration to
    /// the cloud, overwriting the live divergence.
    CodeAsTruth,
    /// The cloud wins: pull the live configuration into state.
    CloudAsTruth,
    /// No automatic action; the item is recorded for an operator to
    /// resolve by hand.
    Manual,
}

/// One step of a remediation run, appended to a [`RemediationLog`] as it
/// executes, so a failed run can be audited and rolled back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemediationStep {
    pub resource_id: String,
    pub action: CloudActionRecord,
    pub applied_at: DateTime<Utc>,
    pub succeeded: bool,
}

/// A serializable mirror of [`CloudAction`] for the audit log; kept
/// separate so the log survives even if `CloudAction`'s shape changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloudActionRecord {
    pub kind: String,
    pub resource_type: String,
    pub cloud_id: String,
}

impl From<&CloudAction> for CloudActionRecord {
    fn from(action: &CloudAction) -> Self {
        match action {
            CloudAction::Create(r) => {
                Self { kind: "create".into(), resource_type: r.resource_type.clone(), cloud_id: r.cloud_id.clone() }
            }
            CloudAction::Update { after, .. } => Self {
                kind: "update".into(),
                resource_type: after.resource_type.clone(),
                cloud_id: after.cloud_id.clone(),
            },
            CloudAction::Delete(r) => {
                Self { kind: "delete".into(), resource_type: r.resource_type.clone(), cloud_id: r.cloud_id.clone() }
            }
        }
    }
}

/// The full audit trail of one remediation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemediationLog {
    pub backup_id: Option<String>,
    pub steps: Vec<RemediationStep>,
    pub rolled_back: bool,
}

/// Applies a [`RemediationStrategy`] to a list of [`DriftItem`]s, backing
/// up state first and rolling back every applied action (in reverse
/// order) if any step fails.
pub struct Remediator {
    state_store: Arc<StateStore>,
    adapter: Arc<dyn CloudAdapter>,
    backup_manager: Arc<BackupManager>,
}

impl Remediator {
    pub fn new(state_store: Arc<StateStore>, adapter: Arc<dyn CloudAdapter>, backup_manager: Arc<BackupManager>) -> Self {
        Self { state_store, adapter, backup_manager }
    }

    /// Backs up the current state, then applies `strategy` to each item
    /// in turn. On the first failure, every already-applied action is
    /// replayed in reverse via [`CloudAdapter::inverse`]; if rollback
    /// itself fails the run ends with [`DriftError::NeedsOperatorAttention`]
    /// rather than silently leaving a half-applied state.
    pub async fn remediate(
        &self,
        key: &str,
        items: &[DriftItem],
        strategy: RemediationStrategy,
    ) -> Result<RemediationLog, DriftError> {
        let mut log = RemediationLog::default();
        if strategy == RemediationStrategy::Manual {
            return Ok(log);
        }

        let state = self.state_store.get_state(key).await?;
        let backup = self
            .backup_manager
            .create_backup(&format!("pre-remediation-{key}"), &state, "automatic pre-remediation snapshot", Default::default())
            .map_err(|e| DriftError::AdapterFailure(e.to_string()))?;
        log.backup_id = Some(backup.id.clone());

        let mut applied: Vec<CloudAction> = Vec::new();
        for item in items {
            let Some(action) = self.action_for(item, strategy) else { continue };
            match self.adapter.apply(action.clone()).await {
                Ok(()) => {
                    log.steps.push(RemediationStep {
                        resource_id: item.resource_id.clone(),
                        action: (&action).into(),
                        applied_at: Utc::now(),
                        succeeded: true,
                    });
                    applied.push(action);
                }
                Err(err) => {
                    log.steps.push(RemediationStep {
                        resource_id: item.resource_id.clone(),
                        action: (&action).into(),
                        applied_at: Utc::now(),
                        succeeded: false,
                    });
                    return self.rollback(log, applied, err).await;
                }
            }
        }
        Ok(log)
    }

    /// Replays `applied` in reverse via each action's inverse. A rollback
    /// failure is escalated to [`DriftError::NeedsOperatorAttention`]
    /// since the cloud may now be in a state neither the original nor the
    /// rolled-back configuration matches.
    async fn rollback(
        &self,
        mut log: RemediationLog,
        applied: Vec<CloudAction>,
        original_error: DriftError,
    ) -> Result<RemediationLog, DriftError> {
        log.rolled_back = true;
        for action in applied.into_iter().rev() {
            let inverse = self.adapter.inverse(&action);
            if let Err(rollback_err) = self.adapter.apply(inverse).await {
                return Err(DriftError::NeedsOperatorAttention(format!(
                    "remediation step failed ({original_error}); rollback also failed ({rollback_err})"
                )));
            }
        }
        Err(original_error)
    }

    /// Maps one [`DriftItem`] plus strategy to a forward [`CloudAction`],
    /// or `None` if the strategy has nothing to do for this item's kind
    /// (e.g. a cloud-side deletion under `CloudAsTruth` is reconciled by
    /// re-importing state, not by a cloud call).
    fn action_for(&self, item: &DriftItem, strategy: RemediationStrategy) -> Option<CloudAction> {
        match (strategy, item.drift_type) {
            // The cloud has a resource Terraform never created: delete it
            // to make the cloud match code.
            (RemediationStrategy::CodeAsTruth, DriftKind::UnmanagedResource) => {
                let (resource_type, cloud_id) = item.resource_id.split_once(':')?;
                Some(CloudAction::Delete(LiveResource {
                    provider: String::new(),
                    resource_type: resource_type.to_owned(),
                    cloud_id: cloud_id.to_owned(),
                    attributes: json_to_attributes(&item.after),
                }))
            }
            // An attribute has drifted from what state recorded: push
            // state's recorded value back to the cloud.
            (RemediationStrategy::CodeAsTruth, DriftKind::AttributeChange | DriftKind::TagAddition | DriftKind::RuleAddition) => {
                Some(CloudAction::Update {
                    before: LiveResource {
                        provider: String::new(),
                        resource_type: item.resource_type.clone(),
                        cloud_id: item.resource_id.clone(),
                        attributes: json_to_attributes(&item.after),
                    },
                    after: LiveResource {
                        provider: String::new(),
                        resource_type: item.resource_type.clone(),
                        cloud_id: item.resource_id.clone(),
                        attributes: json_to_attributes(&item.before),
                    },
                })
            }
            // Everything else (resource deletions, missing identifiers,
            // and every `CloudAsTruth` case) is reconciled on the state
            // side by the caller via `StateStore::refresh_state` /
            // `remove_resource`, not by issuing a cloud call here.
            _ => None,
        }
    }
}

/// Converts a diff-rendered `serde_json::Value` object back into an
/// [`driftmgr_common::AttributeMap`] for use building a [`LiveResource`].
fn json_to_attributes(value: &serde_json::Value) -> driftmgr_common::AttributeMap {
    match value {
        serde_json::Value::Object(map) => {
            map.iter().map(|(k, v)| (k.clone(), driftmgr_common::Value::from(v.clone()))).collect()
        }
        _ => Default::default(),
    }
}

#[cfg(test)]
mod remediation_test {
    use driftmgr_state::CacheConfig;
    use driftmgr_test_utils::{sample_state, InMemoryBackend, InMemoryCloudAdapter};

    use super::*;

    fn remediator(dir: &std::path::Path) -> Remediator {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(StateStore::new(
            backend,
            Arc::new(driftmgr_state::StateCache::new(CacheConfig::default())),
            driftmgr_state::Validator::with_default_rules(),
            "remediation-test".into(),
        ));
        let backup_manager = Arc::new(
            BackupManager::open(
                driftmgr_state::BackupConfig { backup_dir: dir.to_path_buf(), ..Default::default() },
                None,
            )
            .unwrap(),
        );
        let adapter = Arc::new(InMemoryCloudAdapter::empty());
        Remediator::new(store, adapter, backup_manager)
    }

    #[tokio::test]
    async fn manual_strategy_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let remediator = remediator(dir.path());
        remediator.state_store.put_state("k", sample_state()).await.unwrap();
        let item = DriftItem {
            resource_id: "aws_instance.web".into(),
            resource_type: "aws_instance".into(),
            drift_type: DriftKind::AttributeChange,
            before: serde_json::Value::Null,
            after: serde_json::Value::Null,
            impact: crate::engine::Impact::Low,
        };
        let log = remediator.remediate("k", &[item], RemediationStrategy::Manual).await.unwrap();
        assert!(log.steps.is_empty());
        assert!(log.backup_id.is_none());
    }

    #[tokio::test]
    async fn remediation_snapshots_state_before_acting() {
        let dir = tempfile::tempdir().unwrap();
        let remediator = remediator(dir.path());
        remediator.state_store.put_state("k", sample_state()).await.unwrap();
        let log = remediator.remediate("k", &[], RemediationStrategy::CodeAsTruth).await.unwrap();
        assert!(log.backup_id.is_some());
        assert_eq!(remediator.backup_manager.list_backups().len(), 1);
    }
}
