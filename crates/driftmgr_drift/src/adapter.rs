//! The `CloudAdapter` capability (spec §6): the external collaborator the
//! Drift Engine calls to enumerate and mutate live cloud resources. The
//! core depends on this capability, not on any specific cloud SDK.

use std::pin::Pin;

use async_trait::async_trait;
use driftmgr_common::AttributeMap;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::DriftError;

/// One resource as discovered live in a cloud account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveResource {
    pub provider: String,
    pub resource_type: String,
    pub cloud_id: String,
    pub attributes: AttributeMap,
}

/// An action performed against the cloud side, for rollback purposes
/// (spec §4.5 "per-action inverse primitives supplied by the adapter").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CloudAction {
    Create(LiveResource),
    Update { before: LiveResource, after: LiveResource },
    Delete(LiveResource),
}

/// A stream of resources discovered while enumerating one `(provider,
/// resource_kind)` pair.
pub type LiveResourceStream = Pin<Box<dyn Stream<Item = Result<LiveResource, DriftError>> + Send>>;

/// The external capability the Drift Engine and Simulator call to
/// enumerate and mutate live cloud resources. Implementations wrap a
/// specific cloud SDK; the core never depends on one directly.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// Streams every live resource of `resource_kind` in `provider`.
    async fn enumerate(&self, provider: &str, resource_kind: &str) -> Result<LiveResourceStream, DriftError>;

    /// Fetches one resource by its cloud-assigned id.
    async fn get(&self, provider: &str, kind: &str, id: &str) -> Result<LiveResource, DriftError>;

    async fn create(&self, resource: LiveResource) -> Result<LiveResource, DriftError>;
    async fn update(&self, resource: LiveResource) -> Result<LiveResource, DriftError>;
    async fn delete(&self, resource: LiveResource) -> Result<(), DriftError>;

    /// The inverse of `action`, for rollback replay in LIFO order.
    fn inverse(&self, action: &CloudAction) -> CloudAction {
        match action {
            CloudAction::Create(resource) => CloudAction::Delete(resource.clone()),
            CloudAction::Update { before, after } => {
                CloudAction::Update { before: after.clone(), after: before.clone() }
            }
            CloudAction::Delete(resource) => CloudAction::Create(resource.clone()),
        }
    }

    /// Executes `action`'s forward effect against the cloud.
    async fn apply(&self, action: CloudAction) -> Result<(), DriftError> {
        match action {
            CloudAction::Create(resource) => self.create(resource).await.map(|_| ()),
            CloudAction::Update { after, .. } => self.update(after).await.map(|_| ()),
            CloudAction::Delete(resource) => self.delete(resource).await,
        }
    }

    /// Attribute names this adapter considers sensitive for `resource_type`.
    fn sensitive_fields(&self, resource_type: &str) -> Vec<String>;

    /// Attribute names this adapter considers volatile (e.g.
    /// `last_modified`) for `resource_type`, ignored during drift diffing.
    fn volatile_fields(&self, resource_type: &str) -> Vec<String>;
}
