//! A deterministic, in-process [`CloudAdapter`], for Drift Engine and
//! Simulator tests that want to control exactly what "the cloud" reports
//! without a real SDK.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use driftmgr_common::AttributeMap;
use driftmgr_drift::adapter::{CloudAdapter, LiveResource, LiveResourceStream};
use driftmgr_drift::error::DriftError;
use driftmgr_drift::identity::extract_cloud_id;
use driftmgr_state::TerraformState;
use futures::stream::{self, StreamExt};

type ResourceKey = (String, String, String);

/// An in-memory "cloud account": a map of `(provider, type, cloud_id) ->
/// LiveResource` that [`CloudAdapter`] methods read and write directly,
/// with no network calls.
pub struct InMemoryCloudAdapter {
    resources: Mutex<HashMap<ResourceKey, LiveResource>>,
}

impl InMemoryCloudAdapter {
    /// An account with nothing in it.
    pub fn empty() -> Self {
        Self { resources: Mutex::new(HashMap::new()) }
    }

    /// An account that exactly mirrors `state`'s managed resources: every
    /// instance becomes one [`LiveResource`], keyed by the same
    /// `(provider, type, cloud_id)` triple the Drift Engine uses to
    /// correlate them. Starting from this produces zero drift until the
    /// caller mutates it.
    pub fn mirroring(state: &TerraformState) -> Self {
        let mut resources = HashMap::new();
        for resource in &state.resources {
            if !matches!(resource.mode, driftmgr_state::ResourceMode::Managed) {
                continue;
            }
            for instance in &resource.instances {
                let Some(cloud_id) = extract_cloud_id(&resource.r#type, &instance.attributes) else { continue };
                resources.insert(
                    (resource.provider.clone(), resource.r#type.clone(), cloud_id.clone()),
                    LiveResource {
                        provider: resource.provider.clone(),
                        resource_type: resource.r#type.clone(),
                        cloud_id,
                        attributes: instance.attributes.clone(),
                    },
                );
            }
        }
        Self { resources: Mutex::new(resources) }
    }

    /// Adds (or replaces) one resource, bypassing `create`/`update` so
    /// tests can set up a scenario directly.
    pub fn add_live(&mut self, resource: LiveResource) {
        self.resources
            .get_mut()
            .expect("memory cloud adapter mutex poisoned")
            .insert((resource.provider.clone(), resource.resource_type.clone(), resource.cloud_id.clone()), resource);
    }

    /// Mutates a stored resource's attributes in place, for introducing
    /// drift against an otherwise-mirrored account.
    pub fn mutate(&mut self, provider: &str, resource_type: &str, cloud_id: &str, f: impl FnOnce(&mut AttributeMap)) {
        let mut resources = self.resources.get_mut().expect("memory cloud adapter mutex poisoned");
        if let Some(resource) = resources.get_mut(&(provider.to_owned(), resource_type.to_owned(), cloud_id.to_owned())) {
            f(&mut resource.attributes);
        }
    }
}

#[async_trait]
impl CloudAdapter for InMemoryCloudAdapter {
    async fn enumerate(&self, provider: &str, resource_kind: &str) -> Result<LiveResourceStream, DriftError> {
        let matches: Vec<LiveResource> = self
            .resources
            .lock()
            .expect("memory cloud adapter mutex poisoned")
            .values()
            .filter(|r| r.provider == provider && r.resource_type == resource_kind)
            .cloned()
            .collect();
        Ok(stream::iter(matches.into_iter().map(Ok)).boxed())
    }

    async fn get(&self, provider: &str, kind: &str, id: &str) -> Result<LiveResource, DriftError> {
        self.resources
            .lock()
            .expect("memory cloud adapter mutex poisoned")
            .get(&(provider.to_owned(), kind.to_owned(), id.to_owned()))
            .cloned()
            .ok_or_else(|| DriftError::AdapterFailure(format!("no such resource: {provider}/{kind}/{id}")))
    }

    async fn create(&self, resource: LiveResource) -> Result<LiveResource, DriftError> {
        let key = (resource.provider.clone(), resource.resource_type.clone(), resource.cloud_id.clone());
        self.resources.lock().expect("memory cloud adapter mutex poisoned").insert(key, resource.clone());
        Ok(resource)
    }

    async fn update(&self, resource: LiveResource) -> Result<LiveResource, DriftError> {
        let key = (resource.provider.clone(), resource.resource_type.clone(), resource.cloud_id.clone());
        self.resources.lock().expect("memory cloud adapter mutex poisoned").insert(key, resource.clone());
        Ok(resource)
    }

    async fn delete(&self, resource: LiveResource) -> Result<(), DriftError> {
        let key = (resource.provider.clone(), resource.resource_type.clone(), resource.cloud_id.clone());
        self.resources.lock().expect("memory cloud adapter mutex poisoned").remove(&key);
        Ok(())
    }

    fn sensitive_fields(&self, _resource_type: &str) -> Vec<String> {
        vec!["password".to_owned(), "secret".to_owned()]
    }

    fn volatile_fields(&self, _resource_type: &str) -> Vec<String> {
        vec!["last_modified".to_owned()]
    }
}
