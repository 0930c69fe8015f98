//! The State Store (spec §4.2): wraps a [`Backend`] with a parser,
//! validator, and cache, and exposes the high-level state operations.

use std::sync::Arc;

use driftmgr_backend::retry::{backoff_delay, RetryConfig};
use driftmgr_backend::{Backend, BackendError, LockInfo, StateData, StateVersion};
use driftmgr_common::Value;

use crate::cache::StateCache;
use crate::error::StateStoreError;
use crate::model::{Resource, TerraformState};
use crate::parser::{parse_state, serialize_state};
use crate::validator::Validator;

/// The result of [`StateStore::compare_states`]: a coarse, address-set
/// comparison. Per spec §9 open question (a), deeper per-attribute
/// diffing is deliberately left to the Drift Engine; this comparator only
/// reports whether instance *counts* differ.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateComparison {
    pub are_equal: bool,
    pub serial_diff: i64,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

/// Holds a backend lock id and releases it exactly once. The normal path
/// is an explicit [`LockGuard::release`]; if the guard is dropped instead
/// (the holding future was cancelled mid-`await`, or unwound from a panic)
/// `Drop` spawns the same unlock so the lock is never leaked.
struct LockGuard {
    backend: Arc<dyn Backend>,
    lock_id: Option<String>,
}

impl LockGuard {
    async fn release(mut self) -> Result<(), BackendError> {
        let lock_id = self.lock_id.take().expect("release called at most once");
        self.backend.unlock(&lock_id).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(lock_id) = self.lock_id.take() {
            let backend = self.backend.clone();
            tokio::spawn(async move {
                if let Err(err) = backend.unlock(&lock_id).await {
                    tracing::warn!(%lock_id, %err, "failed to release lock on guard drop");
                }
            });
        }
    }
}

/// Wraps a [`Backend`] with parsing, validation, and caching, and exposes
/// the state operations named in spec §4.2.
pub struct StateStore {
    backend: Arc<dyn Backend>,
    cache: Arc<StateCache>,
    validator: Validator,
    who: String,
    retry: RetryConfig,
}

impl StateStore {
    pub fn new(backend: Arc<dyn Backend>, cache: Arc<StateCache>, validator: Validator, who: String) -> Self {
        Self::with_retry_config(backend, cache, validator, who, RetryConfig::default())
    }

    pub fn with_retry_config(
        backend: Arc<dyn Backend>,
        cache: Arc<StateCache>,
        validator: Validator,
        who: String,
        retry: RetryConfig,
    ) -> Self {
        Self { backend, cache, validator, who, retry }
    }

    /// Parses `bytes`, tries v4, falls back to the legacy parser, then
    /// validates. Does not touch the cache: callers decide whether the
    /// result is cacheable.
    fn parse_and_validate(&self, bytes: &[u8]) -> Result<TerraformState, StateStoreError> {
        let state = parse_state(bytes)?;
        let issues = self.validator.validate(&state);
        if issues.iter().any(|i| i.severity >= crate::validator::Severity::Error) {
            return Err(StateStoreError::Validation(issues));
        }
        Ok(state)
    }

    /// Cache hit returns the cached pointer; cache miss pulls from the
    /// backend, parses (v4, falling back to legacy), validates, and caches
    /// the result under `key`.
    pub async fn get_state(&self, key: &str) -> Result<Arc<TerraformState>, StateStoreError> {
        if let Some(cached) = self.cache.get(key) {
            metrics::increment_counter!(driftmgr_common::metrics::DRIFTMGR_STATE_CACHE_HITS);
            return Ok(cached);
        }
        metrics::increment_counter!(driftmgr_common::metrics::DRIFTMGR_STATE_CACHE_MISSES);
        let data = self.backend.pull().await?;
        let state = Arc::new(self.parse_and_validate(&data.bytes)?);
        self.cache.put(key.to_owned(), state.clone());
        Ok(state)
    }

    async fn with_lock<F, Fut, T>(&self, key: &str, f: F) -> Result<T, StateStoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, StateStoreError>>,
    {
        let lock_id = self
            .backend
            .lock(LockInfo {
                id: uuid::Uuid::new_v4().to_string(),
                path: key.to_owned(),
                operation: "OperationTypeApply".to_owned(),
                who: self.who.clone(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                created: chrono::Utc::now(),
                info: String::new(),
            })
            .await?;
        // Scoped acquisition: `guard`'s `Drop` releases the lock if this
        // future is dropped before `f` finishes (cancellation) or `f`
        // panics; the normal-return path releases it explicitly below.
        let guard = LockGuard { backend: self.backend.clone(), lock_id: Some(lock_id) };
        let result = f().await;
        guard.release().await?;
        result
    }

    /// Validates, increments `state.serial`, acquires the lock, pushes
    /// canonical JSON, releases the lock, and invalidates the cache entry.
    /// On a push failure the lock is still released and the cache entry
    /// remains invalidated; the error is returned to the caller.
    pub async fn update_state(&self, key: &str, mut state: TerraformState) -> Result<TerraformState, StateStoreError> {
        state.serial += 1;
        self.put_state_inner(key, state).await
    }

    /// Like [`StateStore::update_state`] but does not auto-increment
    /// `serial`; the caller is authoritative.
    pub async fn put_state(&self, key: &str, state: TerraformState) -> Result<TerraformState, StateStoreError> {
        self.put_state_inner(key, state).await
    }

    /// Pushes `state`, retrying on [`BackendError::PreconditionFailed`] by
    /// re-pulling the now-current serial and re-applying the same mutation
    /// on top of it, bounded by `retry.max_retries` (spec §7). Every other
    /// push failure, and a final exhausted precondition race, is surfaced
    /// to the caller.
    async fn put_state_inner(&self, key: &str, mut state: TerraformState) -> Result<TerraformState, StateStoreError> {
        let mut attempt = 0usize;
        loop {
            let issues = self.validator.validate(&state);
            if issues.iter().any(|i| i.severity >= crate::validator::Severity::Error) {
                return Err(StateStoreError::Validation(issues));
            }
            let bytes = serialize_state(&state)?;
            self.cache.invalidate(key);
            let push_result = self
                .with_lock(key, || async {
                    self.backend
                        .push(StateData { bytes, serial: Some(state.serial), lineage: Some(state.lineage.clone()) })
                        .await
                        .map_err(StateStoreError::from)
                })
                .await;

            match push_result {
                Ok(()) => return Ok(state),
                Err(StateStoreError::Backend(BackendError::PreconditionFailed(_)))
                    if attempt < self.retry.max_retries =>
                {
                    let delay = backoff_delay(&self.retry, attempt as u32);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    let current = self.parse_and_validate(&self.backend.pull().await?.bytes)?;
                    state.serial = current.serial + 1;
                }
                Err(StateStoreError::Backend(BackendError::PreconditionFailed(_))) => {
                    return Err(StateStoreError::RetriesExhausted(attempt));
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Locks, deletes, unlocks, and evicts the cache entry. Per spec §4.2,
    /// the default workspace cannot truly be deleted; that case is a
    /// contentful write of an empty state rather than a backend delete.
    pub async fn delete_state(&self, key: &str, workspace: &str) -> Result<(), StateStoreError> {
        self.cache.invalidate(key);
        if workspace == driftmgr_backend::DEFAULT_WORKSPACE {
            let lineage = uuid::Uuid::new_v4().to_string();
            self.put_state_inner(key, TerraformState::new_empty(lineage)).await?;
            return Ok(());
        }
        self.with_lock(key, || async {
            self.backend.delete_workspace(workspace.to_owned()).await.map_err(StateStoreError::from)
        })
        .await
    }

    /// Creates a fresh state with a new lineage if none exists yet;
    /// rejects if `(type, name)` is already present.
    pub async fn import_resource(&self, key: &str, resource: Resource) -> Result<TerraformState, StateStoreError> {
        let existing = self.get_state(key).await;
        let mut state = match existing {
            Ok(state) => (*state).clone(),
            Err(StateStoreError::Backend(BackendError::NotFound(_))) => {
                TerraformState::new_empty(uuid::Uuid::new_v4().to_string())
            }
            Err(other) => return Err(other),
        };
        if state.find_resource(resource.module.as_deref(), &resource.r#type, &resource.name).is_some() {
            return Err(StateStoreError::DuplicateResource(resource.address()));
        }
        state.resources.push(resource);
        self.update_state(key, state).await
    }

    /// Removes a resource or a specific instance, addressed as
    /// `type.name` or `type.name[i]`. Removing the last instance of a
    /// resource removes the resource entirely.
    pub fn remove_resource(&self, state: &mut TerraformState, address: &str) -> Result<(), StateStoreError> {
        let (base, index) = split_indexed_address(address)?;
        let (r#type, name) = base.split_once('.').ok_or_else(|| StateStoreError::InvalidAddress(address.to_owned()))?;
        let position = state
            .resources
            .iter()
            .position(|r| r.r#type == r#type && r.name == name)
            .ok_or_else(|| StateStoreError::ResourceNotFound(address.to_owned()))?;

        match index {
            None => {
                state.resources.remove(position);
            }
            Some(idx) => {
                let resource = &mut state.resources[position];
                if idx >= resource.instances.len() {
                    return Err(StateStoreError::ResourceNotFound(address.to_owned()));
                }
                resource.instances.remove(idx);
                if resource.instances.is_empty() {
                    state.resources.remove(position);
                }
            }
        }
        Ok(())
    }

    /// Moves a resource from one two-part address to another; fails if
    /// the target address already exists.
    pub fn move_resource(&self, state: &mut TerraformState, from: &str, to: &str) -> Result<(), StateStoreError> {
        let (from_type, from_name) =
            from.split_once('.').ok_or_else(|| StateStoreError::InvalidAddress(from.to_owned()))?;
        let (to_type, to_name) =
            to.split_once('.').ok_or_else(|| StateStoreError::InvalidAddress(to.to_owned()))?;

        if state.find_resource(None, to_type, to_name).is_some() {
            return Err(StateStoreError::MoveTargetExists(to.to_owned()));
        }
        let resource = state
            .resources
            .iter_mut()
            .find(|r| r.module.is_none() && r.r#type == from_type && r.name == from_name)
            .ok_or_else(|| StateStoreError::ResourceNotFound(from.to_owned()))?;
        resource.r#type = to_type.to_owned();
        resource.name = to_name.to_owned();
        Ok(())
    }

    /// Merges a mapping `address → attributes` into each matching
    /// instance's attribute map, preserving instance order. Addresses not
    /// present in `actual` are left untouched.
    pub fn refresh_state(
        &self,
        state: &mut TerraformState,
        actual: &std::collections::HashMap<String, driftmgr_common::AttributeMap>,
    ) {
        for resource in &mut state.resources {
            for instance in &mut resource.instances {
                let address = format!("{}.{}{}", resource.r#type, resource.name, instance.index_suffix());
                if let Some(attrs) = actual.get(&address) {
                    for (k, v) in attrs {
                        instance.attributes.insert(k.clone(), v.clone());
                    }
                }
            }
        }
    }

    /// Coarse `type.name`-set comparison between two states. Per spec
    /// §4.2, a resource present in both is flagged `modified` only when
    /// its instance count differs; deeper attribute diffing belongs to the
    /// Drift Engine.
    pub fn compare_states(&self, a: &TerraformState, b: &TerraformState) -> StateComparison {
        let addresses_a: std::collections::HashMap<String, usize> =
            a.resources.iter().map(|r| (r.address(), r.instances.len())).collect();
        let addresses_b: std::collections::HashMap<String, usize> =
            b.resources.iter().map(|r| (r.address(), r.instances.len())).collect();

        let mut added: Vec<String> =
            addresses_b.keys().filter(|addr| !addresses_a.contains_key(*addr)).cloned().collect();
        let mut removed: Vec<String> =
            addresses_a.keys().filter(|addr| !addresses_b.contains_key(*addr)).cloned().collect();
        let mut modified: Vec<String> = addresses_a
            .iter()
            .filter_map(|(addr, count_a)| {
                addresses_b.get(addr).filter(|count_b| *count_b != count_a).map(|_| addr.clone())
            })
            .collect();
        added.sort();
        removed.sort();
        modified.sort();

        StateComparison {
            are_equal: added.is_empty() && removed.is_empty() && modified.is_empty() && a.serial == b.serial,
            serial_diff: b.serial as i64 - a.serial as i64,
            added,
            removed,
            modified,
        }
    }

    pub async fn list_state_versions(&self, _key: &str) -> Result<Vec<StateVersion>, StateStoreError> {
        Ok(self.backend.get_versions().await?)
    }

    /// Parses a historical version's bytes, increments serial, and pushes.
    /// Increments exactly once: `put_state` (unlike `update_state`) does
    /// not auto-increment, since the serial bump already happened here.
    pub async fn restore_state_version(
        &self,
        key: &str,
        version_id: &str,
    ) -> Result<TerraformState, StateStoreError> {
        let data = self.backend.get_version(version_id).await?;
        let mut state = self.parse_and_validate(&data.bytes)?;
        state.serial += 1;
        self.put_state(key, state).await
    }
}

/// Splits `type.name` or `type.name[i]` into the base address and an
/// optional numeric index.
fn split_indexed_address(address: &str) -> Result<(&str, Option<usize>), StateStoreError> {
    if let Some(bracket) = address.find('[') {
        if !address.ends_with(']') {
            return Err(StateStoreError::InvalidAddress(address.to_owned()));
        }
        let base = &address[..bracket];
        let idx_str = &address[bracket + 1..address.len() - 1];
        let idx = idx_str.parse::<usize>().map_err(|_| StateStoreError::InvalidAddress(address.to_owned()))?;
        Ok((base, Some(idx)))
    } else {
        Ok((address, None))
    }
}

/// Used by [`Instance::attributes`] diffing elsewhere; re-exported here so
/// callers building `actual` maps for `refresh_state` don't need a second
/// import for the attribute value type.
pub type RefreshValue = Value;

#[cfg(test)]
mod store_test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use driftmgr_test_utils::{resource_fixture, sample_state, InMemoryBackend};

    use super::*;
    use crate::cache::CacheConfig;

    fn store(backend: Arc<InMemoryBackend>) -> StateStore {
        StateStore::new(
            backend,
            Arc::new(StateCache::new(CacheConfig::default())),
            Validator::with_default_rules(),
            "test-writer".to_owned(),
        )
    }

    /// Wraps an [`InMemoryBackend`], failing the first `fail_count` pushes
    /// with [`BackendError::PreconditionFailed`] before delegating
    /// everything else, to exercise `put_state_inner`'s retry loop without
    /// a real CAS-backed backend.
    struct FlakyBackend {
        inner: InMemoryBackend,
        remaining_failures: AtomicUsize,
    }

    impl FlakyBackend {
        fn new(fail_count: usize) -> Self {
            Self { inner: InMemoryBackend::new(), remaining_failures: AtomicUsize::new(fail_count) }
        }
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        async fn pull(&self) -> Result<StateData, BackendError> {
            self.inner.pull().await
        }

        async fn push(&self, state: StateData) -> Result<(), BackendError> {
            if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { None }
            }).is_ok() {
                return Err(BackendError::PreconditionFailed("generation changed".to_owned()));
            }
            self.inner.push(state).await
        }

        async fn lock(&self, info: LockInfo) -> Result<String, BackendError> {
            self.inner.lock(info).await
        }

        async fn unlock(&self, lock_id: &str) -> Result<(), BackendError> {
            self.inner.unlock(lock_id).await
        }

        async fn get_lock_info(&self) -> Result<Option<LockInfo>, BackendError> {
            self.inner.get_lock_info().await
        }

        async fn get_versions(&self) -> Result<Vec<StateVersion>, BackendError> {
            self.inner.get_versions().await
        }

        async fn get_version(&self, version_id: &str) -> Result<StateData, BackendError> {
            self.inner.get_version(version_id).await
        }

        async fn list_workspaces(&self) -> Result<Vec<driftmgr_backend::WorkspaceName>, BackendError> {
            self.inner.list_workspaces().await
        }

        async fn select_workspace(&self, workspace: driftmgr_backend::WorkspaceName) -> Result<(), BackendError> {
            self.inner.select_workspace(workspace).await
        }

        async fn create_workspace(&self, workspace: driftmgr_backend::WorkspaceName) -> Result<(), BackendError> {
            self.inner.create_workspace(workspace).await
        }

        async fn delete_workspace(&self, workspace: driftmgr_backend::WorkspaceName) -> Result<(), BackendError> {
            self.inner.delete_workspace(workspace).await
        }

        async fn validate(&self) -> Result<(), BackendError> {
            self.inner.validate().await
        }

        fn get_metadata(&self) -> driftmgr_backend::BackendMetadata {
            self.inner.get_metadata()
        }
    }

    #[tokio::test]
    async fn put_state_retries_precondition_failures_and_recovers_serial() {
        let backend = Arc::new(FlakyBackend::new(2));
        let store = StateStore::with_retry_config(
            backend,
            Arc::new(StateCache::new(CacheConfig::default())),
            Validator::with_default_rules(),
            "test-writer".to_owned(),
            RetryConfig { retry_delay_millis: 1, retry_backoff: 1, max_retries: 3 },
        );
        let state = sample_state();
        let result = store.put_state("k", state).await.unwrap();
        // Two retries re-pulled the (still-empty) backend state each time
        // and re-applied serial = current.serial + 1.
        assert_eq!(result.serial, 1);
    }

    #[tokio::test]
    async fn put_state_surfaces_retries_exhausted() {
        let backend = Arc::new(FlakyBackend::new(10));
        let store = StateStore::with_retry_config(
            backend,
            Arc::new(StateCache::new(CacheConfig::default())),
            Validator::with_default_rules(),
            "test-writer".to_owned(),
            RetryConfig { retry_delay_millis: 1, retry_backoff: 1, max_retries: 2 },
        );
        let err = store.put_state("k", sample_state()).await.unwrap_err();
        assert!(matches!(err, StateStoreError::RetriesExhausted(2)));
    }

    #[tokio::test]
    async fn update_state_increments_serial_and_preserves_lineage() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store(backend);
        let initial = sample_state();
        let lineage = initial.lineage.clone();
        let updated = store.update_state("k", initial).await.unwrap();
        assert_eq!(updated.serial, 1);
        assert_eq!(updated.lineage, lineage);
    }

    #[tokio::test]
    async fn concurrent_update_loser_sees_already_locked() {
        let backend = Arc::new(InMemoryBackend::new());
        let store_a = store(backend.clone());
        let held = backend
            .lock(LockInfo {
                id: "holder".into(),
                path: "k".into(),
                operation: "OperationTypeApply".into(),
                who: "holder".into(),
                version: "1.0".into(),
                created: chrono::Utc::now(),
                info: String::new(),
            })
            .await
            .unwrap();
        let err = store_a.update_state("k", sample_state()).await.unwrap_err();
        assert!(matches!(err, StateStoreError::Backend(BackendError::AlreadyLocked { .. })));
        backend.unlock(&held).await.unwrap();
        store_a.update_state("k", sample_state()).await.unwrap();
    }

    #[tokio::test]
    async fn import_resource_rejects_duplicate() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store(backend);
        let resource = resource_fixture("aws_instance", "web");
        store.import_resource("k", resource.clone()).await.unwrap();
        let err = store.import_resource("k", resource).await.unwrap_err();
        assert!(matches!(err, StateStoreError::DuplicateResource(_)));
    }

    #[test]
    fn remove_specific_instance_drops_empty_resource() {
        let store = store(Arc::new(InMemoryBackend::new()));
        let mut state = sample_state();
        state.resources.push(resource_fixture("aws_instance", "solo"));
        store.remove_resource(&mut state, "aws_instance.solo[0]").unwrap();
        assert!(state.find_resource(None, "aws_instance", "solo").is_none());
    }

    #[test]
    fn move_resource_fails_when_target_exists() {
        let store = store(Arc::new(InMemoryBackend::new()));
        let mut state = sample_state();
        state.resources.push(resource_fixture("aws_instance", "a"));
        state.resources.push(resource_fixture("aws_instance", "b"));
        let err = store.move_resource(&mut state, "aws_instance.a", "aws_instance.b").unwrap_err();
        assert!(matches!(err, StateStoreError::MoveTargetExists(_)));
    }

    #[test]
    fn compare_states_reports_added_resource() {
        let store = store(Arc::new(InMemoryBackend::new()));
        let a = sample_state();
        let mut b = a.clone();
        b.resources.push(resource_fixture("aws_s3_bucket", "b"));
        b.serial += 1;
        let comparison = store.compare_states(&a, &b);
        assert!(!comparison.are_equal);
        assert_eq!(comparison.serial_diff, 1);
        assert_eq!(comparison.added, vec!["aws_s3_bucket.b".to_string()]);
        assert!(comparison.removed.is_empty());
        assert!(comparison.modified.is_empty());
    }

    #[tokio::test]
    async fn restore_state_version_increments_serial_exactly_once() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store(backend.clone());
        let initial = sample_state();
        store.put_state("k", initial.clone()).await.unwrap();
        let version_id = backend.get_versions().await.unwrap()[0].id.clone();

        let restored = store.restore_state_version("k", &version_id).await.unwrap();
        assert_eq!(restored.serial, initial.serial + 1);

        let current = store.get_state("k").await.unwrap();
        assert_eq!(current.serial, restored.serial, "pushed state must match what restore_state_version returned");
    }

    #[tokio::test]
    async fn lock_guard_drop_releases_the_lock_without_explicit_release() {
        let backend = Arc::new(InMemoryBackend::new());
        let lock_id = backend
            .lock(LockInfo {
                id: "holder".into(),
                path: "k".into(),
                operation: "OperationTypeApply".into(),
                who: "holder".into(),
                version: "1.0".into(),
                created: chrono::Utc::now(),
                info: String::new(),
            })
            .await
            .unwrap();
        {
            // Dropped without calling `release`, simulating a `with_lock`
            // body that was cancelled or panicked mid-`await`.
            let _guard = LockGuard { backend: backend.clone(), lock_id: Some(lock_id) };
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(backend.get_lock_info().await.unwrap().is_none());
    }
}
