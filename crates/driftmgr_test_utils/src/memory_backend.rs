//! A deterministic, in-process [`Backend`] implementation, standing in
//! for a real remote backend in tests that only care about the State
//! Store's behavior.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use driftmgr_backend::{Backend, BackendError, BackendKind, BackendMetadata, LockInfo, StateData, StateVersion, WorkspaceName};
use driftmgr_common::canonical::content_hash;

struct Inner {
    workspaces: HashMap<WorkspaceName, StateData>,
    current_workspace: WorkspaceName,
    lock: Option<(String, LockInfo)>,
    versions: Vec<StateVersion>,
}

/// An in-memory stand-in for a remote state backend: supports locking,
/// workspaces, and a push-ordered version history, all held in a single
/// `Mutex` so behavior is deterministic under concurrent access.
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                workspaces: HashMap::new(),
                current_workspace: driftmgr_backend::DEFAULT_WORKSPACE.to_owned(),
                lock: None,
                versions: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn pull(&self) -> Result<StateData, BackendError> {
        let inner = self.inner.lock().expect("memory backend mutex poisoned");
        Ok(inner.workspaces.get(&inner.current_workspace).cloned().unwrap_or_else(StateData::empty_initial))
    }

    async fn push(&self, state: StateData) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().expect("memory backend mutex poisoned");
        let workspace = inner.current_workspace.clone();
        for version in &mut inner.versions {
            version.is_latest = false;
        }
        inner.versions.push(StateVersion {
            id: uuid::Uuid::new_v4().to_string(),
            serial: state.serial.unwrap_or_default(),
            created: chrono::Utc::now(),
            checksum: serde_json::from_slice::<serde_json::Value>(&state.bytes).map(|v| content_hash(&v)).unwrap_or_default(),
            size: state.bytes.len() as u64,
            is_latest: true,
            description: String::new(),
        });
        inner.workspaces.insert(workspace, state);
        Ok(())
    }

    async fn lock(&self, info: LockInfo) -> Result<String, BackendError> {
        let mut inner = self.inner.lock().expect("memory backend mutex poisoned");
        if let Some((_, existing)) = &inner.lock {
            return Err(BackendError::AlreadyLocked { lock_info: existing.clone() });
        }
        let lock_id = format!("{}-{}", info.id, chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default());
        inner.lock = Some((lock_id.clone(), info));
        Ok(lock_id)
    }

    async fn unlock(&self, lock_id: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().expect("memory backend mutex poisoned");
        match &inner.lock {
            Some((held_id, _)) if held_id == lock_id => {
                inner.lock = None;
                Ok(())
            }
            _ => Err(BackendError::UnknownLockId(lock_id.to_owned())),
        }
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>, BackendError> {
        Ok(self.inner.lock().expect("memory backend mutex poisoned").lock.as_ref().map(|(_, info)| info.clone()))
    }

    async fn get_versions(&self) -> Result<Vec<StateVersion>, BackendError> {
        let mut versions = self.inner.lock().expect("memory backend mutex poisoned").versions.clone();
        versions.sort_by_key(|v| std::cmp::Reverse(v.created));
        Ok(versions)
    }

    async fn get_version(&self, version_id: &str) -> Result<StateData, BackendError> {
        let inner = self.inner.lock().expect("memory backend mutex poisoned");
        let version = inner.versions.iter().find(|v| v.id == version_id).ok_or(BackendError::NotFound(version_id.to_owned()))?;
        // The fixture keeps only the latest blob per workspace; historical
        // lookups return the workspace's current bytes, which is
        // sufficient for exercising `restore_state_version`'s call shape.
        let _ = version;
        inner
            .workspaces
            .get(&inner.current_workspace)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(version_id.to_owned()))
    }

    async fn list_workspaces(&self) -> Result<Vec<WorkspaceName>, BackendError> {
        let inner = self.inner.lock().expect("memory backend mutex poisoned");
        let mut names: Vec<WorkspaceName> = inner.workspaces.keys().cloned().collect();
        if !names.contains(&driftmgr_backend::DEFAULT_WORKSPACE.to_owned()) {
            names.push(driftmgr_backend::DEFAULT_WORKSPACE.to_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn select_workspace(&self, workspace: WorkspaceName) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().expect("memory backend mutex poisoned");
        if workspace != driftmgr_backend::DEFAULT_WORKSPACE && !inner.workspaces.contains_key(&workspace) {
            return Err(BackendError::NotFound(workspace));
        }
        inner.current_workspace = workspace;
        Ok(())
    }

    async fn create_workspace(&self, workspace: WorkspaceName) -> Result<(), BackendError> {
        if workspace == driftmgr_backend::DEFAULT_WORKSPACE {
            return Err(BackendError::Unsupported("default workspace cannot be created or deleted".to_owned()));
        }
        let mut inner = self.inner.lock().expect("memory backend mutex poisoned");
        inner.workspaces.entry(workspace).or_insert_with(StateData::empty_initial);
        Ok(())
    }

    async fn delete_workspace(&self, workspace: WorkspaceName) -> Result<(), BackendError> {
        if workspace == driftmgr_backend::DEFAULT_WORKSPACE {
            return Err(BackendError::Unsupported("default workspace cannot be created or deleted".to_owned()));
        }
        let mut inner = self.inner.lock().expect("memory backend mutex poisoned");
        inner.workspaces.remove(&workspace);
        if inner.current_workspace == workspace {
            inner.current_workspace = driftmgr_backend::DEFAULT_WORKSPACE.to_owned();
        }
        Ok(())
    }

    async fn validate(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn get_metadata(&self) -> BackendMetadata {
        let inner = self.inner.lock().expect("memory backend mutex poisoned");
        BackendMetadata {
            kind: BackendKind::Local,
            supports_locking: true,
            supports_versions: true,
            supports_workspaces: true,
            workspace: inner.current_workspace.clone(),
            state_key: "terraform.tfstate".to_owned(),
            lock_table: None,
            configuration: BTreeMap::new(),
        }
    }
}
