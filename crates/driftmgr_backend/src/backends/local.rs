//! Local filesystem backend (spec §4.1, §6): state stored at
//! `<basepath>/<key>`, written via temp-file-then-rename; lock is an
//! exclusive lock-file with a TTL; versions are synthesized from a backup
//! written on every push.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use driftmgr_common::canonical::content_hash;
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;

use crate::backend::{workspace_key, Backend};
use crate::error::BackendError;
use crate::types::{
    BackendKind, BackendMetadata, LockInfo, StateData, StateVersion, WorkspaceName,
    DEFAULT_WORKSPACE,
};

/// How stale a lock file may be before a new acquirer is allowed to steal
/// it (spec §4.1 "lock is an exclusive lock-file with TTL").
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(600);

pub struct LocalBackend {
    base_path: PathBuf,
    base_key: String,
    workspace: AsyncMutex<WorkspaceName>,
    lock_ttl: Duration,
}

impl LocalBackend {
    pub fn new(base_path: impl Into<PathBuf>, base_key: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_key: base_key.into(),
            workspace: AsyncMutex::new(DEFAULT_WORKSPACE.to_owned()),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    async fn current_key(&self) -> String {
        let workspace = self.workspace.lock().await;
        workspace_key(&self.base_key, &workspace)
    }

    fn state_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{key}.lock"))
    }

    fn backups_dir(&self, key: &str) -> PathBuf {
        self.base_path.join(".backups").join(key)
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = PathBuf::from(format!("{}.tmp-{}", path.display(), uuid::Uuid::new_v4()));
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn snapshot_for_versions(&self, key: &str, bytes: &[u8], serial: u64) -> Result<(), BackendError> {
        let dir = self.backups_dir(key);
        fs::create_dir_all(&dir).await?;
        let ts = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = dir.join(format!("{serial:020}_{ts}.json"));
        fs::write(path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn pull(&self) -> Result<StateData, BackendError> {
        let path = self.state_path(&self.current_key().await);
        match fs::read(&path).await {
            Ok(bytes) => Ok(StateData { bytes, serial: None, lineage: None }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateData::empty_initial()),
            Err(e) => Err(e.into()),
        }
    }

    async fn push(&self, state: StateData) -> Result<(), BackendError> {
        let key = self.current_key().await;
        let path = self.state_path(&key);
        let doc: serde_json::Value = serde_json::from_slice(&state.bytes)?;
        let serial = doc.get("serial").and_then(|s| s.as_u64()).unwrap_or(0);
        self.write_atomic(&path, &state.bytes).await?;
        self.snapshot_for_versions(&key, &state.bytes, serial).await?;
        Ok(())
    }

    async fn lock(&self, info: LockInfo) -> Result<String, BackendError> {
        let key = self.current_key().await;
        let lock_path = self.lock_path(&key);
        if let Ok(existing_bytes) = fs::read(&lock_path).await {
            let existing: LockInfo = serde_json::from_slice(&existing_bytes)?;
            let age = Utc::now().signed_duration_since(existing.created);
            if age.to_std().map(|d| d < self.lock_ttl).unwrap_or(true) {
                return Err(BackendError::AlreadyLocked { lock_info: existing });
            }
            // Stale: fall through and steal it.
        }
        let now_nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let lock_id = format!("{}-{now_nanos}", info.id);
        self.write_atomic(&lock_path, &serde_json::to_vec(&info)?).await?;
        Ok(lock_id)
    }

    async fn unlock(&self, lock_id: &str) -> Result<(), BackendError> {
        let key = self.current_key().await;
        let lock_path = self.lock_path(&key);
        match fs::read(&lock_path).await {
            Ok(bytes) => {
                let existing: LockInfo = serde_json::from_slice(&bytes)?;
                if !lock_id.starts_with(&format!("{}-", existing.id)) {
                    return Err(BackendError::UnknownLockId(lock_id.to_owned()));
                }
                fs::remove_file(&lock_path).await?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>, BackendError> {
        let key = self.current_key().await;
        match fs::read(self.lock_path(&key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_versions(&self) -> Result<Vec<StateVersion>, BackendError> {
        let key = self.current_key().await;
        let dir = self.backups_dir(&key);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        names.sort();
        let latest = names.last().cloned();
        let mut versions = Vec::with_capacity(names.len());
        for name in names.into_iter().rev() {
            let bytes = fs::read(dir.join(&name)).await?;
            let doc: serde_json::Value = serde_json::from_slice(&bytes)?;
            let serial = doc.get("serial").and_then(|s| s.as_u64()).unwrap_or(0);
            versions.push(StateVersion {
                id: name.clone(),
                serial,
                created: version_timestamp(&name),
                checksum: content_hash(&doc),
                size: bytes.len() as u64,
                is_latest: Some(&name) == latest.as_ref(),
                description: String::new(),
            });
        }
        Ok(versions)
    }

    async fn get_version(&self, version_id: &str) -> Result<StateData, BackendError> {
        let key = self.current_key().await;
        let path = self.backups_dir(&key).join(version_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(StateData { bytes, serial: None, lineage: None }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(format!("version {version_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_workspaces(&self) -> Result<Vec<WorkspaceName>, BackendError> {
        let dir = self.base_path.join(self.base_key.rsplit_once('/').map(|(d, _)| d).unwrap_or(""));
        let env_dir = dir.join("env:");
        let mut workspaces = vec![DEFAULT_WORKSPACE.to_owned()];
        if let Ok(mut entries) = fs::read_dir(&env_dir).await {
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        workspaces.push(name.to_owned());
                    }
                }
            }
        }
        Ok(workspaces)
    }

    async fn select_workspace(&self, workspace: WorkspaceName) -> Result<(), BackendError> {
        if workspace != DEFAULT_WORKSPACE {
            let key = workspace_key(&self.base_key, &workspace);
            if fs::metadata(self.state_path(&key)).await.is_err() {
                return Err(BackendError::NotFound(format!("workspace {workspace}")));
            }
        }
        *self.workspace.lock().await = workspace;
        Ok(())
    }

    async fn create_workspace(&self, workspace: WorkspaceName) -> Result<(), BackendError> {
        if workspace == DEFAULT_WORKSPACE {
            return Err(BackendError::Unsupported("cannot create the default workspace".into()));
        }
        let key = workspace_key(&self.base_key, &workspace);
        self.write_atomic(&self.state_path(&key), &StateData::empty_initial().bytes).await
    }

    async fn delete_workspace(&self, workspace: WorkspaceName) -> Result<(), BackendError> {
        if workspace == DEFAULT_WORKSPACE {
            return Err(BackendError::Unsupported("the default workspace cannot be deleted".into()));
        }
        let key = workspace_key(&self.base_key, &workspace);
        match fs::remove_file(self.state_path(&key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(format!("workspace {workspace}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn validate(&self) -> Result<(), BackendError> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    fn get_metadata(&self) -> BackendMetadata {
        let mut configuration = BTreeMap::new();
        configuration.insert("base_path".to_owned(), self.base_path.display().to_string());
        BackendMetadata {
            kind: BackendKind::Local,
            supports_locking: true,
            supports_versions: true,
            supports_workspaces: true,
            workspace: "default".to_owned(),
            state_key: self.base_key.clone(),
            lock_table: None,
            configuration,
        }
    }
}

fn version_timestamp(name: &str) -> chrono::DateTime<Utc> {
    name.split('_')
        .nth(1)
        .and_then(|s| s.split('.').next())
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(chrono::DateTime::from_timestamp_nanos_opt_compat)
        .unwrap_or_else(Utc::now)
}

/// `DateTime::from_timestamp_nanos` was stabilized late; this helper keeps
/// the call site readable regardless of which chrono minor version is
/// pinned.
trait FromTimestampNanosOptCompat {
    fn from_timestamp_nanos_opt_compat(nanos: i64) -> Option<chrono::DateTime<Utc>>;
}

impl FromTimestampNanosOptCompat for chrono::DateTime<Utc> {
    fn from_timestamp_nanos_opt_compat(nanos: i64) -> Option<chrono::DateTime<Utc>> {
        chrono::DateTime::from_timestamp(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32)
    }
}

#[cfg(test)]
mod local_test {
    use driftmgr_test_utils::lock_info_fixture;

    use super::*;

    fn backend(dir: &tempfile::TempDir) -> LocalBackend {
        LocalBackend::new(dir.path(), "terraform.tfstate")
    }

    #[tokio::test]
    async fn pull_on_missing_object_returns_empty_initial_state() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir);
        let state = backend.pull().await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&state.bytes).unwrap();
        assert_eq!(doc["version"], 4);
        assert_eq!(doc["serial"], 0);
    }

    #[tokio::test]
    async fn push_then_pull_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir);
        let bytes = serde_json::to_vec(&serde_json::json!({
            "version": 4, "terraform_version": "1.5.0", "serial": 1,
            "lineage": "abcdefgh", "outputs": {}, "resources": [],
        }))
        .unwrap();
        backend.push(StateData { bytes: bytes.clone(), serial: None, lineage: None }).await.unwrap();
        let pulled = backend.pull().await.unwrap();
        assert_eq!(pulled.bytes, bytes);
    }

    #[tokio::test]
    async fn second_lock_attempt_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir);
        let info = lock_info_fixture("writer-a");
        backend.lock(info.clone()).await.unwrap();
        let err = backend.lock(lock_info_fixture("writer-b")).await.unwrap_err();
        match err {
            BackendError::AlreadyLocked { lock_info } => assert_eq!(lock_info.who, "writer-a"),
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unlock_with_wrong_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir);
        backend.lock(lock_info_fixture("writer-a")).await.unwrap();
        let err = backend.unlock("not-the-real-id").await.unwrap_err();
        assert!(matches!(err, BackendError::UnknownLockId(_)));
    }

    #[tokio::test]
    async fn unlock_then_relock_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir);
        let lock_id = backend.lock(lock_info_fixture("writer-a")).await.unwrap();
        backend.unlock(&lock_id).await.unwrap();
        backend.lock(lock_info_fixture("writer-b")).await.unwrap();
    }

    #[tokio::test]
    async fn versions_accumulate_one_per_push() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir);
        for serial in 0..3u64 {
            let bytes = serde_json::to_vec(&serde_json::json!({
                "version": 4, "terraform_version": "1.5.0", "serial": serial,
                "lineage": "abcdefgh", "outputs": {}, "resources": [],
            }))
            .unwrap();
            backend.push(StateData { bytes, serial: None, lineage: None }).await.unwrap();
        }
        let versions = backend.get_versions().await.unwrap();
        assert_eq!(versions.len(), 3);
        assert!(versions[0].is_latest);
        assert_eq!(versions[0].serial, 2);
    }

    #[tokio::test]
    async fn default_workspace_cannot_be_created_or_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir);
        assert!(backend.create_workspace("default".to_owned()).await.is_err());
        assert!(backend.delete_workspace("default".to_owned()).await.is_err());
    }

    #[tokio::test]
    async fn non_default_workspace_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir);
        backend.create_workspace("staging".to_owned()).await.unwrap();
        backend.select_workspace("staging".to_owned()).await.unwrap();
        let bytes = serde_json::to_vec(&serde_json::json!({
            "version": 4, "terraform_version": "1.5.0", "serial": 5,
            "lineage": "stagingln", "outputs": {}, "resources": [],
        }))
        .unwrap();
        backend.push(StateData { bytes, serial: None, lineage: None }).await.unwrap();

        backend.select_workspace("default".to_owned()).await.unwrap();
        let default_state = backend.pull().await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&default_state.bytes).unwrap();
        assert_eq!(doc["serial"], 0, "default workspace state must be untouched");
    }
}
