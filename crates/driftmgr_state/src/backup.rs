//! `BackupManager` (spec §4.3): scoped, compressed, optionally encrypted
//! snapshots with rotation, serialized by a single manager mutex.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::model::TerraformState;
use crate::parser::serialize_state;

/// `BackupManager` configuration, named to match spec §6's configuration
/// fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupConfig {
    pub backup_dir: PathBuf,
    pub max_backups: usize,
    pub compress: bool,
    pub encrypt: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { backup_dir: PathBuf::from(".backups"), max_backups: 10, compress: true, encrypt: false }
    }
}

/// Metadata recorded for one backup artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    pub compressed: bool,
    pub encrypted: bool,
    pub state_version: u64,
    pub description: String,
    pub tags: BTreeMap<String, String>,
    /// Filename under `backup_dir`, e.g. `<id>_<unix_ts>.json.gz`.
    file_name: String,
}

#[derive(Default, Serialize, Deserialize)]
struct Index {
    entries: Vec<BackupMetadata>,
}

/// Creates, lists, and restores state snapshots under a root directory,
/// rotating out the oldest artifacts past `max_backups`.
pub struct BackupManager {
    config: BackupConfig,
    index_path: PathBuf,
    index: Mutex<Index>,
    encryption_key: Option<[u8; 32]>,
}

#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("encryption was requested but no key was configured")]
    MissingKey,
    #[error("decryption failed: payload is corrupt or the key is wrong")]
    DecryptionFailed,
    #[error("no backup found with id {0}")]
    NotFound(String),
}

impl BackupManager {
    /// Opens (creating if absent) a `BackupManager` rooted at
    /// `config.backup_dir`, loading its index from the sibling
    /// `metadata.json` file.
    pub fn open(config: BackupConfig, encryption_key: Option<[u8; 32]>) -> Result<Self, BackupError> {
        fs::create_dir_all(&config.backup_dir)?;
        let index_path = config.backup_dir.join("metadata.json");
        let index = if index_path.exists() {
            serde_json::from_slice(&fs::read(&index_path)?)?
        } else {
            Index::default()
        };
        Ok(Self { config, index_path, index: Mutex::new(index), encryption_key })
    }

    fn persist_index(&self, index: &Index) -> Result<(), BackupError> {
        fs::write(&self.index_path, serde_json::to_vec_pretty(index)?)?;
        Ok(())
    }

    /// Serializes `state`, optionally gzip-compresses and encrypts it,
    /// writes `<id>_<unix_ts>.json[.gz]`, records metadata, then rotates
    /// out the oldest artifacts past `max_backups`.
    pub fn create_backup(
        &self,
        id: &str,
        state: &TerraformState,
        description: &str,
        tags: BTreeMap<String, String>,
    ) -> Result<BackupMetadata, BackupError> {
        let mut index = self.index.lock().expect("backup mutex poisoned");

        let plain = serialize_state(state)?;
        let timestamp = Utc::now();
        let mut payload = if self.config.compress { gzip(&plain)? } else { plain };
        if self.config.encrypt {
            payload = encrypt(&payload, self.encryption_key.as_ref().ok_or(BackupError::MissingKey)?)?;
        }

        let extension = if self.config.compress { "json.gz" } else { "json" };
        let file_name = format!("{id}_{}.{extension}", timestamp.timestamp());
        fs::write(self.config.backup_dir.join(&file_name), &payload)?;

        let metadata = BackupMetadata {
            id: id.to_owned(),
            timestamp,
            size: payload.len() as u64,
            compressed: self.config.compress,
            encrypted: self.config.encrypt,
            state_version: state.serial,
            description: description.to_owned(),
            tags,
            file_name,
        };
        index.entries.push(metadata.clone());
        self.rotate(&mut index)?;
        self.persist_index(&index)?;
        Ok(metadata)
    }

    /// Deletes the oldest artifacts (by timestamp encoded in the filename)
    /// past `max_backups`, along with their metadata entries.
    fn rotate(&self, index: &mut Index) -> Result<(), BackupError> {
        index.entries.sort_by_key(|e| e.timestamp);
        while index.entries.len() > self.config.max_backups {
            let oldest = index.entries.remove(0);
            let path = self.config.backup_dir.join(&oldest.file_name);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Returns every retained backup's metadata, newest first.
    pub fn list_backups(&self) -> Vec<BackupMetadata> {
        let mut entries = self.index.lock().expect("backup mutex poisoned").entries.clone();
        entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        entries
    }

    /// Locates the newest artifact matching `id`, decompresses/decrypts
    /// it, and rewrites `<parent>/terraform.tfstate` with the recovered
    /// bytes. Returns the recovered state.
    pub fn restore_backup(&self, id: &str, parent: &Path) -> Result<TerraformState, BackupError> {
        let index = self.index.lock().expect("backup mutex poisoned");
        let metadata = index
            .entries
            .iter()
            .filter(|e| e.id == id)
            .max_by_key(|e| e.timestamp)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(id.to_owned()))?;
        drop(index);

        let mut payload = fs::read(self.config.backup_dir.join(&metadata.file_name))?;
        if metadata.encrypted {
            payload = decrypt(&payload, self.encryption_key.as_ref().ok_or(BackupError::MissingKey)?)?;
        }
        let plain = if metadata.compressed { gunzip(&payload)? } else { payload };

        fs::write(parent.join("terraform.tfstate"), &plain)?;
        Ok(serde_json::from_slice(&plain)?)
    }
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, BackupError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, BackupError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// A fixed all-zero nonce would be unsafe for general AES-GCM use, but
/// each backup is encrypted exactly once under a caller-supplied key that
/// is expected to be unique per backup root; a random nonce is generated
/// per call and prepended to the ciphertext.
fn encrypt(bytes: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, BackupError> {
    use aes_gcm::aead::rand_core::RngCore;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext =
        cipher.encrypt(nonce, bytes).map_err(|_| BackupError::DecryptionFailed)?;
    let mut out = nonce_bytes.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(payload: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, BackupError> {
    if payload.len() < 12 {
        return Err(BackupError::DecryptionFailed);
    }
    let (nonce_bytes, ciphertext) = payload.split_at(12);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher.decrypt(Nonce::from_slice(nonce_bytes), ciphertext).map_err(|_| BackupError::DecryptionFailed)
}

#[cfg(test)]
mod backup_test {
    use super::*;

    fn state(serial: u64) -> TerraformState {
        let mut state = TerraformState::new_empty("abcdefgh".into());
        state.serial = serial;
        state
    }

    #[test]
    fn rotation_keeps_only_max_backups_newest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::open(
            BackupConfig { backup_dir: dir.path().to_path_buf(), max_backups: 3, compress: false, encrypt: false },
            None,
        )
        .unwrap();
        for (i, id) in ["b1", "b2", "b3", "b4", "b5"].iter().enumerate() {
            manager.create_backup(id, &state(i as u64), "", BTreeMap::new()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(1100));
        }
        let retained = manager.list_backups();
        assert_eq!(retained.len(), 3);
        let ids: Vec<&str> = retained.iter().map(|m| m.id.as_str()).collect();
        assert!(ids.iter().all(|id| ["b3", "b4", "b5"].contains(id)));
        assert!(!dir.path().join("b1_0.json").exists());
    }

    #[test]
    fn restore_recovers_the_serialized_state() {
        let dir = tempfile::tempdir().unwrap();
        let parent = tempfile::tempdir().unwrap();
        let manager = BackupManager::open(
            BackupConfig { backup_dir: dir.path().to_path_buf(), max_backups: 10, compress: true, encrypt: false },
            None,
        )
        .unwrap();
        manager.create_backup("snap", &state(7), "pre-remediation", BTreeMap::new()).unwrap();
        let restored = manager.restore_backup("snap", parent.path()).unwrap();
        assert_eq!(restored.serial, 7);
        assert!(parent.path().join("terraform.tfstate").exists());
    }

    #[test]
    fn encrypted_backup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let parent = tempfile::tempdir().unwrap();
        let key = [7u8; 32];
        let manager = BackupManager::open(
            BackupConfig { backup_dir: dir.path().to_path_buf(), max_backups: 10, compress: true, encrypt: true },
            Some(key),
        )
        .unwrap();
        manager.create_backup("secure", &state(3), "", BTreeMap::new()).unwrap();
        let restored = manager.restore_backup("secure", parent.path()).unwrap();
        assert_eq!(restored.serial, 3);
    }

    #[test]
    fn restoring_unknown_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let parent = tempfile::tempdir().unwrap();
        let manager = BackupManager::open(
            BackupConfig { backup_dir: dir.path().to_path_buf(), max_backups: 10, compress: false, encrypt: false },
            None,
        )
        .unwrap();
        assert!(matches!(manager.restore_backup("nope", parent.path()), Err(BackupError::NotFound(_))));
    }
}
