//! Tracking state persistence
//!
//! The poller reads a [`TrackingState`] once at the start of a scheduled poll
//! and writes it once at the end through a [`StateStore`]. The file-backed
//! store keeps one JSON document per tracking unit and replaces it atomically.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::detector::TrackingState;
use crate::errors::{AppError, AppResult};
use crate::ews::distinguished_folder_name;

/// Longest file name stem written verbatim; keeps temp names under `NAME_MAX`
const MAX_STEM_BYTES: usize = 160;
/// Hex digest characters appended to a truncated stem
const DIGEST_CHARS: usize = 16;

/// Identity of one tracking unit: an account and a monitored folder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingKey {
    /// Configured account identifier
    pub account_id: String,
    /// Folder id or distinguished folder name, normalized
    pub folder: String,
}

impl TrackingKey {
    /// Build a key, folding distinguished folder names to lowercase
    ///
    /// `Inbox` and `inbox` address the same folder and must share state;
    /// opaque folder ids are case-sensitive and kept verbatim.
    pub fn new(account_id: impl Into<String>, folder: &str) -> Self {
        let folder = folder.trim();
        let folder = distinguished_folder_name(folder).map_or_else(|| folder.to_owned(), str::to_owned);
        Self {
            account_id: account_id.into(),
            folder,
        }
    }

    /// File name stem safe for any folder id
    ///
    /// Stems longer than [`MAX_STEM_BYTES`] are cut and suffixed with a digest
    /// of the full stem. A shortened stem is one byte longer than any verbatim
    /// stem, so the two forms never collide.
    fn file_stem(&self) -> String {
        let stem = format!(
            "{}__{}",
            urlencoding::encode(&self.account_id),
            urlencoding::encode(&self.folder)
        );
        if stem.len() <= MAX_STEM_BYTES {
            return stem;
        }
        // percent-encoded, so ASCII and safe to slice at any byte
        let digest = format!("{:x}", Sha256::digest(stem.as_bytes()));
        format!(
            "{}~{}",
            &stem[..MAX_STEM_BYTES - DIGEST_CHARS],
            &digest[..DIGEST_CHARS]
        )
    }
}

/// Host-provided persistence for tracking state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load state for `key`; a unit that was never saved yields the default
    async fn load(&self, key: &TrackingKey) -> AppResult<TrackingState>;

    /// Replace the stored state for `key`
    async fn save(&self, key: &TrackingKey, state: &TrackingState) -> AppResult<()>;

    /// Delete the stored state; returns whether anything was removed
    async fn clear(&self, key: &TrackingKey) -> AppResult<bool>;
}

/// On-disk document; the key and timestamp are informational
#[derive(Debug, Serialize, Deserialize)]
struct StoredState {
    account_id: String,
    folder: String,
    updated_at: DateTime<Utc>,
    #[serde(flatten)]
    state: TrackingState,
}

/// JSON-file state store rooted at a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Create a store; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the state files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &TrackingKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, key: &TrackingKey) -> AppResult<TrackingState> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no tracking state stored yet");
                return Ok(TrackingState::default());
            }
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "failed to read tracking state {}: {e}",
                    path.display()
                )));
            }
        };

        let stored: StoredState = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Internal(format!(
                "malformed tracking state {}: {e}",
                path.display()
            ))
        })?;
        Ok(stored.state)
    }

    async fn save(&self, key: &TrackingKey, state: &TrackingState) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            AppError::StatePersist(format!(
                "cannot create state directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let document = StoredState {
            account_id: key.account_id.clone(),
            folder: key.folder.clone(),
            updated_at: Utc::now(),
            state: state.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| AppError::StatePersist(format!("serialization failure: {e}")))?;

        let path = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key.file_stem(), Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            AppError::StatePersist(format!("cannot write {}: {e}", tmp.display()))
        })?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::StatePersist(format!(
                "cannot replace {}: {e}",
                path.display()
            )));
        }

        debug!(
            path = %path.display(),
            known_ids = state.known_ids.len(),
            "tracking state saved"
        );
        Ok(())
    }

    async fn clear(&self, key: &TrackingKey) -> AppResult<bool> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Internal(format!(
                "cannot remove {}: {e}",
                path.display()
            ))),
        }
    }
}

/// In-memory store used by poller tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    pub states: tokio::sync::Mutex<std::collections::HashMap<TrackingKey, TrackingState>>,
    pub saves: std::sync::atomic::AtomicUsize,
    pub fail_saves: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &TrackingKey) -> AppResult<TrackingState> {
        Ok(self.states.lock().await.get(key).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &TrackingKey, state: &TrackingState) -> AppResult<()> {
        use std::sync::atomic::Ordering;

        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AppError::StatePersist("store is read-only".to_owned()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.states.lock().await.insert(key.clone(), state.clone());
        Ok(())
    }

    async fn clear(&self, key: &TrackingKey) -> AppResult<bool> {
        Ok(self.states.lock().await.remove(key).is_some())
    }
}
