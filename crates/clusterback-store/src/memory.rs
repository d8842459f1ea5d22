//! In-memory version store for testing and dry runs.

use crate::{StoreError, StoreResult, Version, VersionId, VersionStore, PAYLOAD_FILE};
use async_trait::async_trait;
use chrono::Utc;
use clusterback_util::Identifier;
use std::path::PathBuf;
use std::sync::RwLock;
use tokio::fs;
use tracing::debug;

struct Entry {
    version: Version,
    payload: Vec<u8>,
}

/// In-memory version store.
///
/// Nothing is persisted. Ids are monotonic `ver_<ulid>` identifiers, so they
/// sort chronologically.
pub struct MemoryVersionStore {
    entries: RwLock<Vec<Entry>>,
    checkout_dir: Option<PathBuf>,
}

impl MemoryVersionStore {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            checkout_dir: None,
        }
    }

    /// Directory that [`VersionStore::checkout`] materializes payloads into.
    pub fn with_checkout_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkout_dir = Some(dir.into());
        self
    }

    fn find<T>(&self, id: &VersionId, f: impl FnOnce(&Entry) -> T) -> StoreResult<T> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        entries
            .iter()
            .find(|e| &e.version.id == id)
            .map(f)
            .ok_or_else(|| StoreError::not_found(id.as_str()))
    }
}

impl Default for MemoryVersionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn append(&self, payload: &[u8], label: &str) -> StoreResult<VersionId> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        let version = Version {
            id: VersionId::from_string(Identifier::version()),
            label: label.to_string(),
            timestamp: Utc::now(),
            parent: entries.last().map(|e| e.version.id.clone()),
        };
        let id = version.id.clone();
        debug!(version = %id, bytes = payload.len(), "Appending version");

        entries.push(Entry {
            version,
            payload: payload.to_vec(),
        });
        Ok(id)
    }

    async fn latest(&self) -> StoreResult<Option<Version>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        Ok(entries.last().map(|e| e.version.clone()))
    }

    async fn list(&self) -> StoreResult<Vec<Version>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        Ok(entries.iter().map(|e| e.version.clone()).collect())
    }

    async fn version(&self, id: &VersionId) -> StoreResult<Version> {
        self.find(id, |e| e.version.clone())
    }

    async fn get(&self, id: &VersionId) -> StoreResult<Vec<u8>> {
        self.find(id, |e| e.payload.clone())
    }

    async fn checkout(&self, id: &VersionId) -> StoreResult<PathBuf> {
        let payload = self.get(id).await?;
        let base = self.checkout_dir.as_ref().ok_or_else(|| {
            StoreError::operation_failed("memory store has no checkout directory configured")
        })?;

        let dir = base.join(id.as_str());
        fs::create_dir_all(&dir).await?;
        let path = dir.join(PAYLOAD_FILE);
        fs::write(&path, payload).await?;
        Ok(path)
    }
}
