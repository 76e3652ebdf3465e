//! Durable storage for pending request metadata.
//!
//! Only metadata is stored. The callables themselves live in memory and do
//! not survive a restart; restored entries keep the pending count accurate
//! until they are replayed (and dropped as unreplayable) or cleared.

use crate::config::PathsConfig;
use crate::queue::atomic::{atomic_read_json, atomic_write_json};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One persisted queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRequest {
    pub id: String,
    /// Human-readable target, e.g. `"POST /orders/42/rating"`.
    pub description: String,
    pub enqueued_at: DateTime<Utc>,
}

/// The JSON root object.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct QueueStoreData {
    requests: Vec<PersistedRequest>,
}

/// Durable key-value slot holding the ordered queue metadata.
pub trait QueueStore: Send + Sync {
    /// Load all persisted entries, oldest first.
    fn load(&self) -> Result<Vec<PersistedRequest>>;

    /// Replace the persisted entries.
    fn save(&self, requests: &[PersistedRequest]) -> Result<()>;
}

pub type DynQueueStore = Arc<dyn QueueStore>;

/// Queue metadata in `{data_dir}/pending-requests.json`.
pub struct JsonQueueStore {
    path: PathBuf,
}

impl JsonQueueStore {
    pub fn new(data_dir: &Path) -> Self {
        Self::at_path(data_dir.join(PathsConfig::QUEUE_FILE_NAME))
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueueStore for JsonQueueStore {
    fn load(&self) -> Result<Vec<PersistedRequest>> {
        Ok(atomic_read_json::<QueueStoreData>(&self.path)?
            .unwrap_or_default()
            .requests)
    }

    fn save(&self, requests: &[PersistedRequest]) -> Result<()> {
        debug!(
            "Writing {} pending requests to {}",
            requests.len(),
            self.path.display()
        );
        atomic_write_json(
            &self.path,
            &QueueStoreData {
                requests: requests.to_vec(),
            },
        )
    }
}

/// Non-durable store for tests and for hosts without writable storage.
#[derive(Default)]
pub struct MemoryQueueStore {
    requests: Mutex<Vec<PersistedRequest>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requests(requests: Vec<PersistedRequest>) -> Self {
        Self {
            requests: Mutex::new(requests),
        }
    }
}

impl QueueStore for MemoryQueueStore {
    fn load(&self) -> Result<Vec<PersistedRequest>> {
        Ok(self
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, requests: &[PersistedRequest]) -> Result<()> {
        *self
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = requests.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str) -> PersistedRequest {
        PersistedRequest {
            id: id.to_string(),
            description: format!("POST /orders/{}", id),
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let store = JsonQueueStore::new(tmp.path());

        store.save(&[entry("a"), entry("b"), entry("c")]).unwrap();
        let ids: Vec<String> = store.load().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_load_empty() {
        let tmp = TempDir::new().unwrap();
        let store = JsonQueueStore::new(tmp.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_empty_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = JsonQueueStore::new(tmp.path());
        store.save(&[entry("a")]).unwrap();
        store.save(&[]).unwrap();
        assert!(store.load().unwrap().is_empty());
        assert!(store.path().exists());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryQueueStore::with_requests(vec![entry("x")]);
        assert_eq!(store.load().unwrap().len(), 1);
        store.save(&[]).unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
