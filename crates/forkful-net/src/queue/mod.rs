//! Pending request queue.
//!
//! An ordered, durable list of deferred side-effecting calls. The in-memory
//! queue is the source of truth for the running process; every mutation is
//! mirrored to a [`QueueStore`] on a best-effort basis.

mod atomic;
mod store;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use store::{DynQueueStore, JsonQueueStore, MemoryQueueStore, PersistedRequest, QueueStore};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Future returned by a queued call.
pub type ApiFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A zero-argument call with its endpoint and payload already bound.
pub type ApiFunction = Arc<dyn Fn() -> ApiFuture + Send + Sync + 'static>;

/// Wrap an async closure as an [`ApiFunction`].
pub fn api_function<F, Fut>(f: F) -> ApiFunction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || -> ApiFuture { Box::pin(f()) })
}

/// A deferred call awaiting replay.
#[derive(Clone)]
pub struct PendingRequest {
    pub id: String,
    pub description: String,
    pub enqueued_at: DateTime<Utc>,
    api_function: Option<ApiFunction>,
    /// Enqueue sequence; distinguishes a re-enqueued id from the entry it replaced.
    seq: u64,
}

impl PendingRequest {
    /// New request with a generated id.
    pub fn new(description: impl Into<String>, api_function: ApiFunction) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), description, api_function)
    }

    /// New request with a caller-chosen id, for callers that dedupe.
    pub fn with_id(
        id: impl Into<String>,
        description: impl Into<String>,
        api_function: ApiFunction,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            enqueued_at: Utc::now(),
            api_function: Some(api_function),
            seq: 0,
        }
    }

    fn restored(persisted: PersistedRequest) -> Self {
        Self {
            id: persisted.id,
            description: persisted.description,
            enqueued_at: persisted.enqueued_at,
            api_function: None,
            seq: 0,
        }
    }

    /// The live callable. `None` for entries restored from a previous process.
    pub fn api_function(&self) -> Option<&ApiFunction> {
        self.api_function.as_ref()
    }

    pub fn is_replayable(&self) -> bool {
        self.api_function.is_some()
    }

    pub fn to_persisted(&self) -> PersistedRequest {
        PersistedRequest {
            id: self.id.clone(),
            description: self.description.clone(),
            enqueued_at: self.enqueued_at,
        }
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("enqueued_at", &self.enqueued_at)
            .field("replayable", &self.is_replayable())
            .finish()
    }
}

struct QueueInner {
    entries: VecDeque<PendingRequest>,
    next_seq: u64,
    initialized: bool,
    /// Bumped on every mutation that reaches storage.
    version: u64,
}

/// Queue contents staged for storage, tagged with the mutation that produced them.
struct StagedWrite {
    version: u64,
    records: Vec<PersistedRequest>,
}

/// FIFO queue of pending requests with durable metadata.
///
/// Storage I/O runs on the calling thread but outside the queue lock, so
/// readers such as [`count`](Self::count) never wait on the disk. Writes are
/// versioned; a write staged before a newer one is skipped.
pub struct PendingRequestQueue {
    store: DynQueueStore,
    inner: Mutex<QueueInner>,
    written: Mutex<u64>,
}

impl PendingRequestQueue {
    pub fn new(store: DynQueueStore) -> Self {
        Self {
            store,
            inner: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                next_seq: 1,
                initialized: false,
                version: 0,
            }),
            written: Mutex::new(0),
        }
    }

    /// Non-durable queue.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryQueueStore::new()))
    }

    /// Load persisted metadata. Idempotent; later calls do nothing.
    ///
    /// Restored entries are older than anything enqueued in this process,
    /// so they go in front, and the merged queue is written back. Until
    /// this runs nothing is written, so entries enqueued early never clobber
    /// the previous session's file. A storage failure is logged and leaves
    /// the in-memory queue as is.
    pub fn initialize(&self) {
        if self.lock().initialized {
            return;
        }

        let loaded = self.store.load();

        let staged = {
            let mut inner = self.lock();
            if inner.initialized {
                return;
            }
            inner.initialized = true;

            let persisted = match loaded {
                Ok(persisted) => persisted,
                Err(e) => {
                    warn!("Failed to load pending requests, starting empty: {}", e);
                    return;
                }
            };

            let live: HashSet<String> = inner.entries.iter().map(|r| r.id.clone()).collect();
            let mut restored: Vec<PendingRequest> = persisted
                .into_iter()
                .filter(|p| !live.contains(&p.id))
                .map(PendingRequest::restored)
                .collect();
            for request in restored.iter_mut() {
                request.seq = inner.next_seq;
                inner.next_seq += 1;
            }

            if !restored.is_empty() {
                info!(
                    "Restored {} pending requests from a previous session",
                    restored.len()
                );
            }
            for request in restored.into_iter().rev() {
                inner.entries.push_front(request);
            }
            Self::stage(&mut inner)
        };
        self.write(staged);
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Append a request. An entry with the same id is replaced: the new one
    /// is added at the back, then the old one removed.
    pub fn enqueue(&self, mut request: PendingRequest) -> String {
        let id = request.id.clone();
        let staged = {
            let mut inner = self.lock();

            request.seq = inner.next_seq;
            inner.next_seq += 1;
            let seq = request.seq;
            inner.entries.push_back(request);
            let before = inner.entries.len();
            inner.entries.retain(|r| r.id != id || r.seq == seq);
            if inner.entries.len() < before {
                debug!("Replaced pending request {}", id);
            }

            debug!("Queued request {} ({} pending)", id, inner.entries.len());
            Self::stage(&mut inner)
        };
        self.write(staged);
        id
    }

    /// Snapshot of the queue, oldest first.
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Empty the queue and persist the empty state.
    pub fn clear(&self) {
        let (dropped, staged) = {
            let mut inner = self.lock();
            let dropped = inner.entries.len();
            inner.entries.clear();
            (dropped, Self::stage(&mut inner))
        };
        self.write(staged);
        if dropped > 0 {
            info!("Cleared {} pending requests", dropped);
        }
    }

    /// Remove exactly the given entries, leaving anything enqueued after
    /// they were snapshotted (including a re-enqueue of the same id).
    pub fn remove(&self, requests: &[PendingRequest]) -> usize {
        if requests.is_empty() {
            return 0;
        }
        let seqs: HashSet<u64> = requests.iter().map(|r| r.seq).collect();
        let (removed, staged) = {
            let mut inner = self.lock();
            let before = inner.entries.len();
            inner.entries.retain(|r| !seqs.contains(&r.seq));
            let removed = before - inner.entries.len();
            let staged = if removed > 0 {
                Self::stage(&mut inner)
            } else {
                None
            };
            (removed, staged)
        };
        self.write(staged);
        removed
    }

    /// Capture the current entries for storage. Nothing is staged before
    /// [`initialize`](Self::initialize).
    fn stage(inner: &mut QueueInner) -> Option<StagedWrite> {
        if !inner.initialized {
            return None;
        }
        inner.version += 1;
        Some(StagedWrite {
            version: inner.version,
            records: inner.entries.iter().map(PendingRequest::to_persisted).collect(),
        })
    }

    fn write(&self, staged: Option<StagedWrite>) {
        let Some(staged) = staged else {
            return;
        };
        let mut written = self
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *written >= staged.version {
            debug!("Skipping stale queue write (version {})", staged.version);
            return;
        }
        if let Err(e) = self.store.save(&staged.records) {
            warn!(
                "Failed to persist {} pending requests (in-memory queue unaffected): {}",
                staged.records.len(),
                e
            );
        }
        *written = staged.version;
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetError, Result};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn noop() -> ApiFunction {
        api_function(|| async { Ok(()) })
    }

    fn ids(queue: &PendingRequestQueue) -> Vec<String> {
        queue.pending_requests().into_iter().map(|r| r.id).collect()
    }

    struct FailingStore;

    impl QueueStore for FailingStore {
        fn load(&self) -> Result<Vec<PersistedRequest>> {
            Err(NetError::Other("storage offline".into()))
        }

        fn save(&self, _requests: &[PersistedRequest]) -> Result<()> {
            Err(NetError::Other("storage offline".into()))
        }
    }

    #[test]
    fn test_fifo_order_and_count() {
        let queue = PendingRequestQueue::in_memory();
        queue.initialize();
        for id in ["a", "b", "c"] {
            queue.enqueue(PendingRequest::with_id(id, "POST /orders", noop()));
        }
        assert_eq!(ids(&queue), vec!["a", "b", "c"]);
        assert_eq!(queue.count(), queue.pending_requests().len());
    }

    #[test]
    fn test_clear_empties_and_persists() {
        let store = Arc::new(MemoryQueueStore::new());
        let queue = PendingRequestQueue::new(store.clone());
        queue.initialize();
        queue.enqueue(PendingRequest::new("POST /ratings", noop()));
        assert_eq!(store.load().unwrap().len(), 1);
        queue.clear();

        assert_eq!(queue.count(), 0);
        assert!(queue.pending_requests().is_empty());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_id_is_add_then_remove() {
        let queue = PendingRequestQueue::in_memory();
        queue.enqueue(PendingRequest::with_id("a", "first", noop()));
        queue.enqueue(PendingRequest::with_id("b", "other", noop()));
        queue.enqueue(PendingRequest::with_id("a", "second", noop()));

        let pending = queue.pending_requests();
        assert_eq!(ids(&queue), vec!["b", "a"]);
        assert_eq!(pending[1].description, "second");
    }

    #[test]
    fn test_remove_spares_later_entries() {
        let queue = PendingRequestQueue::in_memory();
        queue.enqueue(PendingRequest::with_id("a", "x", noop()));
        queue.enqueue(PendingRequest::with_id("b", "x", noop()));
        let snapshot = queue.pending_requests();

        queue.enqueue(PendingRequest::with_id("d", "x", noop()));
        // Re-enqueue of a snapshotted id after the snapshot must survive too
        queue.enqueue(PendingRequest::with_id("a", "retry", noop()));

        assert_eq!(queue.remove(&snapshot), 1);
        assert_eq!(ids(&queue), vec!["d", "a"]);
    }

    #[test]
    fn test_metadata_survives_restart() {
        let tmp = TempDir::new().unwrap();
        {
            let queue = PendingRequestQueue::new(Arc::new(JsonQueueStore::new(tmp.path())));
            queue.initialize();
            queue.enqueue(PendingRequest::with_id("x", "POST /orders", noop()));
            queue.enqueue(PendingRequest::with_id("y", "POST /cart", noop()));
        }

        let queue = PendingRequestQueue::new(Arc::new(JsonQueueStore::new(tmp.path())));
        assert_eq!(queue.count(), 0);
        queue.initialize();
        assert_eq!(queue.count(), 2);
        assert_eq!(ids(&queue), vec!["x", "y"]);
        assert!(queue.pending_requests().iter().all(|r| !r.is_replayable()));
    }

    #[test]
    fn test_initialize_is_idempotent_and_keeps_live_entries_last() {
        let store = Arc::new(MemoryQueueStore::with_requests(vec![PersistedRequest {
            id: "old".into(),
            description: "POST /orders".into(),
            enqueued_at: Utc::now(),
        }]));
        let queue = PendingRequestQueue::new(store);
        queue.enqueue(PendingRequest::with_id("new", "POST /cart", noop()));

        queue.initialize();
        queue.initialize();
        assert!(queue.is_initialized());
        assert_eq!(ids(&queue), vec!["old", "new"]);
    }

    #[test]
    fn test_storage_failure_keeps_in_memory_queue() {
        let queue = PendingRequestQueue::new(Arc::new(FailingStore));
        queue.initialize();
        queue.enqueue(PendingRequest::with_id("a", "POST /orders", noop()));
        assert_eq!(queue.count(), 1);
        queue.clear();
        assert_eq!(queue.count(), 0);
    }

    #[test]
    fn test_enqueue_before_initialize_keeps_previous_session() {
        let tmp = TempDir::new().unwrap();
        {
            let queue = PendingRequestQueue::new(Arc::new(JsonQueueStore::new(tmp.path())));
            queue.initialize();
            queue.enqueue(PendingRequest::with_id("old", "POST /orders", noop()));
        }

        let store = Arc::new(JsonQueueStore::new(tmp.path()));
        let queue = PendingRequestQueue::new(store.clone());
        queue.enqueue(PendingRequest::with_id("new", "POST /cart", noop()));
        let on_disk: Vec<String> = store.load().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(on_disk, vec!["old"]);

        queue.initialize();
        assert_eq!(ids(&queue), vec!["old", "new"]);
        let on_disk: Vec<String> = store.load().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(on_disk, vec!["old", "new"]);
    }

    /// Store that blocks inside `save` while armed.
    struct GatedStore {
        armed: AtomicBool,
        started: mpsc::SyncSender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl QueueStore for GatedStore {
        fn load(&self) -> Result<Vec<PersistedRequest>> {
            Ok(Vec::new())
        }

        fn save(&self, _requests: &[PersistedRequest]) -> Result<()> {
            if self.armed.swap(false, Ordering::SeqCst) {
                let _ = self.started.send(());
                let _ = self.release.lock().unwrap().recv();
            }
            Ok(())
        }
    }

    #[test]
    fn test_readers_do_not_wait_on_storage() {
        let (started_tx, started_rx) = mpsc::sync_channel(1);
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(GatedStore {
            armed: AtomicBool::new(false),
            started: started_tx,
            release: Mutex::new(release_rx),
        });
        let queue = Arc::new(PendingRequestQueue::new(store.clone()));
        queue.initialize();
        store.armed.store(true, Ordering::SeqCst);

        let writer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                queue.enqueue(PendingRequest::with_id("a", "POST /orders", noop()));
            })
        };

        started_rx.recv().unwrap();
        // Save is blocked; the queue itself must stay readable
        assert_eq!(queue.count(), 1);
        assert_eq!(ids(&queue), vec!["a"]);

        release_tx.send(()).unwrap();
        writer.join().unwrap();
    }
}
