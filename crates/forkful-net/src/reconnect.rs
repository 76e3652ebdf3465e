//! Reconnect coordinator.
//!
//! Tracks reachability as a three-state machine (`Unknown`, `Online`,
//! `Offline`) and fires reconnect callbacks only on the `Offline -> Online`
//! edge. Replay of the pending queue is serialized: a second replay waits
//! for the first and then works on a fresh snapshot.

use crate::events::{Listeners, Subscription};
use crate::queue::{PendingRequest, PendingRequestQueue};
use crate::NetError;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happens to an item whose replay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Remove it with the rest of the batch; the caller must re-enqueue.
    #[default]
    Drop,
    /// Keep it in place for the next reconnect.
    Retain,
}

/// Replay behavior.
#[derive(Debug, Clone, Default)]
pub struct ReplayPolicy {
    pub on_failure: FailurePolicy,
    /// Per-item limit. `None` lets each call run as long as it takes.
    pub item_timeout: Option<Duration>,
}

impl ReplayPolicy {
    pub fn with_failure_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }
}

/// Outcome of one replay cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Ids of items whose call failed, timed out, or had no live callable.
    pub failed: Vec<String>,
    /// Ids of failed items left in the queue.
    pub retained: Vec<String>,
}

/// Reachability as last observed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityPhase {
    Unknown,
    Online,
    Offline,
}

pub struct ReconnectCoordinator {
    queue: Arc<PendingRequestQueue>,
    policy: ReplayPolicy,
    phase: Mutex<ReachabilityPhase>,
    listeners: Listeners<DateTime<Utc>>,
    replay_lock: tokio::sync::Mutex<()>,
    replay_cycles: AtomicU64,
}

impl ReconnectCoordinator {
    pub fn new(queue: Arc<PendingRequestQueue>, policy: ReplayPolicy) -> Self {
        Self {
            queue,
            policy,
            phase: Mutex::new(ReachabilityPhase::Unknown),
            listeners: Listeners::new(),
            replay_lock: tokio::sync::Mutex::new(()),
            replay_cycles: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> ReachabilityPhase {
        *self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Feed the latest reachability. Returns `true` and notifies reconnect
    /// listeners only on an `Offline -> Online` transition.
    pub fn observe(&self, reachable: bool) -> bool {
        let previous = {
            let mut phase = self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let previous = *phase;
            *phase = if reachable {
                ReachabilityPhase::Online
            } else {
                ReachabilityPhase::Offline
            };
            previous
        };

        let reconnected = reachable && previous == ReachabilityPhase::Offline;
        if reconnected {
            let at = Utc::now();
            info!("Network reconnected at {}", at);
            self.listeners.emit(&at);
        }
        reconnected
    }

    /// Register a callback for each reconnect transition. It never fires for
    /// the initial observation, whatever its value.
    pub fn on_network_reconnected(
        &self,
        callback: impl Fn(&DateTime<Utc>) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(callback)
    }

    /// Number of replay cycles completed so far.
    pub fn replay_cycles(&self) -> u64 {
        self.replay_cycles.load(Ordering::SeqCst)
    }

    /// Replay a snapshot of the queue in FIFO order.
    ///
    /// Each failure is logged with the request id and does not stop the
    /// batch. Afterwards exactly the snapshotted entries are removed, minus
    /// any the failure policy retains; requests enqueued meanwhile stay
    /// queued for the next cycle.
    pub async fn replay(&self) -> ReplayReport {
        let _guard = self.replay_lock.lock().await;
        let snapshot = self.queue.pending_requests();
        let mut report = ReplayReport::default();
        let mut finished: Vec<PendingRequest> = Vec::with_capacity(snapshot.len());

        if !snapshot.is_empty() {
            info!("Replaying {} pending requests", snapshot.len());
        }

        for request in snapshot {
            report.attempted += 1;
            match self.replay_one(&request).await {
                Ok(()) => {
                    debug!("Replayed pending request {}", request.id);
                    report.succeeded += 1;
                    finished.push(request);
                }
                Err(e) => {
                    warn!(
                        "Replay of pending request {} ({}) failed: {}",
                        request.id, request.description, e
                    );
                    report.failed.push(request.id.clone());
                    // A restored entry can never run, so retaining it is pointless
                    if self.policy.on_failure == FailurePolicy::Retain && request.is_replayable() {
                        report.retained.push(request.id.clone());
                    } else {
                        finished.push(request);
                    }
                }
            }
        }

        self.queue.remove(&finished);
        self.replay_cycles.fetch_add(1, Ordering::SeqCst);

        if report.attempted > 0 {
            info!(
                "Replay finished: {}/{} succeeded, {} failed, {} retained",
                report.succeeded,
                report.attempted,
                report.failed.len(),
                report.retained.len()
            );
        }
        report
    }

    async fn replay_one(&self, request: &PendingRequest) -> crate::Result<()> {
        let Some(api_function) = request.api_function() else {
            return Err(NetError::Replay {
                request_id: request.id.clone(),
                message: "no live callable (restored from a previous session)".to_string(),
            });
        };

        let call = AssertUnwindSafe(api_function()).catch_unwind();
        let outcome = match self.policy.item_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(NetError::Timeout(limit)),
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NetError::Replay {
                request_id: request.id.clone(),
                message: format!("{:#}", e),
            }),
            Err(_) => Err(NetError::Replay {
                request_id: request.id.clone(),
                message: "call panicked".to_string(),
            }),
        }
    }
}
