//! Network state provider.
//!
//! [`NetworkManager`] is the composition root. It owns the connectivity
//! probe, the quality classifier, the pending request queue and the
//! reconnect coordinator, and publishes a [`NetworkSnapshot`] that consumers
//! read or watch. Construct one at startup and pass it around; there is no
//! global instance.
//!
//! Three background tasks run while the manager is alive:
//! - the probe's link event pump
//! - a serialized event loop applying connectivity changes
//! - a timer refreshing the pending count
//!
//! Replays run on their own tasks and are serialized by the coordinator.

mod builder;
mod state;

pub use builder::NetworkManagerBuilder;
pub use state::{Dispatch, NetworkEvent, NetworkSnapshot};

use crate::config::{ManagerConfig, NetworkConfig};
use crate::events::{Callback, Listeners, Subscription};
use crate::network::{
    ConnectionState, ConnectivityProbe, DynLatencyProbe, DynLinkMonitor, DynReachabilityCheck,
    NetworkQuality, QualityClassifier,
};
use crate::queue::{ApiFunction, DynQueueStore, PendingRequest, PendingRequestQueue};
use crate::reconnect::{ReconnectCoordinator, ReplayReport};
use crate::{NetError, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Work for the serialized event loop.
enum ProviderEvent {
    Connection {
        state: ConnectionState,
        done: Option<oneshot::Sender<()>>,
    },
}

struct ManagerInner {
    probe: ConnectivityProbe,
    classifier: QualityClassifier,
    queue: Arc<PendingRequestQueue>,
    coordinator: Arc<ReconnectCoordinator>,
    state_tx: watch::Sender<NetworkSnapshot>,
    events_tx: broadcast::Sender<NetworkEvent>,
    commands: mpsc::UnboundedSender<ProviderEvent>,
    reachability_listeners: Listeners<bool>,
    active_replays: AtomicUsize,
}

impl ManagerInner {
    fn snapshot(&self) -> NetworkSnapshot {
        self.state_tx.borrow().clone()
    }

    fn emit(&self, event: NetworkEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }

    /// Apply one connectivity reading. Only the event loop calls this.
    async fn apply_connection(self: &Arc<Self>, state: ConnectionState) {
        let previous = self.snapshot();
        let reachable = state.is_internet_reachable();
        self.state_tx
            .send_modify(|snapshot| snapshot.apply_connection(state));

        if previous.connection() != state {
            debug!("Connection changed: {:?}", state);
            self.emit(NetworkEvent::ConnectionChanged(state));
        }

        if previous.is_internet_reachable != reachable {
            if reachable {
                info!("Internet connectivity restored ({})", state.connection_type());
            } else {
                warn!("Internet connectivity lost");
            }
            self.emit(NetworkEvent::ReachabilityChanged(reachable));
            self.reachability_listeners.emit(&reachable);
        }

        // May start a replay through the reconnect subscription
        self.coordinator.observe(reachable);

        let quality = if reachable {
            self.classifier.detect_network_quality(&state).await
        } else {
            NetworkQuality::Offline
        };
        let before = previous.network_quality;
        self.set_quality(quality, before);
    }

    fn set_quality(&self, quality: NetworkQuality, before: NetworkQuality) {
        self.state_tx.send_if_modified(|snapshot| {
            // A newer reading went offline while the probe ran
            if !snapshot.is_internet_reachable {
                return false;
            }
            if snapshot.network_quality == quality {
                return false;
            }
            snapshot.network_quality = quality;
            true
        });
        let now = self.state_tx.borrow().network_quality;
        if now != before {
            info!("Network quality: {} -> {}", before, now);
            self.emit(NetworkEvent::QualityChanged(now));
        }
    }

    fn refresh_pending_count(&self) -> usize {
        let count = self.queue.count();
        self.state_tx.send_if_modified(|snapshot| {
            if snapshot.pending_request_count == count {
                return false;
            }
            snapshot.pending_request_count = count;
            true
        });
        count
    }

    fn begin_replay(self: &Arc<Self>, at: DateTime<Utc>) {
        self.active_replays.fetch_add(1, Ordering::SeqCst);
        let pending = self.queue.count();
        self.state_tx.send_modify(|snapshot| {
            snapshot.is_network_reconnecting = true;
            snapshot.last_reconnect_time = Some(at);
            snapshot.pending_request_count = pending;
        });
        self.emit(NetworkEvent::ReplayStarted { at, pending });

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot replay pending requests without an async runtime: {}", e);
                self.finish_replay(ReplayReport::default());
                return;
            }
        };

        let inner = Arc::clone(self);
        runtime.spawn(async move {
            let report = inner.coordinator.replay().await;
            inner.finish_replay(report);
        });
    }

    fn finish_replay(&self, report: ReplayReport) {
        let still_running = self.active_replays.fetch_sub(1, Ordering::SeqCst) > 1;
        let count = self.queue.count();
        self.state_tx.send_modify(|snapshot| {
            snapshot.is_network_reconnecting = still_running;
            snapshot.pending_request_count = count;
        });
        self.emit(NetworkEvent::ReplayFinished(report));
    }
}

#[derive(Default)]
struct ManagerTasks {
    event_loop: Option<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
}

/// Offline-aware network state provider.
pub struct NetworkManager {
    inner: Arc<ManagerInner>,
    tasks: Mutex<ManagerTasks>,
    subscriptions: Mutex<Vec<Subscription>>,
    shutdown_tx: watch::Sender<bool>,
}

impl NetworkManager {
    pub fn builder() -> NetworkManagerBuilder {
        NetworkManagerBuilder::new()
    }

    async fn start(
        link: DynLinkMonitor,
        reachability: DynReachabilityCheck,
        latency: DynLatencyProbe,
        store: DynQueueStore,
        config: ManagerConfig,
        reachability_hooks: Vec<Callback<bool>>,
    ) -> Result<Self> {
        let queue = Arc::new(PendingRequestQueue::new(store));
        queue.initialize();
        let pending = queue.count();

        let probe = ConnectivityProbe::with_timeout(link, reachability, config.probe_timeout);
        let classifier =
            QualityClassifier::with_thresholds(latency, config.slow_threshold, config.quality_timeout);

        // Subscribe before the first reading. Changes that land while it runs
        // wait in the channel and are applied once the event loop starts.
        let (commands, command_rx) = mpsc::unbounded_channel();
        let tx = commands.clone();
        let link_subscription = probe.subscribe_to_network_changes(move |state| {
            let _ = tx.send(ProviderEvent::Connection {
                state: *state,
                done: None,
            });
        });
        if !probe.is_watching() {
            warn!("Link changes are not being watched; state updates only on refresh");
        }

        let connection = probe.check_internet_connection().await;
        let quality = if connection.is_internet_reachable() {
            classifier.detect_network_quality(&connection).await
        } else {
            NetworkQuality::Offline
        };

        let coordinator = Arc::new(ReconnectCoordinator::new(
            queue.clone(),
            config.replay_policy.clone(),
        ));
        // Seeds the phase; never fires on the first reading
        coordinator.observe(connection.is_internet_reachable());

        let snapshot = NetworkSnapshot::new(connection, quality, pending);
        info!(
            "Network manager ready: online={}, type={}, quality={}, pending={}",
            snapshot.is_online, snapshot.connection_type, snapshot.network_quality, pending
        );

        let (state_tx, _) = watch::channel(snapshot);
        let (events_tx, _) = broadcast::channel(NetworkConfig::EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(ManagerInner {
            probe,
            classifier,
            queue,
            coordinator,
            state_tx,
            events_tx,
            commands,
            reachability_listeners: Listeners::new(),
            active_replays: AtomicUsize::new(0),
        });

        let mut subscriptions = vec![link_subscription];

        let weak: Weak<ManagerInner> = Arc::downgrade(&inner);
        subscriptions.push(inner.coordinator.on_network_reconnected(move |at| {
            if let Some(inner) = weak.upgrade() {
                inner.begin_replay(*at);
            }
        }));

        for hook in reachability_hooks {
            subscriptions.push(inner.reachability_listeners.subscribe(move |reachable| hook(reachable)));
        }

        let tasks = ManagerTasks {
            event_loop: Some(tokio::spawn(run_event_loop(
                inner.clone(),
                command_rx,
                shutdown_rx.clone(),
            ))),
            poller: Some(tokio::spawn(run_pending_poller(
                Arc::downgrade(&inner),
                config.pending_poll_interval,
                shutdown_rx,
            ))),
        };

        Ok(Self {
            inner,
            tasks: Mutex::new(tasks),
            subscriptions: Mutex::new(subscriptions),
            shutdown_tx,
        })
    }

    /// Current state.
    pub fn snapshot(&self) -> NetworkSnapshot {
        self.inner.snapshot()
    }

    /// Receiver that sees every state change.
    pub fn watch_state(&self) -> watch::Receiver<NetworkSnapshot> {
        self.inner.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Invoke `callback` on every reachability flip, in both directions.
    pub fn on_reachability_change(
        &self,
        callback: impl Fn(&bool) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.reachability_listeners.subscribe(callback)
    }

    /// Whether platform link change events are reaching the manager.
    pub fn is_watching_link_changes(&self) -> bool {
        self.inner.probe.is_watching()
    }

    pub fn get_pending_requests(&self) -> Vec<PendingRequest> {
        self.inner.queue.pending_requests()
    }

    pub fn pending_request_count(&self) -> usize {
        self.inner.queue.count()
    }

    pub fn clear_pending_requests(&self) {
        self.inner.queue.clear();
        self.inner.refresh_pending_count();
    }

    /// Defer a call until the next reconnect. Returns the request id.
    pub fn enqueue(&self, request: PendingRequest) -> String {
        let id = self.inner.queue.enqueue(request);
        self.inner.refresh_pending_count();
        id
    }

    /// Run the call now if online, otherwise queue it.
    ///
    /// A call that fails with a transient error is queued for replay; any
    /// other failure is returned to the caller.
    pub async fn execute_or_queue(
        &self,
        description: impl Into<String>,
        api_function: ApiFunction,
    ) -> anyhow::Result<Dispatch> {
        let description = description.into();

        if self.snapshot().is_offline {
            let id = self.enqueue(PendingRequest::new(description, api_function));
            debug!("Offline, deferred request {}", id);
            return Ok(Dispatch::Queued(id));
        }

        match api_function().await {
            Ok(()) => Ok(Dispatch::Completed),
            Err(e) if NetError::is_transient(&e) => {
                let id = self.enqueue(PendingRequest::new(description.clone(), api_function));
                warn!("{} failed transiently, deferred as {}: {:#}", description, id, e);
                Ok(Dispatch::Queued(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Re-run the connectivity check and quality probe now.
    ///
    /// The reading goes through the same path as a link change event, so a
    /// flip here notifies and may trigger a replay.
    pub async fn refresh(&self) -> NetworkSnapshot {
        let state = self.inner.probe.check_internet_connection().await;
        let (done_tx, done_rx) = oneshot::channel();
        let sent = self.inner.commands.send(ProviderEvent::Connection {
            state,
            done: Some(done_tx),
        });
        if sent.is_ok() {
            // Err means the loop stopped; the snapshot is as fresh as it gets
            let _ = done_rx.await;
        }
        self.inner.refresh_pending_count();
        self.snapshot()
    }

    /// Shared handle to the queue, for collaborators that enqueue directly.
    pub fn queue(&self) -> Arc<PendingRequestQueue> {
        self.inner.queue.clone()
    }

    pub fn coordinator(&self) -> Arc<ReconnectCoordinator> {
        self.inner.coordinator.clone()
    }

    /// Release every subscription and stop background tasks. Idempotent.
    ///
    /// A replay already in flight runs to completion.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.inner.probe.stop();

        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for handle in [tasks.event_loop.take(), tasks.poller.take()].into_iter().flatten() {
            handle.abort();
        }
        info!("Network manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_event_loop(
    inner: Arc<ManagerInner>,
    mut commands: mpsc::UnboundedReceiver<ProviderEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown_rx.changed() => break,
            event = commands.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ProviderEvent::Connection { state, done } => {
                inner.apply_connection(state).await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
        }
    }
    debug!("Network event loop stopped");
}

async fn run_pending_poller(
    inner: Weak<ManagerInner>,
    period: std::time::Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.refresh_pending_count();
            }
        }
    }
    debug!("Pending count poller stopped");
}
