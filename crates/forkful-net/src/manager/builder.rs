//! Builder for assembling a [`NetworkManager`].

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ManagerConfig;
use crate::events::Callback;
use crate::network::{
    DynLatencyProbe, DynLinkMonitor, DynReachabilityCheck, HttpProbeClient, SystemLinkMonitor,
};
use crate::queue::{DynQueueStore, JsonQueueStore, MemoryQueueStore};
use crate::Result;

use super::NetworkManager;

/// Builder for configuring the network state provider.
///
/// Every collaborator has a production default: interface polling for link
/// state, HTTP probes for reachability and quality, and an in-memory queue
/// unless a data directory or store is given.
///
/// # Example
///
/// ```rust,ignore
/// use forkful_net::NetworkManager;
///
/// let manager = NetworkManager::builder()
///     .with_data_dir(data_dir)
///     .on_reachability_change(|online| println!("online: {}", online))
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct NetworkManagerBuilder {
    link: Option<DynLinkMonitor>,
    reachability: Option<DynReachabilityCheck>,
    latency: Option<DynLatencyProbe>,
    store: Option<DynQueueStore>,
    data_dir: Option<PathBuf>,
    config: ManagerConfig,
    reachability_hooks: Vec<Callback<bool>>,
}

impl NetworkManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source of platform link state and link change events.
    pub fn with_link_monitor(mut self, link: DynLinkMonitor) -> Self {
        self.link = Some(link);
        self
    }

    /// End-to-end reachability check used when the platform has no flag.
    pub fn with_reachability_check(mut self, reachability: DynReachabilityCheck) -> Self {
        self.reachability = Some(reachability);
        self
    }

    /// Round trip timed by the quality classifier.
    pub fn with_latency_probe(mut self, latency: DynLatencyProbe) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Durable store for queue metadata. Takes precedence over
    /// [`with_data_dir`](Self::with_data_dir).
    pub fn with_queue_store(mut self, store: DynQueueStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist queue metadata as JSON under `data_dir`.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Hook invoked on every reachability flip, in both directions, with the
    /// new value. It lives as long as the manager.
    pub fn on_reachability_change(
        mut self,
        callback: impl Fn(&bool) + Send + Sync + 'static,
    ) -> Self {
        self.reachability_hooks.push(Arc::new(callback));
        self
    }

    /// Initialize the queue, take the first connectivity and quality
    /// readings, and start watching.
    ///
    /// Only configuration problems fail the build. Probe and storage errors
    /// degrade the initial state and are logged.
    pub async fn build(self) -> Result<NetworkManager> {
        self.config.validate()?;

        let store: DynQueueStore = match (self.store, self.data_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(JsonQueueStore::new(&dir)),
            (None, None) => Arc::new(MemoryQueueStore::new()),
        };

        let (reachability, latency) = match (self.reachability, self.latency) {
            (Some(reachability), Some(latency)) => (reachability, latency),
            (reachability, latency) => {
                let http = Arc::new(HttpProbeClient::new()?);
                (
                    reachability.unwrap_or_else(|| http.clone() as DynReachabilityCheck),
                    latency.unwrap_or_else(|| http as DynLatencyProbe),
                )
            }
        };

        let link: DynLinkMonitor = match self.link {
            Some(link) => link,
            None => Arc::new(SystemLinkMonitor::new()),
        };

        NetworkManager::start(
            link,
            reachability,
            latency,
            store,
            self.config,
            self.reachability_hooks,
        )
        .await
    }
}
