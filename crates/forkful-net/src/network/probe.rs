//! Connectivity probe: one source of truth for connectivity.
//!
//! Reconciles platform link state with actual end-to-end reachability. Both
//! entry points are infallible; failures degrade to an offline state and are
//! logged.

use crate::config::NetworkConfig;
use crate::events::{Listeners, Subscription};
use crate::network::client::DynReachabilityCheck;
use crate::network::link::{ConnectionType, DynLinkMonitor, LinkInfo};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connectivity as seen by the rest of the application.
///
/// Reachability implies link connectivity; the constructor enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    is_connected: bool,
    is_internet_reachable: bool,
    connection_type: ConnectionType,
}

impl ConnectionState {
    pub fn new(
        is_connected: bool,
        is_internet_reachable: bool,
        connection_type: ConnectionType,
    ) -> Self {
        Self {
            is_connected,
            is_internet_reachable: is_internet_reachable && is_connected,
            connection_type,
        }
    }

    /// Conservative default: no link, no reachability, unknown transport.
    pub fn offline() -> Self {
        Self::new(false, false, ConnectionType::Unknown)
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn is_internet_reachable(&self) -> bool {
        self.is_internet_reachable
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::offline()
    }
}

/// Connectivity probe over a link monitor and a reachability check.
pub struct ConnectivityProbe {
    link: DynLinkMonitor,
    reachability: DynReachabilityCheck,
    timeout: Duration,
    listeners: Listeners<ConnectionState>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityProbe {
    pub fn new(link: DynLinkMonitor, reachability: DynReachabilityCheck) -> Self {
        Self::with_timeout(link, reachability, NetworkConfig::PROBE_TIMEOUT)
    }

    pub fn with_timeout(
        link: DynLinkMonitor,
        reachability: DynReachabilityCheck,
        timeout: Duration,
    ) -> Self {
        Self {
            link,
            reachability,
            timeout,
            listeners: Listeners::new(),
            pump: Mutex::new(None),
        }
    }

    /// Read the link state and, if associated, confirm reachability.
    ///
    /// The link query and the reachability check share one probe timeout;
    /// running out of it or any platform error yields an unreachable state.
    pub async fn check_internet_connection(&self) -> ConnectionState {
        let deadline = Instant::now() + self.timeout;
        let link = match tokio::time::timeout_at(deadline, self.link.current_link()).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                warn!("Link state unavailable, assuming offline: {}", e);
                return ConnectionState::offline();
            }
            Err(_) => {
                warn!("Link state query timed out after {:?}", self.timeout);
                return ConnectionState::offline();
            }
        };

        resolve(link, &self.reachability, deadline).await
    }

    /// Invoke `callback` with a fresh [`ConnectionState`] on every link change.
    ///
    /// Never fails. If the platform cannot deliver change events the
    /// subscription stays registered but silent; [`is_watching`](Self::is_watching)
    /// reports whether events are flowing.
    pub fn subscribe_to_network_changes(
        &self,
        callback: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        let subscription = self.listeners.subscribe(callback);
        self.ensure_pump();
        subscription
    }

    /// Whether link change events are currently being delivered.
    pub fn is_watching(&self) -> bool {
        self.pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stop forwarding link events. Subscriptions stay registered.
    pub fn stop(&self) {
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            pump.abort();
            debug!("Link event pump stopped");
        }
    }

    fn ensure_pump(&self) {
        let mut pump = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if pump.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot watch link changes without an async runtime: {}", e);
                return;
            }
        };
        let mut rx = match self.link.link_events() {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Link change events unavailable: {}", e);
                return;
            }
        };

        let listeners = self.listeners.clone();
        let reachability = self.reachability.clone();
        let timeout = self.timeout;
        *pump = Some(runtime.spawn(async move {
            info!("Watching link changes");
            loop {
                match rx.recv().await {
                    Ok(link) => {
                        let state = resolve(link, &reachability, Instant::now() + timeout).await;
                        debug!("Link change resolved to {:?}", state);
                        listeners.emit(&state);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} link events; continuing with latest", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("Link event source closed");
                        break;
                    }
                }
            }
        }));
    }
}

impl Drop for ConnectivityProbe {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn resolve(
    link: LinkInfo,
    reachability: &DynReachabilityCheck,
    deadline: Instant,
) -> ConnectionState {
    if !link.is_connected {
        return ConnectionState::new(false, false, link.connection_type);
    }

    let reachable = match link.is_internet_reachable {
        Some(reachable) => reachable,
        None => match tokio::time::timeout_at(deadline, reachability.is_reachable()).await {
            Ok(Ok(reachable)) => reachable,
            Ok(Err(e)) => {
                warn!("Reachability check failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Reachability check ran out of time");
                false
            }
        },
    };

    ConnectionState::new(true, reachable, link.connection_type)
}
