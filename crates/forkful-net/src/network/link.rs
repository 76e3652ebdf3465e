//! Platform link-state adapters.
//!
//! A [`LinkMonitor`] answers "is the radio/link associated, and over what?"
//! and streams changes. It says nothing definitive about internet
//! reachability; that is the [`ConnectivityProbe`](super::ConnectivityProbe)'s job.

use crate::config::NetworkConfig;
use crate::{NetError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Physical transport of the active link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Wifi => write!(f, "wifi"),
            ConnectionType::Cellular => write!(f, "cellular"),
            ConnectionType::Ethernet => write!(f, "ethernet"),
            ConnectionType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Raw link information as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub is_connected: bool,
    pub connection_type: ConnectionType,
    /// Reachability flag, for platforms that track it themselves.
    /// `None` means the probe has to check.
    pub is_internet_reachable: Option<bool>,
}

impl LinkInfo {
    pub fn connected(connection_type: ConnectionType) -> Self {
        Self {
            is_connected: true,
            connection_type,
            is_internet_reachable: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            connection_type: ConnectionType::Unknown,
            is_internet_reachable: Some(false),
        }
    }

    pub fn with_reachability(mut self, reachable: Option<bool>) -> Self {
        self.is_internet_reachable = reachable;
        self
    }
}

/// Source of link state and link change events.
#[async_trait]
pub trait LinkMonitor: Send + Sync {
    /// Read the current link state.
    async fn current_link(&self) -> Result<LinkInfo>;

    /// Receive every subsequent link change, in emission order.
    ///
    /// Fails with [`NetError::PlatformUnavailable`] when change events
    /// cannot be delivered on this platform.
    fn link_events(&self) -> Result<broadcast::Receiver<LinkInfo>>;
}

pub type DynLinkMonitor = Arc<dyn LinkMonitor>;

/// Link monitor fed from outside.
///
/// The host application forwards OS connectivity callbacks through
/// [`push`](Self::push); nothing here polls.
pub struct PushLinkMonitor {
    current: Mutex<LinkInfo>,
    tx: broadcast::Sender<LinkInfo>,
}

impl PushLinkMonitor {
    pub fn new(initial: LinkInfo) -> Self {
        let (tx, _) = broadcast::channel(NetworkConfig::EVENT_CHANNEL_CAPACITY);
        Self {
            current: Mutex::new(initial),
            tx,
        }
    }

    /// Record a link change and deliver it to every receiver.
    pub fn push(&self, link: LinkInfo) {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = link;
        if self.tx.send(link).is_err() {
            debug!("Link change pushed with no receivers: {:?}", link);
        }
    }
}

#[async_trait]
impl LinkMonitor for PushLinkMonitor {
    async fn current_link(&self) -> Result<LinkInfo> {
        Ok(*self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn link_events(&self) -> Result<broadcast::Receiver<LinkInfo>> {
        Ok(self.tx.subscribe())
    }
}

/// Link monitor backed by the host's network interfaces.
///
/// Samples interfaces with `sysinfo` on a fixed interval and emits a change
/// whenever the derived [`LinkInfo`] differs from the last sample.
pub struct SystemLinkMonitor {
    poll_interval: Duration,
    tx: broadcast::Sender<LinkInfo>,
    last: Arc<Mutex<Option<LinkInfo>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SystemLinkMonitor {
    pub fn new() -> Self {
        Self::with_poll_interval(NetworkConfig::LINK_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        let (tx, _) = broadcast::channel(NetworkConfig::EVENT_CHANNEL_CAPACITY);
        Self {
            poll_interval,
            tx,
            last: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    fn ensure_polling(&self) -> Result<()> {
        let mut task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            NetError::PlatformUnavailable {
                message: format!("no async runtime for link polling: {}", e),
            }
        })?;

        let tx = self.tx.clone();
        let last = Arc::clone(&self.last);
        let poll_interval = self.poll_interval;
        *task = Some(handle.spawn(async move {
            info!("Starting interface link polling every {:?}", poll_interval);
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let link = match tokio::task::spawn_blocking(sample_interfaces).await {
                    Ok(link) => link,
                    Err(e) => {
                        warn!("Interface sampling task failed: {}", e);
                        continue;
                    }
                };

                let changed = {
                    let mut last = last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    let changed = *last != Some(link);
                    *last = Some(link);
                    changed
                };
                if changed {
                    debug!("Interface link changed: {:?}", link);
                    let _ = tx.send(link);
                }
            }
        }));
        Ok(())
    }
}

impl Default for SystemLinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SystemLinkMonitor {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

#[async_trait]
impl LinkMonitor for SystemLinkMonitor {
    async fn current_link(&self) -> Result<LinkInfo> {
        let link = tokio::task::spawn_blocking(sample_interfaces)
            .await
            .map_err(|e| NetError::PlatformUnavailable {
                message: format!("interface sampling failed: {}", e),
            })?;
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(link);
        Ok(link)
    }

    fn link_events(&self) -> Result<broadcast::Receiver<LinkInfo>> {
        let rx = self.tx.subscribe();
        self.ensure_polling()?;
        Ok(rx)
    }
}

/// Derive link state from the interfaces that currently hold a routable address.
fn sample_interfaces() -> LinkInfo {
    let networks = sysinfo::Networks::new_with_refreshed_list();
    let mut best: Option<ConnectionType> = None;

    for (name, data) in networks.list() {
        if is_loopback_name(name) {
            continue;
        }
        if !data.ip_networks().iter().any(|net| is_routable(&net.addr)) {
            continue;
        }
        let kind = classify_interface(name);
        if best.map_or(true, |current| preference(kind) > preference(current)) {
            best = Some(kind);
        }
    }

    match best {
        Some(kind) => LinkInfo::connected(kind),
        None => LinkInfo::disconnected(),
    }
}

fn is_loopback_name(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.eq_ignore_ascii_case("loopback")
}

fn is_routable(addr: &IpAddr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return false;
    }
    match addr {
        IpAddr::V4(v4) => !v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
    }
}

/// Guess the transport from conventional interface names.
pub(crate) fn classify_interface(name: &str) -> ConnectionType {
    let name = name.to_ascii_lowercase();
    const WIFI: &[&str] = &["wl", "wlan", "wifi", "wi-fi", "ath"];
    const CELLULAR: &[&str] = &["wwan", "rmnet", "ccmni", "pdp_ip", "usb"];
    const ETHERNET: &[&str] = &["eth", "enp", "eno", "ens", "enx", "ethernet"];

    if WIFI.iter().any(|p| name.starts_with(p)) {
        ConnectionType::Wifi
    } else if CELLULAR.iter().any(|p| name.starts_with(p)) {
        ConnectionType::Cellular
    } else if ETHERNET.iter().any(|p| name.starts_with(p)) {
        ConnectionType::Ethernet
    } else {
        ConnectionType::Unknown
    }
}

fn preference(kind: ConnectionType) -> u8 {
    match kind {
        ConnectionType::Ethernet => 3,
        ConnectionType::Wifi => 2,
        ConnectionType::Cellular => 1,
        ConnectionType::Unknown => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_interface() {
        assert_eq!(classify_interface("wlp3s0"), ConnectionType::Wifi);
        assert_eq!(classify_interface("wlan0"), ConnectionType::Wifi);
        assert_eq!(classify_interface("rmnet_data0"), ConnectionType::Cellular);
        assert_eq!(classify_interface("pdp_ip0"), ConnectionType::Cellular);
        assert_eq!(classify_interface("enp0s31f6"), ConnectionType::Ethernet);
        assert_eq!(classify_interface("eth0"), ConnectionType::Ethernet);
        assert_eq!(classify_interface("tun0"), ConnectionType::Unknown);
    }

    #[test]
    fn test_routable_addresses() {
        assert!(!is_routable(&"127.0.0.1".parse().unwrap()));
        assert!(!is_routable(&"169.254.10.1".parse().unwrap()));
        assert!(!is_routable(&"fe80::1".parse().unwrap()));
        assert!(is_routable(&"192.168.1.20".parse().unwrap()));
        assert!(is_routable(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_disconnected_link_is_unreachable() {
        let link = LinkInfo::disconnected();
        assert!(!link.is_connected);
        assert_eq!(link.is_internet_reachable, Some(false));
    }

    #[tokio::test]
    async fn test_push_monitor_delivers_in_order() {
        let monitor = PushLinkMonitor::new(LinkInfo::disconnected());
        let mut rx = monitor.link_events().unwrap();

        monitor.push(LinkInfo::connected(ConnectionType::Wifi));
        monitor.push(LinkInfo::disconnected());

        assert!(rx.recv().await.unwrap().is_connected);
        assert!(!rx.recv().await.unwrap().is_connected);
        assert!(!monitor.current_link().await.unwrap().is_connected);
    }

    #[tokio::test]
    async fn test_system_monitor_samples_without_error() {
        let monitor = SystemLinkMonitor::new();
        assert!(monitor.current_link().await.is_ok());
    }
}
