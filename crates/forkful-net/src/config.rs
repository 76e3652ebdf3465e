//! Centralized configuration for the network layer.
//!
//! Constants live on unit structs grouped by concern; [`ManagerConfig`] carries
//! the runtime-tunable subset used by [`NetworkManager`](crate::NetworkManager).

use std::time::Duration;

use crate::reconnect::ReplayPolicy;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    /// Upper bound for one reachability check, across all probe URLs.
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    /// Upper bound for one quality round trip.
    pub const QUALITY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    /// Round trips at or above this are classified as slow.
    pub const SLOW_THRESHOLD: Duration = Duration::from_millis(1500);
    /// How often the provider refreshes the pending request count.
    pub const PENDING_POLL_INTERVAL: Duration = Duration::from_secs(5);
    /// How often [`SystemLinkMonitor`](crate::network::SystemLinkMonitor) samples interfaces.
    pub const LINK_POLL_INTERVAL: Duration = Duration::from_secs(3);
    /// Capacity of link and provider event broadcast channels.
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
    pub const USER_AGENT: &'static str = "forkful-net/0.1";
    pub const DEFAULT_PROBE_URLS: &'static [&'static str] = &[
        "https://clients3.google.com/generate_204",
        "https://www.cloudflare.com/cdn-cgi/trace",
    ];
    pub const DEFAULT_QUALITY_URL: &'static str = "https://www.cloudflare.com/cdn-cgi/trace";
}

/// Shared directory and path configurations.
pub struct PathsConfig;

impl PathsConfig {
    pub const APP_DIR_NAME: &'static str = "forkful";
    pub const QUEUE_FILE_NAME: &'static str = "pending-requests.json";
}

/// Runtime configuration for the network state provider.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Timeout applied to every connectivity check.
    pub probe_timeout: Duration,
    /// Timeout applied to every quality round trip.
    pub quality_timeout: Duration,
    /// Fast/slow boundary for the quality classifier.
    pub slow_threshold: Duration,
    /// Pending count refresh interval.
    pub pending_poll_interval: Duration,
    /// How replay treats failures and hung calls.
    pub replay_policy: ReplayPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            probe_timeout: NetworkConfig::PROBE_TIMEOUT,
            quality_timeout: NetworkConfig::QUALITY_PROBE_TIMEOUT,
            slow_threshold: NetworkConfig::SLOW_THRESHOLD,
            pending_poll_interval: NetworkConfig::PENDING_POLL_INTERVAL,
            replay_policy: ReplayPolicy::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_quality_timeout(mut self, timeout: Duration) -> Self {
        self.quality_timeout = timeout;
        self
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn with_pending_poll_interval(mut self, interval: Duration) -> Self {
        self.pending_poll_interval = interval;
        self
    }

    pub fn with_replay_policy(mut self, policy: ReplayPolicy) -> Self {
        self.replay_policy = policy;
        self
    }

    /// Reject values the provider cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.pending_poll_interval.is_zero() {
            return Err(crate::NetError::Config {
                message: "pending_poll_interval must be non-zero".to_string(),
            });
        }
        if self.probe_timeout.is_zero() || self.quality_timeout.is_zero() {
            return Err(crate::NetError::Config {
                message: "probe timeouts must be non-zero".to_string(),
            });
        }
        if self.slow_threshold > self.quality_timeout {
            return Err(crate::NetError::Config {
                message: format!(
                    "slow_threshold {:?} exceeds quality_timeout {:?}",
                    self.slow_threshold, self.quality_timeout
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = ManagerConfig::new().with_pending_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_above_timeout_rejected() {
        let config = ManagerConfig::new()
            .with_quality_timeout(Duration::from_secs(1))
            .with_slow_threshold(Duration::from_secs(2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_probe_timeout_within_bounds() {
        assert!(NetworkConfig::PROBE_TIMEOUT <= Duration::from_secs(5));
        assert!(NetworkConfig::SLOW_THRESHOLD < NetworkConfig::QUALITY_PROBE_TIMEOUT);
    }
}
