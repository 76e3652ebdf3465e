//! Network quality classifier.
//!
//! One timed round trip per call, bucketed into [`NetworkQuality`]. Callers
//! invoke it once per connectivity change (plus once at startup); it never
//! probes on its own schedule.

use crate::config::NetworkConfig;
use crate::network::client::DynLatencyProbe;
use crate::network::probe::ConnectionState;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Coarse connection quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    #[default]
    Unknown,
    Offline,
    Slow,
    Fast,
}

impl std::fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkQuality::Unknown => write!(f, "unknown"),
            NetworkQuality::Offline => write!(f, "offline"),
            NetworkQuality::Slow => write!(f, "slow"),
            NetworkQuality::Fast => write!(f, "fast"),
        }
    }
}

/// Classifies round-trip latency into quality tiers.
pub struct QualityClassifier {
    probe: DynLatencyProbe,
    slow_threshold: Duration,
    timeout: Duration,
}

impl QualityClassifier {
    pub fn new(probe: DynLatencyProbe) -> Self {
        Self::with_thresholds(
            probe,
            NetworkConfig::SLOW_THRESHOLD,
            NetworkConfig::QUALITY_PROBE_TIMEOUT,
        )
    }

    pub fn with_thresholds(probe: DynLatencyProbe, slow_threshold: Duration, timeout: Duration) -> Self {
        Self {
            probe,
            slow_threshold,
            timeout,
        }
    }

    /// Classify the current connection.
    ///
    /// Returns [`NetworkQuality::Offline`] without probing when `state` is not
    /// reachable. A probe that outlives the timeout is `Slow`; any other probe
    /// failure is `Unknown`.
    pub async fn detect_network_quality(&self, state: &ConnectionState) -> NetworkQuality {
        if !state.is_internet_reachable() {
            return NetworkQuality::Offline;
        }

        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.probe.round_trip()).await {
            Ok(Ok(())) => {
                let elapsed = started.elapsed();
                let quality = self.classify(elapsed);
                debug!("Quality probe took {:?}: {}", elapsed, quality);
                quality
            }
            Ok(Err(e)) => {
                warn!("Quality probe failed: {}", e);
                NetworkQuality::Unknown
            }
            Err(_) => {
                debug!("Quality probe exceeded {:?}", self.timeout);
                NetworkQuality::Slow
            }
        }
    }

    /// Bucket a measured round trip.
    pub fn classify(&self, elapsed: Duration) -> NetworkQuality {
        if elapsed < self.slow_threshold {
            NetworkQuality::Fast
        } else {
            NetworkQuality::Slow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::client::{FixedLatency, LatencyProbe};
    use crate::network::link::ConnectionType;
    use crate::{NetError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProbe(AtomicUsize);

    #[async_trait]
    impl LatencyProbe for CountingProbe {
        async fn round_trip(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl LatencyProbe for FailingProbe {
        async fn round_trip(&self) -> Result<()> {
            Err(NetError::Network {
                message: "connection reset".into(),
                cause: None,
            })
        }
    }

    fn online() -> ConnectionState {
        ConnectionState::new(true, true, ConnectionType::Wifi)
    }

    #[tokio::test]
    async fn test_unreachable_is_offline_without_probing() {
        let probe = Arc::new(CountingProbe(AtomicUsize::new(0)));
        let classifier = QualityClassifier::new(probe.clone());

        let captive = ConnectionState::new(true, false, ConnectionType::Wifi);
        assert_eq!(
            classifier.detect_network_quality(&captive).await,
            NetworkQuality::Offline
        );
        assert_eq!(
            classifier
                .detect_network_quality(&ConnectionState::offline())
                .await,
            NetworkQuality::Offline
        );
        assert_eq!(probe.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_round_trip() {
        let classifier = QualityClassifier::new(Arc::new(FixedLatency(Duration::from_millis(200))));
        assert_eq!(
            classifier.detect_network_quality(&online()).await,
            NetworkQuality::Fast
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_round_trip() {
        let classifier = QualityClassifier::new(Arc::new(FixedLatency(Duration::from_secs(2))));
        assert_eq!(
            classifier.detect_network_quality(&online()).await,
            NetworkQuality::Slow
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_slow() {
        let classifier = QualityClassifier::with_thresholds(
            Arc::new(FixedLatency(Duration::from_secs(60))),
            Duration::from_millis(1500),
            Duration::from_secs(5),
        );
        assert_eq!(
            classifier.detect_network_quality(&online()).await,
            NetworkQuality::Slow
        );
    }

    #[tokio::test]
    async fn test_probe_error_is_unknown() {
        let classifier = QualityClassifier::new(Arc::new(FailingProbe));
        assert_eq!(
            classifier.detect_network_quality(&online()).await,
            NetworkQuality::Unknown
        );
    }

    #[test]
    fn test_classify_boundary() {
        let classifier = QualityClassifier::new(Arc::new(FixedLatency(Duration::ZERO)));
        assert_eq!(classifier.classify(Duration::from_millis(1499)), NetworkQuality::Fast);
        assert_eq!(classifier.classify(Duration::from_millis(1500)), NetworkQuality::Slow);
    }
}
