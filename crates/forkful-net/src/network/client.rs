//! HTTP probes for reachability and round-trip latency.
//!
//! Both probes are traits so the provider can be driven by a platform
//! reachability API, a custom health endpoint, or a test double.
//! [`HttpProbeClient`] is the reqwest-backed default.

use crate::config::NetworkConfig;
use crate::{NetError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// End-to-end reachability check (stronger than link association).
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    /// Returns `Ok(true)` when the internet is confirmed reachable.
    async fn is_reachable(&self) -> Result<bool>;
}

/// A single small round trip used to time the connection.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn round_trip(&self) -> Result<()>;
}

pub type DynReachabilityCheck = Arc<dyn ReachabilityCheck>;
pub type DynLatencyProbe = Arc<dyn LatencyProbe>;

/// reqwest-backed reachability and latency probe.
pub struct HttpProbeClient {
    client: Client,
    probe_urls: Vec<String>,
    quality_url: String,
}

impl HttpProbeClient {
    /// Create a probe client against the default endpoints.
    pub fn new() -> Result<Self> {
        Self::with_endpoints(
            NetworkConfig::DEFAULT_PROBE_URLS
                .iter()
                .map(|u| u.to_string())
                .collect(),
            NetworkConfig::DEFAULT_QUALITY_URL,
        )
    }

    /// Create a probe client against custom endpoints, e.g. the backend's
    /// own health route.
    pub fn with_endpoints(probe_urls: Vec<String>, quality_url: impl Into<String>) -> Result<Self> {
        if probe_urls.is_empty() {
            return Err(NetError::Config {
                message: "at least one probe URL is required".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(NetworkConfig::PROBE_TIMEOUT)
            .connect_timeout(NetworkConfig::PROBE_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NetError::Network {
                message: format!("Failed to create probe client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            probe_urls,
            quality_url: quality_url.into(),
        })
    }

    pub fn probe_urls(&self) -> &[String] {
        &self.probe_urls
    }

    /// Whether a probe response proves the network works.
    ///
    /// 403 still means the real server answered (rate limiting, regional
    /// blocks). Redirects are not followed and count as unreachable: a
    /// captive portal answers probes with a redirect to its login page.
    pub fn is_reachable_status(status: StatusCode) -> bool {
        status.is_success() || status == StatusCode::FORBIDDEN
    }

    async fn probe_url(&self, url: &str) -> Result<bool> {
        match self.client.head(url).send().await {
            Ok(resp) => Ok(Self::is_reachable_status(resp.status())),
            Err(e) => {
                debug!("Probe request to {} failed: {}", url, e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ReachabilityCheck for HttpProbeClient {
    async fn is_reachable(&self) -> Result<bool> {
        for url in &self.probe_urls {
            if self.probe_url(url).await? {
                return Ok(true);
            }
        }
        debug!("All {} probe URLs failed", self.probe_urls.len());
        Ok(false)
    }
}

#[async_trait]
impl LatencyProbe for HttpProbeClient {
    async fn round_trip(&self) -> Result<()> {
        let resp = self
            .client
            .get(&self.quality_url)
            .timeout(NetworkConfig::QUALITY_PROBE_TIMEOUT)
            .send()
            .await?;
        // Drain the (small) body so the timing covers the full exchange.
        let _ = resp.bytes().await?;
        Ok(())
    }
}

/// Reachability check that always answers the same way.
///
/// For platforms whose link adapter already reports reachability, and for
/// wiring the provider without network access.
pub struct StaticReachability(pub bool);

#[async_trait]
impl ReachabilityCheck for StaticReachability {
    async fn is_reachable(&self) -> Result<bool> {
        Ok(self.0)
    }
}

/// Latency probe that completes after a fixed delay.
pub struct FixedLatency(pub Duration);

#[async_trait]
impl LatencyProbe for FixedLatency {
    async fn round_trip(&self) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_status_codes() {
        assert!(HttpProbeClient::is_reachable_status(StatusCode::OK));
        assert!(HttpProbeClient::is_reachable_status(StatusCode::NO_CONTENT));
        assert!(HttpProbeClient::is_reachable_status(StatusCode::FORBIDDEN));

        // Captive portals redirect
        assert!(!HttpProbeClient::is_reachable_status(StatusCode::FOUND));

        assert!(!HttpProbeClient::is_reachable_status(StatusCode::NOT_FOUND));
        assert!(!HttpProbeClient::is_reachable_status(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn test_empty_probe_urls_rejected() {
        let result = HttpProbeClient::with_endpoints(Vec::new(), "https://example.com");
        assert!(matches!(result, Err(NetError::Config { .. })));
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpProbeClient::new().unwrap();
        assert_eq!(
            client.probe_urls().len(),
            NetworkConfig::DEFAULT_PROBE_URLS.len()
        );
    }

    #[tokio::test]
    async fn test_static_reachability() {
        assert!(StaticReachability(true).is_reachable().await.unwrap());
        assert!(!StaticReachability(false).is_reachable().await.unwrap());
    }
}
