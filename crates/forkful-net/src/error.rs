//! Error types for the forkful network layer.
//!
//! Most failures inside this crate are recovered locally and only logged;
//! these types surface from the few operations that report them (persistence,
//! builder validation, the call-or-defer helper) and classify errors raised
//! by queued API calls.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the network layer.
#[derive(Debug, Error)]
pub enum NetError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Platform network API unavailable: {message}")]
    PlatformUnavailable { message: String },

    // Queue errors
    #[error("Replay of request {request_id} failed: {message}")]
    Replay { request_id: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for network layer operations.
pub type Result<T> = std::result::Result<T, NetError>;

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(err: reqwest::Error) -> Self {
        // The elapsed limit is not recoverable from reqwest, so timeouts stay
        // Network errors with reqwest's own message
        NetError::Network {
            message: err.to_string(),
            cause: err.url().map(|u| u.to_string()),
        }
    }
}

impl NetError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        NetError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error is transient, i.e. the call is worth deferring
    /// until connectivity returns.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetError::Network { .. } | NetError::Timeout(_))
    }

    /// Classify an arbitrary error returned by a queued API call.
    ///
    /// Only errors that carry a [`NetError`] or a [`reqwest::Error`] somewhere
    /// in their chain can be recognised as transient.
    pub fn is_transient(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            if let Some(net) = cause.downcast_ref::<NetError>() {
                return net.is_retryable();
            }
            if let Some(req) = cause.downcast_ref::<reqwest::Error>() {
                return req.is_connect() || req.is_timeout();
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetError::Replay {
            request_id: "req-1".into(),
            message: "500 from server".into(),
        };
        assert_eq!(
            err.to_string(),
            "Replay of request req-1 failed: 500 from server"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(NetError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(NetError::Network {
            message: "connection reset".into(),
            cause: None,
        }
        .is_retryable());
        assert!(!NetError::Config {
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_transient_through_anyhow_context() {
        let err = anyhow::Error::new(NetError::Timeout(std::time::Duration::from_secs(3)))
            .context("placing order");
        assert!(NetError::is_transient(&err));

        let err = anyhow::anyhow!("validation failed: missing address");
        assert!(!NetError::is_transient(&err));
    }

    #[tokio::test]
    async fn test_reqwest_timeout_maps_to_network() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            // Accept and never answer
            let _conn = listener.accept().await;
            std::future::pending::<()>().await;
        });

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap();
        let url = format!("http://{}/health", addr);
        let err = client.get(&url).send().await.unwrap_err();
        assert!(err.is_timeout());

        let net = NetError::from(err);
        assert!(net.is_retryable());
        assert!(!net.to_string().contains("0ns"));
        match net {
            NetError::Network { cause, .. } => assert_eq!(cause.as_deref(), Some(url.as_str())),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
