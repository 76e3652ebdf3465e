//! Forkful Net - offline-aware network layer.
//!
//! Tracks whether the device can actually reach the internet (not just
//! whether a radio is associated), buckets the connection into a quality
//! tier, keeps a durable queue of calls deferred while offline, and replays
//! that queue once per offline-to-online transition.
//!
//! # Example
//!
//! ```rust,ignore
//! use forkful_net::{api_function, Dispatch, NetworkManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = NetworkManager::builder()
//!         .with_data_dir("/var/lib/forkful")
//!         .on_reachability_change(|online| println!("online: {}", online))
//!         .build()
//!         .await?;
//!
//!     let outcome = manager
//!         .execute_or_queue("POST /orders", api_function(|| async { Ok(()) }))
//!         .await?;
//!     if let Dispatch::Queued(id) = outcome {
//!         println!("deferred as {}", id);
//!     }
//!
//!     println!("{:?}", manager.snapshot());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod network;
pub mod queue;
pub mod reconnect;

// Re-export commonly used types
pub use config::{ManagerConfig, NetworkConfig, PathsConfig};
pub use error::{NetError, Result};
pub use events::{Listeners, Subscription};
pub use manager::{Dispatch, NetworkEvent, NetworkManager, NetworkManagerBuilder, NetworkSnapshot};
pub use network::{
    ConnectionState, ConnectionType, ConnectivityProbe, HttpProbeClient, LinkInfo, LinkMonitor,
    NetworkQuality, PushLinkMonitor, QualityClassifier, SystemLinkMonitor,
};
pub use queue::{
    api_function, ApiFunction, JsonQueueStore, MemoryQueueStore, PendingRequest,
    PendingRequestQueue, PersistedRequest, QueueStore,
};
pub use reconnect::{FailurePolicy, ReconnectCoordinator, ReplayPolicy, ReplayReport};
