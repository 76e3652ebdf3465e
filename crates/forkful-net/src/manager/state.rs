//! Observable provider state.

use crate::network::{ConnectionState, ConnectionType, NetworkQuality};
use crate::reconnect::ReplayReport;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything a consumer reads from the provider.
///
/// `is_online` always equals `is_internet_reachable` and `is_offline` is its
/// negation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSnapshot {
    pub is_connected: bool,
    pub is_internet_reachable: bool,
    pub connection_type: ConnectionType,
    pub is_offline: bool,
    pub is_online: bool,
    pub network_quality: NetworkQuality,
    pub is_network_reconnecting: bool,
    pub pending_request_count: usize,
    pub last_reconnect_time: Option<DateTime<Utc>>,
}

impl NetworkSnapshot {
    pub(crate) fn new(connection: ConnectionState, quality: NetworkQuality, pending: usize) -> Self {
        let mut snapshot = Self {
            is_connected: false,
            is_internet_reachable: false,
            connection_type: ConnectionType::Unknown,
            is_offline: true,
            is_online: false,
            network_quality: NetworkQuality::Offline,
            is_network_reconnecting: false,
            pending_request_count: pending,
            last_reconnect_time: None,
        };
        snapshot.apply_connection(connection);
        if connection.is_internet_reachable() {
            snapshot.network_quality = quality;
        }
        snapshot
    }

    pub fn connection(&self) -> ConnectionState {
        ConnectionState::new(
            self.is_connected,
            self.is_internet_reachable,
            self.connection_type,
        )
    }

    /// Replace the connection fields. An unreachable state forces the quality
    /// to `Offline`; a measured tier is never kept across an outage.
    pub(crate) fn apply_connection(&mut self, connection: ConnectionState) {
        self.is_connected = connection.is_connected();
        self.is_internet_reachable = connection.is_internet_reachable();
        self.connection_type = connection.connection_type();
        self.is_online = self.is_internet_reachable;
        self.is_offline = !self.is_online;

        if !self.is_internet_reachable {
            self.network_quality = NetworkQuality::Offline;
        } else if self.network_quality == NetworkQuality::Offline {
            self.network_quality = NetworkQuality::Unknown;
        }
    }
}

impl Default for NetworkSnapshot {
    fn default() -> Self {
        Self::new(ConnectionState::offline(), NetworkQuality::Offline, 0)
    }
}

/// Change notifications broadcast by the provider.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    ConnectionChanged(ConnectionState),
    /// Reachability flipped; carries the new value.
    ReachabilityChanged(bool),
    QualityChanged(NetworkQuality),
    ReplayStarted {
        at: DateTime<Utc>,
        pending: usize,
    },
    ReplayFinished(ReplayReport),
}

/// Outcome of [`NetworkManager::execute_or_queue`](super::NetworkManager::execute_or_queue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The call ran and succeeded.
    Completed,
    /// The call was deferred under this request id.
    Queued(String),
}
