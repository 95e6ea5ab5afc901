//! Registry statistics and operation reports

use serde::Serialize;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub active_users: usize,
    pub total_connections: usize,
    /// Connections that have not sent join or observe yet
    pub unidentified_connections: usize,
    pub max_connections: usize,
}

/// Outcome of a sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Connections whose transport was already gone
    pub closed_connections: usize,
    /// Idle connections that were forcibly closed
    pub stale_connections: usize,
    /// Presence entries released by the removals
    pub removed_users: usize,
}

impl SweepReport {
    pub fn removed_connections(&self) -> usize {
        self.closed_connections + self.stale_connections
    }
}

/// Outcome of an operator disconnect of every client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionReport {
    pub disconnected_connections: usize,
    pub removed_users: usize,
}

/// Per-connection outcome of a fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Queue full, frame dropped for that connection only
    pub dropped: usize,
    /// Receiver already gone
    pub closed: usize,
}

/// Result of removing a connection from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
    /// User whose presence entry went away with the connection
    pub user_id: Option<String>,
    pub active_users: usize,
}
