use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::admission::{AdmissionController, Rejection};
use crate::config::WebSocketConfig;
use crate::metrics::{BroadcastMetrics, ConnectionMetrics};
use crate::websocket::{MetricsUpdate, OutboundMessage, ServerMessage};

use super::stats::{BroadcastReport, ConnectionStats, Disconnected, EvictionReport, SweepReport};
use super::types::{ConnectionError, ConnectionHandle};

/// Timing knobs for the registry
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// How long a connection may stay unidentified. Zero disables the timer.
    pub registration_grace: Duration,
    /// Idle time after which sweep reaps an unresponsive connection
    pub stale_threshold: Duration,
    /// Transport ping period. Zero disables pings, and idleness alone then
    /// counts as unresponsive.
    pub keepalive_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from(&WebSocketConfig::default())
    }
}

impl From<&WebSocketConfig> for RegistryConfig {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            registration_grace: config.registration_grace(),
            stale_threshold: config.stale_threshold(),
            keepalive_interval: config.ping_interval(),
        }
    }
}

impl From<Rejection> for ConnectionError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::AtCapacity { current, limit } => ConnectionError::CapacityReached {
                current,
                max: limit,
            },
            Rejection::ShuttingDown => ConnectionError::ShuttingDown,
        }
    }
}

/// Both directions of the user presence mapping, always updated together
#[derive(Default)]
struct Presence {
    by_user: HashMap<String, Uuid>,
    by_conn: HashMap<Uuid, String>,
}

impl Presence {
    /// Bind `user_id` to `conn`, last writer wins. Returns the connection
    /// that previously owned the user, if it was a different one.
    fn bind(&mut self, user_id: &str, conn: Uuid) -> Option<Uuid> {
        if let Some(previous_user) = self.by_conn.get(&conn).cloned() {
            if previous_user != user_id && self.by_user.get(&previous_user) == Some(&conn) {
                self.by_user.remove(&previous_user);
            }
        }

        let displaced = match self.by_user.insert(user_id.to_string(), conn) {
            Some(previous_conn) if previous_conn != conn => {
                self.by_conn.remove(&previous_conn);
                Some(previous_conn)
            }
            _ => None,
        };

        self.by_conn.insert(conn, user_id.to_string());
        displaced
    }

    fn release_user(&mut self, user_id: &str) -> bool {
        match self.by_user.remove(user_id) {
            Some(conn) => {
                self.by_conn.remove(&conn);
                true
            }
            None => false,
        }
    }

    fn release_conn(&mut self, conn: Uuid) -> Option<String> {
        let user_id = self.by_conn.remove(&conn)?;
        if self.by_user.get(&user_id) == Some(&conn) {
            self.by_user.remove(&user_id);
        }
        Some(user_id)
    }
}

/// Owns every live connection and the user presence table.
///
/// Connections live in a `DashMap`; the presence mapping sits behind one
/// `parking_lot::Mutex` that is never held across an `.await`. Removal from
/// the connection map happens under the presence lock so a join racing a
/// disconnect can never leave a dangling presence entry.
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    presence: Mutex<Presence>,
    admission: Arc<AdmissionController>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    pub fn new(admission: Arc<AdmissionController>, config: RegistryConfig) -> Self {
        Self {
            connections: DashMap::new(),
            presence: Mutex::new(Presence::default()),
            admission,
            config,
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Admit and register a new connection, starting its grace timer.
    pub fn register(
        self: &Arc<Self>,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Result<Arc<ConnectionHandle>, ConnectionError> {
        if let Err(rejection) = self.admission.try_reserve() {
            let err = ConnectionError::from(rejection);
            ConnectionMetrics::record_rejected(err.reason());
            return Err(err);
        }

        let handle = Arc::new(ConnectionHandle::new(sender));
        self.connections.insert(handle.id, handle.clone());
        ConnectionMetrics::record_opened();

        let grace = self.config.registration_grace;
        if !grace.is_zero() {
            let registry: Weak<Self> = Arc::downgrade(self);
            let connection_id = handle.id;
            let timer = tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if let Some(registry) = registry.upgrade() {
                    registry.expire_unidentified(connection_id);
                }
            });
            handle.set_grace_timer(timer);
        }

        tracing::debug!(
            connection_id = %handle.id,
            total = self.connections.len(),
            "Connection registered"
        );

        Ok(handle)
    }

    fn expire_unidentified(&self, connection_id: Uuid) {
        let Some(handle) = self.get(connection_id) else {
            return;
        };
        if handle.is_identified() {
            return;
        }

        if self.remove(connection_id).is_some() {
            handle.close();
            ConnectionMetrics::record_reclaimed("grace");
            tracing::info!(
                connection_id = %connection_id,
                grace_secs = self.config.registration_grace.as_secs(),
                "Closing connection that never identified"
            );
        }
    }

    /// Bind `user_id` to the connection and publish the new active-user count.
    ///
    /// Returns `None` for an unknown connection.
    pub fn on_join(&self, connection_id: Uuid, user_id: &str) -> Option<usize> {
        let handle = self.get(connection_id)?;
        handle.mark_identified();

        let (active, displaced) = {
            let mut presence = self.presence.lock();
            if !self.connections.contains_key(&connection_id) {
                return None;
            }
            let displaced = presence.bind(user_id, connection_id);
            (presence.by_user.len(), displaced)
        };

        if let Some(previous) = displaced {
            tracing::debug!(
                user_id = %user_id,
                previous_connection = %previous,
                connection_id = %connection_id,
                "User rebound to a newer connection"
            );
        }

        tracing::info!(user_id = %user_id, active_users = active, "User joined");
        self.publish_presence(active);
        Some(active)
    }

    /// Release the presence entry for `user_id`, publishing the new count.
    ///
    /// Returns whether an entry existed.
    pub fn on_leave(&self, user_id: &str) -> bool {
        let (removed, active) = {
            let mut presence = self.presence.lock();
            let removed = presence.release_user(user_id);
            (removed, presence.by_user.len())
        };

        tracing::info!(user_id = %user_id, active_users = active, removed, "User left");
        self.publish_presence(active);
        removed
    }

    /// Cancel the grace timer without creating a presence entry
    pub fn on_observe(&self, connection_id: Uuid) -> bool {
        match self.get(connection_id) {
            Some(handle) => {
                handle.mark_identified();
                true
            }
            None => false,
        }
    }

    /// Remove the connection and its presence entry. Idempotent.
    pub fn on_disconnect(&self, connection_id: Uuid) -> Option<Disconnected> {
        let (_, user_id, active_users) = self.remove(connection_id)?;

        if let Some(ref user) = user_id {
            tracing::info!(
                user_id = %user,
                connection_id = %connection_id,
                active_users,
                "User disconnected"
            );
            self.publish_presence(active_users);
        }

        Some(Disconnected {
            user_id,
            active_users,
        })
    }

    pub fn touch(&self, connection_id: Uuid) -> bool {
        match self.connections.get(&connection_id) {
            Some(handle) => {
                handle.update_activity();
                true
            }
            None => false,
        }
    }

    fn remove(&self, connection_id: Uuid) -> Option<(Arc<ConnectionHandle>, Option<String>, usize)> {
        let (handle, user_id, active) = {
            let mut presence = self.presence.lock();
            let (_, handle) = self.connections.remove(&connection_id)?;
            let user_id = presence.release_conn(connection_id);
            (handle, user_id, presence.by_user.len())
        };

        handle.cancel_grace_timer();
        self.admission.release();
        ConnectionMetrics::record_closed();
        ConnectionMetrics::set_active_users(active);

        Some((handle, user_id, active))
    }

    /// Reap connections whose transport is gone, and connections that idled
    /// past the stale threshold without answering a ping.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(chrono::Utc::now().timestamp_millis())
    }

    /// [`sweep`](Self::sweep) evaluated at `now_ms`
    pub fn sweep_at(&self, now_ms: i64) -> SweepReport {
        let stale_ms = self.config.stale_threshold.as_millis() as i64;
        let pinging = !self.config.keepalive_interval.is_zero();

        let candidates: Vec<(Uuid, bool)> = self
            .connections
            .iter()
            .filter_map(|entry| {
                let handle = entry.value();
                if handle.is_transport_closed() {
                    Some((handle.id, false))
                } else if handle.idle_ms(now_ms) > stale_ms
                    && (!pinging || handle.is_unresponsive())
                {
                    Some((handle.id, true))
                } else {
                    None
                }
            })
            .collect();

        let mut report = SweepReport::default();
        let mut active_after = None;

        for (connection_id, stale) in candidates {
            let Some((handle, user_id, active)) = self.remove(connection_id) else {
                continue;
            };

            if stale {
                handle.close();
                report.stale_connections += 1;
                ConnectionMetrics::record_reclaimed("stale");
            } else {
                report.closed_connections += 1;
                ConnectionMetrics::record_reclaimed("closed");
            }

            if user_id.is_some() {
                report.removed_users += 1;
                active_after = Some(active);
            }
        }

        if report.removed_connections() > 0 {
            tracing::info!(
                closed = report.closed_connections,
                stale = report.stale_connections,
                removed_users = report.removed_users,
                remaining = self.connections.len(),
                "Sweep reclaimed connections"
            );
        }

        if let Some(active) = active_after {
            self.publish_presence(active);
        }

        report
    }

    fn publish_presence(&self, active_users: usize) {
        let update = ServerMessage::Metrics(MetricsUpdate::presence(active_users));
        match OutboundMessage::preserialize(&update) {
            Ok(frame) => {
                self.broadcast(frame);
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize presence update"),
        }
    }

    /// Fan a frame out to every registered connection without waiting.
    ///
    /// A full queue drops the frame for that connection only.
    pub fn broadcast(&self, message: OutboundMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for entry in self.connections.iter() {
            match entry.value().sender.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => report.dropped += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => report.closed += 1,
            }
        }

        BroadcastMetrics::record(report.delivered, report.dropped, report.closed);
        if report.dropped > 0 {
            tracing::debug!(dropped = report.dropped, "Broadcast frames dropped on full queues");
        }
        report
    }

    /// Send `notice` to every connection and ask each one to close.
    ///
    /// Returns how many connections were signalled. Entries are removed by
    /// their connection tasks as they exit.
    pub fn close_all(&self, notice: &ServerMessage) -> usize {
        let frame = OutboundMessage::preserialize(notice)
            .unwrap_or_else(|_| OutboundMessage::Raw(notice.clone()));

        let mut count = 0;
        for entry in self.connections.iter() {
            let _ = entry.value().sender.try_send(frame.clone());
            entry.value().close();
            count += 1;
        }
        count
    }

    /// Remove every connection and presence entry now, sending `notice`
    /// before each transport is closed.
    ///
    /// Unlike [`close_all`](Self::close_all) the registry is emptied
    /// immediately instead of waiting for the connection tasks to exit.
    pub fn disconnect_all(&self, notice: &ServerMessage) -> EvictionReport {
        let frame = OutboundMessage::preserialize(notice)
            .unwrap_or_else(|_| OutboundMessage::Raw(notice.clone()));
        let ids: Vec<Uuid> = self.connections.iter().map(|entry| *entry.key()).collect();

        let mut report = EvictionReport::default();
        for connection_id in ids {
            let Some((handle, user_id, _)) = self.remove(connection_id) else {
                continue;
            };
            let _ = handle.sender.try_send(frame.clone());
            handle.close();
            ConnectionMetrics::record_reclaimed("operator");
            report.disconnected_connections += 1;
            if user_id.is_some() {
                report.removed_users += 1;
            }
        }

        tracing::warn!(
            disconnected = report.disconnected_connections,
            removed_users = report.removed_users,
            "All clients disconnected by operator"
        );
        report
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.value().clone())
    }

    pub fn user_for(&self, connection_id: Uuid) -> Option<String> {
        self.presence.lock().by_conn.get(&connection_id).cloned()
    }

    pub fn connection_for(&self, user_id: &str) -> Option<Uuid> {
        self.presence.lock().by_user.get(user_id).copied()
    }

    pub fn active_users(&self) -> usize {
        self.presence.lock().by_user.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> ConnectionStats {
        let unidentified = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_identified())
            .count();

        ConnectionStats {
            active_users: self.active_users(),
            total_connections: self.connections.len(),
            unidentified_connections: unidentified,
            max_connections: self.admission.limit(),
        }
    }
}
