//! Graceful shutdown for the ChatPulse server.
//!
//! Order matters:
//! 1. Stop admitting new connections
//! 2. Stop the sweep and tick tasks (no tick fires after this point)
//! 3. Send every client a `shutdown` frame and ask its task to close
//! 4. Wait for the registry to drain

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::connection_manager::ConnectionRegistry;
use crate::websocket::ServerMessage;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long to wait for connection tasks to exit (default: 5 seconds)
    pub drain_timeout: Duration,
    /// Suggested reconnect delay sent to clients (default: 5 seconds)
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
            reconnect_after_seconds: 5,
        }
    }
}

pub struct GracefulShutdown {
    registry: Arc<ConnectionRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(registry: Arc<ConnectionRegistry>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(registry, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            shutdown_tx,
            config,
        }
    }

    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.registry.connection_count())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Phase 1: Rejecting new connections");
        self.registry.admission().stop_accepting();

        tracing::info!("Phase 2: Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 3: Notifying and closing clients");
        let notice = ServerMessage::shutdown(reason, self.config.reconnect_after_seconds);
        result.clients_notified = self.registry.close_all(&notice);

        tracing::info!("Phase 4: Waiting for connections to close");
        let remaining = self.wait_for_drain().await;
        result.connections_closed = result.clients_notified.saturating_sub(remaining);

        result.duration = start.elapsed();
        result.success = remaining == 0;

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            remaining,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    /// Connections still registered when the drain wait ended
    async fn wait_for_drain(&self) -> usize {
        if self.registry.connection_count() == 0 {
            return 0;
        }

        let registry = self.registry.clone();
        let wait = async move {
            while registry.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };

        if timeout(self.config.drain_timeout, wait).await.is_err() {
            tracing::warn!(
                remaining_connections = self.registry.connection_count(),
                "Some connections did not close gracefully"
            );
        }

        self.registry.connection_count()
    }
}

#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// No connection was left registered
    pub success: bool,
    pub clients_notified: usize,
    pub connections_closed: usize,
    pub duration: Duration,
}
