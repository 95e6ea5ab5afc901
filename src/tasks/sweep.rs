use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::connection_manager::ConnectionRegistry;

/// Background task reaping closed and idle connections
pub struct SweepTask {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl SweepTask {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            stale_threshold_secs = self.registry.config().stale_threshold.as_secs(),
            "Sweep task started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    tracing::info!("Sweep task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.registry.sweep();
                }
            }
        }

        tracing::info!("Sweep task stopped");
    }
}
