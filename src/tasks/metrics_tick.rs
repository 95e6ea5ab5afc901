use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::aggregator::MetricsAggregator;

/// Background task driving the aggregator at a fixed period
pub struct MetricsTickTask {
    aggregator: Arc<MetricsAggregator>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl MetricsTickTask {
    pub fn new(
        aggregator: Arc<MetricsAggregator>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            aggregator,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        // A slow tick must not be followed by a burst of catch-up ticks
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await;

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Metrics tick task started"
        );

        loop {
            // biased: once shutdown is signalled no further tick may fire
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    tracing::info!("Metrics tick task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.aggregator.tick().await;
                }
            }
        }

        tracing::info!("Metrics tick task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionController;
    use crate::aggregator::AggregatorConfig;
    use crate::connection_manager::{ConnectionRegistry, RegistryConfig};
    use crate::store::MemoryCounterStore;
    use crate::websocket::ServerMessage;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_ticks_until_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(AdmissionController::new(10)),
            RegistryConfig {
                registration_grace: Duration::ZERO,
                stale_threshold: Duration::from_secs(60),
                keepalive_interval: Duration::from_secs(20),
            },
        ));
        let aggregator = Arc::new(MetricsAggregator::new(
            Arc::new(MemoryCounterStore::new()),
            registry.clone(),
            AggregatorConfig::default(),
        ));
        let (tx, mut rx) = mpsc::channel(64);
        registry.register(tx).unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(
            MetricsTickTask::new(aggregator.clone(), Duration::from_millis(10), shutdown_rx).run(),
        );

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let message: ServerMessage = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert!(matches!(message, ServerMessage::Metrics(ref update) if !update.is_partial()));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        // Drain what was queued before shutdown, then nothing new arrives
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }
}
