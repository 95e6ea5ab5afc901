use std::sync::Arc;
use std::time::Instant;

use crate::admission::AdmissionController;
use crate::aggregator::{AggregatorConfig, MetricsAggregator};
use crate::config::Settings;
use crate::connection_manager::{ConnectionRegistry, RegistryConfig};
use crate::error::{AppError, Result};
use crate::ingest::EventIngestor;
use crate::redis::RedisPool;
use crate::store::{create_counter_store, CounterStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn CounterStore>,
    pub ingestor: Arc<EventIngestor>,
    pub aggregator: Arc<MetricsAggregator>,
    /// Present when the Redis store backend is configured
    pub redis_pool: Option<Arc<RedisPool>>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the state from settings, opening a Redis pool when
    /// `store.backend = "redis"`.
    pub fn new(settings: Settings) -> Result<Self> {
        let redis_pool = if settings.store.backend == "redis" {
            let pool = RedisPool::from_config(&settings.redis)
                .map_err(|e| AppError::Internal(format!("Invalid Redis configuration: {}", e)))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        let store = create_counter_store(&settings, redis_pool.clone());
        Ok(Self::with_store(settings, store, redis_pool))
    }

    /// Build the state around an existing store
    pub fn with_store(
        settings: Settings,
        store: Arc<dyn CounterStore>,
        redis_pool: Option<Arc<RedisPool>>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(settings.websocket.max_connections));
        let registry = Arc::new(ConnectionRegistry::new(
            admission,
            RegistryConfig::from(&settings.websocket),
        ));
        let ingestor = Arc::new(EventIngestor::from_settings(store.clone(), &settings));
        let aggregator = Arc::new(MetricsAggregator::new(
            store.clone(),
            registry.clone(),
            AggregatorConfig::from(&settings),
        ));

        Self {
            settings: Arc::new(settings),
            registry,
            store,
            ingestor,
            aggregator,
            redis_pool,
            start_time: Instant::now(),
        }
    }

    /// Clear counts left in the store by a previous run so the first window
    /// starts from zero. Must run before the tick task starts.
    pub async fn discard_previous_run(&self) -> std::result::Result<(), StoreError> {
        self.aggregator.reset().await?;
        tracing::info!(backend = self.store.backend_type(), "Cleared counters from a previous run");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;

    #[tokio::test]
    async fn test_startup_discards_leftover_counts() {
        let store = Arc::new(MemoryCounterStore::new());
        store
            .record_message(&["stale".to_string(), "carried".to_string()])
            .await
            .unwrap();
        store.record_message(&[]).await.unwrap();

        let state = AppState::with_store(Settings::default(), store.clone(), None);
        state.discard_previous_run().await.unwrap();

        assert_eq!(store.peek_message_count(), 0);
        assert!(store.all_keywords().await.unwrap().is_empty());
        let snapshot = state.aggregator.tick().await;
        assert_eq!(snapshot.snapshot().unwrap().messages_per_sec, Some(0.0));
    }
}
