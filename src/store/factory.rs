//! Counter store factory

use std::sync::Arc;

use crate::config::Settings;
use crate::redis::RedisPool;

use super::backend::CounterStore;
use super::memory_backend::MemoryCounterStore;
use super::redis_backend::RedisCounterStore;

/// Create the counter store selected by `store.backend`.
///
/// `"redis"` needs a pool; without one the memory backend is used instead.
/// Unknown values also fall back to memory.
pub fn create_counter_store(
    settings: &Settings,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn CounterStore> {
    match settings.store.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.redis.key_prefix,
                    "Creating Redis counter store"
                );
                Arc::new(RedisCounterStore::new(pool, &settings.redis.key_prefix))
            } else {
                tracing::warn!("Redis store requested but no pool provided, falling back to memory");
                Arc::new(MemoryCounterStore::new())
            }
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating in-memory counter store");
            Arc::new(MemoryCounterStore::new())
        }
        other => {
            tracing::warn!(backend = %other, "Unknown store backend, falling back to memory");
            Arc::new(MemoryCounterStore::new())
        }
    }
}
