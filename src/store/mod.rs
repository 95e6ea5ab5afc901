//! Counter store: message throughput counter and keyword frequency table

mod backend;
mod factory;
mod memory_backend;
mod redis_backend;

pub use backend::{
    keyword_order, rank_keywords, with_timeout, CounterStore, KeywordCount, StoreError,
};
pub use factory::create_counter_store;
pub use memory_backend::MemoryCounterStore;
pub use redis_backend::RedisCounterStore;
