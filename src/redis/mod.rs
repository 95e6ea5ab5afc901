//! Redis access for the counter store
//!
//! - `CircuitBreaker`: stops hammering Redis while it is unavailable
//! - `RedisLink`: link state reported by `/health`
//! - `pool`: shared multiplexed connection

mod circuit_breaker;
mod link;
pub mod pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use link::{LinkState, LinkStats, RedisLink};
pub use pool::{PoolError, RedisPool};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
