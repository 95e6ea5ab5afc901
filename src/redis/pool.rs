//! Shared multiplexed Redis connection with circuit breaker integration.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RedisLink};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

/// One multiplexed connection shared by every connection worker and the
/// aggregator tick. Connection errors drop the cached connection so the next
/// call reconnects.
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    circuit_breaker: Arc<CircuitBreaker>,
    link: RedisLink,
    config: RedisConfig,
}

impl RedisPool {
    pub fn new(
        config: RedisConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            circuit_breaker,
            link: RedisLink::new(),
            config,
        })
    }

    /// Build a pool with its own breaker from settings
    pub fn from_config(config: &RedisConfig) -> Result<Self, PoolError> {
        let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig::from(config)));
        Self::new(config.clone(), breaker)
    }

    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            self.link.suppressed();
            return Err(PoolError::CircuitOpen);
        }

        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                // Only a completed command counts as a breaker success
                *conn_guard = Some(conn.clone());
                self.link.connected();
                tracing::info!(url = %self.config.url, "Redis connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                self.link.lost(e.to_string());
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run a command against the shared connection, recording the outcome
    /// on the circuit breaker.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                    self.link.lost(e.to_string());
                }
                self.circuit_breaker.record_failure();
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Count a call abandoned at its deadline as a breaker failure and
    /// drop the cached connection, which may be wedged.
    pub fn record_timeout(&self, timeout: Duration) {
        self.circuit_breaker.record_failure();
        self.link.timed_out(timeout.as_millis() as u64);
        if let Ok(mut conn_guard) = self.connection.try_write() {
            *conn_guard = None;
        }
        tracing::debug!(
            timeout_ms = timeout.as_millis() as u64,
            circuit = self.circuit_breaker.state().as_str(),
            "Redis call timed out"
        );
    }

    pub fn is_healthy(&self) -> bool {
        self.link.is_up() && self.circuit_breaker.state() == CircuitState::Closed
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn link(&self) -> &RedisLink {
        &self.link
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}
