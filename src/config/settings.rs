use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub merger: MergerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key namespace for the counter and keyword table
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_cb_reset_timeout")]
    pub circuit_breaker_reset_timeout_seconds: u64,
}

/// Counter store selection
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// "memory" or "redis"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// Upper bound for a single store call before the event is dropped
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Admission ceiling for simultaneously registered connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds a connection may stay unidentified before it is closed
    #[serde(default = "default_registration_grace")]
    pub registration_grace_seconds: u64,
    /// Idle seconds after which an unresponsive connection is reaped
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_seconds: u64,
    /// Transport ping period in milliseconds, 0 disables liveness pings
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Sweep task interval in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Per-connection outbound queue capacity
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Aggregator tick period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Tokens must be strictly longer than this many characters
    #[serde(default = "default_keyword_min_len")]
    pub keyword_min_len: usize,
    /// Tokens must be strictly shorter than this many characters
    #[serde(default = "default_keyword_max_len")]
    pub keyword_max_len: usize,
    /// Keyword table cap, 0 disables trimming
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_merger_port")]
    pub port: u16,
    /// WebSocket URLs of the backend shards
    #[serde(default)]
    pub shards: Vec<String>,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_delay_ms: u64,
    /// Consecutive failed connects before a shard is marked down
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds without a snapshot before a shard is left out of the merge
    #[serde(default = "default_dead_shard_seconds")]
    pub dead_shard_seconds: u64,
    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: u64,
    /// Bound on connecting to a shard, handshake included
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_merger_port() -> u16 {
    3100
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "chatpulse".to_string()
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_reset_timeout() -> u64 {
    30
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_operation_timeout_ms() -> u64 {
    500
}

fn default_max_connections() -> usize {
    4000
}

fn default_registration_grace() -> u64 {
    30
}

fn default_stale_threshold() -> u64 {
    60
}

fn default_ping_interval_ms() -> u64 {
    20_000
}

fn default_sweep_interval_ms() -> u64 {
    1500
}

fn default_outbound_buffer() -> usize {
    32
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_top_k() -> usize {
    10
}

fn default_keyword_min_len() -> usize {
    2
}

fn default_keyword_max_len() -> usize {
    50
}

fn default_max_keywords() -> usize {
    10_000
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    10
}

fn default_dead_shard_seconds() -> u64 {
    5
}

fn default_keepalive_seconds() -> u64 {
    15
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("redis.url", default_redis_url())?
            .set_default("store.backend", default_store_backend())?
            .set_default("websocket.max_connections", default_max_connections() as u64)?
            .set_default("metrics.tick_interval_ms", default_tick_interval_ms())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // CHATPULSE__WEBSOCKET__MAX_CONNECTIONS, CHATPULSE__MERGER__SHARDS=ws://a,ws://b ...
            .add_source(
                Environment::with_prefix("CHATPULSE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("merger.shards")
                    .with_list_parse_key("server.cors_origins"),
            )
            // Short names used by existing deployments
            .set_override_option("server.port", env::var("PORT").ok())?
            .set_override_option("redis.url", env::var("REDIS_URL").ok())?
            .set_override_option("websocket.max_connections", env::var("MAX_CONNECTIONS").ok())?;

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn merger_addr(&self) -> String {
        format!("{}:{}", self.merger.host, self.merger.port)
    }
}

impl WebSocketConfig {
    pub fn registration_grace(&self) -> Duration {
        Duration::from_secs(self.registration_grace_seconds)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

impl MetricsConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_seconds: default_cb_reset_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            registration_grace_seconds: default_registration_grace(),
            stale_threshold_seconds: default_stale_threshold(),
            ping_interval_ms: default_ping_interval_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            top_k: default_top_k(),
            keyword_min_len: default_keyword_min_len(),
            keyword_max_len: default_keyword_max_len(),
            max_keywords: default_max_keywords(),
        }
    }
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_merger_port(),
            shards: vec![],
            backoff_initial_delay_ms: default_backoff_initial_ms(),
            backoff_max_delay_ms: default_backoff_max_ms(),
            max_retries: default_max_retries(),
            dead_shard_seconds: default_dead_shard_seconds(),
            keepalive_seconds: default_keepalive_seconds(),
            connect_timeout_ms: default_connect_timeout_ms(),
            top_k: default_top_k(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}
