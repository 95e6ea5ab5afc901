use serde::Serialize;
use thiserror::Error;

use crate::store::KeywordCount;
use crate::websocket::MetricsUpdate;

/// Connection state of one backend shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardState {
    Connecting,
    Up,
    Reconnecting,
    /// Retries exhausted; the shard is never retried again
    Down,
}

impl ShardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardState::Connecting => "connecting",
            ShardState::Up => "up",
            ShardState::Reconnecting => "reconnecting",
            ShardState::Down => "down",
        }
    }

    /// Gauge value for `chatpulse_shard_state`
    pub fn as_gauge(&self) -> i64 {
        match self {
            ShardState::Down => 0,
            ShardState::Up => 1,
            ShardState::Connecting => 2,
            ShardState::Reconnecting => 3,
        }
    }
}

impl std::fmt::Display for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Latest values reported by one shard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSnapshot {
    pub messages_per_sec: f64,
    pub active_users: u64,
    pub top_keywords: Vec<KeywordCount>,
}

impl ShardSnapshot {
    pub fn new(messages_per_sec: f64, active_users: u64, top_keywords: Vec<KeywordCount>) -> Self {
        Self {
            messages_per_sec,
            active_users,
            top_keywords,
        }
    }
}

impl From<MetricsUpdate> for ShardSnapshot {
    fn from(update: MetricsUpdate) -> Self {
        Self {
            messages_per_sec: update.messages_per_sec.unwrap_or_default(),
            active_users: update.active_users as u64,
            top_keywords: update.top_keywords.unwrap_or_default(),
        }
    }
}

/// Merged view across every live shard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedView {
    pub messages_per_sec: f64,
    pub active_users: u64,
    pub top_keywords: Vec<KeywordCount>,
    /// Shards that contributed to this view
    pub live_shards: usize,
    pub total_shards: usize,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

/// Per-shard status reported by the merger's `/health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardStatus {
    pub url: String,
    pub state: ShardState,
    /// Included in the merged view at the time of the report
    pub live: bool,
    pub consecutive_failures: u32,
    pub reconnects: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ShardError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Handshake did not finish within {0}ms")]
    ConnectTimeout(u64),

    #[error("No frame from shard for {0}ms")]
    Silent(u64),

    #[error("Shard closed the connection")]
    Closed,

    #[error("Shard is shutting down: {0}")]
    ShuttingDown(String),
}
