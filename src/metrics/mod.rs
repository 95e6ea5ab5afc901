//! Prometheus metrics for the ChatPulse service.
//!
//! - Connection metrics (admitted, rejected, swept)
//! - Ingest metrics (events, messages, dropped events)
//! - Aggregator tick metrics
//! - Broadcast fan-out metrics
//! - Shard merger metrics

mod helpers;

pub use helpers::{
    encode_metrics, process_rss_bytes, BroadcastMetrics, ConnectionMetrics, IngestMetrics,
    MemoryMetrics, ShardMetrics, StoreMetrics, TickMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Gauge, Histogram, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "chatpulse";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Registered WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of registered WebSocket connections"
    ).unwrap();

    /// Live user presence entries
    pub static ref ACTIVE_USERS: IntGauge = register_int_gauge!(
        format!("{}_active_users", METRIC_PREFIX),
        "Number of users with a live presence entry"
    ).unwrap();

    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections admitted"
    ).unwrap();

    pub static ref CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections removed from the registry"
    ).unwrap();

    /// Rejected upgrade attempts by reason (capacity, shutdown)
    pub static ref CONNECTIONS_REJECTED: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_rejected_total", METRIC_PREFIX),
        "Total WebSocket connections rejected at admission",
        &["reason"]
    ).unwrap();

    /// Connections reclaimed by the registry (grace, closed, stale)
    pub static ref CONNECTIONS_RECLAIMED: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_reclaimed_total", METRIC_PREFIX),
        "Total connections removed by the grace timer or sweep",
        &["reason"]
    ).unwrap();

    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Ingest Metrics
    // ============================================================================

    /// Inbound events by type
    pub static ref EVENTS_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_received_total", METRIC_PREFIX),
        "Total inbound WebSocket events",
        &["type"]
    ).unwrap();

    pub static ref EVENTS_INVALID: IntCounter = register_int_counter!(
        format!("{}_events_invalid_total", METRIC_PREFIX),
        "Total malformed or unknown inbound frames"
    ).unwrap();

    pub static ref MESSAGES_RECORDED: IntCounter = register_int_counter!(
        format!("{}_messages_recorded_total", METRIC_PREFIX),
        "Total chat messages recorded in the counter store"
    ).unwrap();

    /// Dropped chat messages by reason (timeout, unavailable, error)
    pub static ref MESSAGES_DROPPED: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_dropped_total", METRIC_PREFIX),
        "Total chat messages dropped because the store call failed",
        &["reason"]
    ).unwrap();

    pub static ref KEYWORDS_EXTRACTED: IntCounter = register_int_counter!(
        format!("{}_keywords_extracted_total", METRIC_PREFIX),
        "Total keyword tokens extracted from messages"
    ).unwrap();

    // ============================================================================
    // Aggregator Metrics
    // ============================================================================

    /// Tick outcomes (published, reused, failed)
    pub static ref TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ticks_total", METRIC_PREFIX),
        "Total aggregator ticks by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref TICK_DURATION: Histogram = register_histogram!(
        format!("{}_tick_duration_seconds", METRIC_PREFIX),
        "Aggregator tick duration in seconds",
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    pub static ref MESSAGES_PER_SECOND: Gauge = register_gauge!(
        format!("{}_messages_per_second", METRIC_PREFIX),
        "Message rate published by the last tick"
    ).unwrap();

    pub static ref KEYWORDS_TRIMMED: IntCounter = register_int_counter!(
        format!("{}_keywords_trimmed_total", METRIC_PREFIX),
        "Total keywords dropped by the keyword table cap"
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Frames handed to connection queues by outcome (delivered, dropped, closed)
    pub static ref BROADCAST_FRAMES: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcast_frames_total", METRIC_PREFIX),
        "Total broadcast frames by per-connection outcome",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Store Metrics
    // ============================================================================

    pub static ref STORE_HEALTHY: IntGauge = register_int_gauge!(
        format!("{}_store_healthy", METRIC_PREFIX),
        "Counter store health (1=healthy, 0=degraded)"
    ).unwrap();

    pub static ref STORE_ERRORS: IntCounterVec = register_int_counter_vec!(
        format!("{}_store_errors_total", METRIC_PREFIX),
        "Total counter store errors by operation",
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Shard Merger Metrics
    // ============================================================================

    /// Shard state (0=connecting, 1=up, 2=reconnecting, 3=down)
    pub static ref SHARD_STATE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_shard_state", METRIC_PREFIX),
        "Connection state per shard",
        &["shard"]
    ).unwrap();

    pub static ref SHARD_RECONNECTS: IntCounterVec = register_int_counter_vec!(
        format!("{}_shard_reconnects_total", METRIC_PREFIX),
        "Total reconnect attempts per shard",
        &["shard"]
    ).unwrap();

    pub static ref SHARD_SNAPSHOTS: IntCounterVec = register_int_counter_vec!(
        format!("{}_shard_snapshots_total", METRIC_PREFIX),
        "Total snapshots received per shard",
        &["shard"]
    ).unwrap();

    // ============================================================================
    // Memory Metrics
    // ============================================================================

    pub static ref PROCESS_MEMORY_BYTES: IntGauge = register_int_gauge!(
        format!("{}_process_memory_bytes", METRIC_PREFIX),
        "Resident memory of the process in bytes"
    ).unwrap();
}
