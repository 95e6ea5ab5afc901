//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    ACTIVE_USERS, BROADCAST_FRAMES, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED, CONNECTIONS_OPENED,
    CONNECTIONS_RECLAIMED, CONNECTIONS_REJECTED, CONNECTION_DURATION, EVENTS_INVALID,
    EVENTS_RECEIVED, KEYWORDS_EXTRACTED, KEYWORDS_TRIMMED, MESSAGES_DROPPED, MESSAGES_PER_SECOND,
    MESSAGES_RECORDED, PROCESS_MEMORY_BYTES, SHARD_RECONNECTS, SHARD_SNAPSHOTS, SHARD_STATE,
    STORE_ERRORS, STORE_HEALTHY, TICKS_TOTAL, TICK_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed() {
        CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.dec();
    }

    pub fn record_rejected(reason: &str) {
        CONNECTIONS_REJECTED.with_label_values(&[reason]).inc();
    }

    /// `reason` is one of `grace`, `closed`, `stale`
    pub fn record_reclaimed(reason: &str) {
        CONNECTIONS_RECLAIMED.with_label_values(&[reason]).inc();
    }

    pub fn record_duration(seconds: f64) {
        CONNECTION_DURATION.observe(seconds);
    }

    pub fn set_active_users(count: usize) {
        ACTIVE_USERS.set(count as i64);
    }
}

pub struct IngestMetrics;

impl IngestMetrics {
    pub fn record_event(event: &str) {
        EVENTS_RECEIVED.with_label_values(&[event]).inc();
    }

    pub fn record_invalid() {
        EVENTS_INVALID.inc();
    }

    pub fn record_message(keywords: usize) {
        MESSAGES_RECORDED.inc();
        KEYWORDS_EXTRACTED.inc_by(keywords as u64);
    }

    pub fn record_dropped(reason: &str) {
        MESSAGES_DROPPED.with_label_values(&[reason]).inc();
    }
}

pub struct TickMetrics;

impl TickMetrics {
    /// `outcome` is one of `published`, `reused`, `failed`
    pub fn record(outcome: &str, duration_secs: f64) {
        TICKS_TOTAL.with_label_values(&[outcome]).inc();
        TICK_DURATION.observe(duration_secs);
    }

    pub fn set_rate(rate: f64) {
        MESSAGES_PER_SECOND.set(rate);
    }

    pub fn record_trimmed(count: usize) {
        KEYWORDS_TRIMMED.inc_by(count as u64);
    }
}

pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record(delivered: usize, dropped: usize, closed: usize) {
        BROADCAST_FRAMES
            .with_label_values(&["delivered"])
            .inc_by(delivered as u64);
        BROADCAST_FRAMES
            .with_label_values(&["dropped"])
            .inc_by(dropped as u64);
        BROADCAST_FRAMES
            .with_label_values(&["closed"])
            .inc_by(closed as u64);
    }
}

pub struct StoreMetrics;

impl StoreMetrics {
    pub fn set_healthy(healthy: bool) {
        STORE_HEALTHY.set(if healthy { 1 } else { 0 });
    }

    pub fn record_error(operation: &str) {
        STORE_ERRORS.with_label_values(&[operation]).inc();
    }
}

pub struct ShardMetrics;

impl ShardMetrics {
    pub fn set_state(shard: &str, state: i64) {
        SHARD_STATE.with_label_values(&[shard]).set(state);
    }

    pub fn record_reconnect(shard: &str) {
        SHARD_RECONNECTS.with_label_values(&[shard]).inc();
    }

    pub fn record_snapshot(shard: &str) {
        SHARD_SNAPSHOTS.with_label_values(&[shard]).inc();
    }
}

pub struct MemoryMetrics;

impl MemoryMetrics {
    /// Refresh the process memory gauge, returning the sampled value
    pub fn update_process_memory() -> Option<u64> {
        let rss = process_rss_bytes();
        if let Some(bytes) = rss {
            PROCESS_MEMORY_BYTES.set(bytes as i64);
        }
        rss
    }
}

/// Resident set size from `/proc/self/status`, `None` where unavailable
pub fn process_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        status
            .lines()
            .find(|line| line.starts_with("VmRSS:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_process_rss_is_reported_on_linux() {
        let rss = process_rss_bytes().unwrap();
        assert!(rss > 0);
        assert_eq!(MemoryMetrics::update_process_memory().map(|b| b > 0), Some(true));
    }

    #[test]
    fn test_helpers_do_not_panic() {
        ConnectionMetrics::record_rejected("capacity");
        IngestMetrics::record_message(3);
        TickMetrics::record("published", 0.001);
        BroadcastMetrics::record(2, 1, 0);
        StoreMetrics::set_healthy(true);
        ShardMetrics::set_state("ws://localhost:3001/ws", 1);
    }
}
