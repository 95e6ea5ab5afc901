//! Periodic metrics aggregation.
//!
//! Each tick closes the current measurement window: it takes the message
//! counter, turns it into a per-second rate over the measured elapsed time,
//! reads the top keywords and broadcasts one pre-serialized snapshot to every
//! registered connection.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::Settings;
use crate::connection_manager::{BroadcastReport, ConnectionRegistry};
use crate::metrics::{MemoryMetrics, StoreMetrics, TickMetrics};
use crate::store::{with_timeout, CounterStore, KeywordCount, StoreError};
use crate::websocket::{MetricsUpdate, OutboundMessage, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AggregatorPhase {
    Idle = 0,
    Collecting = 1,
    Publishing = 2,
}

impl AggregatorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregatorPhase::Idle => "idle",
            AggregatorPhase::Collecting => "collecting",
            AggregatorPhase::Publishing => "publishing",
        }
    }
}

impl From<u8> for AggregatorPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => AggregatorPhase::Collecting,
            2 => AggregatorPhase::Publishing,
            _ => AggregatorPhase::Idle,
        }
    }
}

/// Messages per second for a window; `previous` is reused when the
/// window has no measurable length.
pub fn compute_rate(count: u64, elapsed_secs: f64, previous: f64) -> f64 {
    if elapsed_secs > 0.0 {
        count as f64 / elapsed_secs
    } else {
        previous
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    pub top_k: usize,
    /// Keyword table cap, 0 disables trimming
    pub max_keywords: usize,
    pub operation_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for AggregatorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            top_k: settings.metrics.top_k,
            max_keywords: settings.metrics.max_keywords,
            operation_timeout: settings.store.operation_timeout(),
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Window closed and snapshot broadcast
    Published {
        snapshot: MetricsUpdate,
        report: BroadcastReport,
    },
    /// Zero-length window: counter left alone, previous rate republished
    Reused {
        snapshot: MetricsUpdate,
        report: BroadcastReport,
    },
    /// Store failed; nothing published and the window stays open
    Failed(StoreError),
}

impl TickOutcome {
    pub fn snapshot(&self) -> Option<&MetricsUpdate> {
        match self {
            Self::Published { snapshot, .. } | Self::Reused { snapshot, .. } => Some(snapshot),
            Self::Failed(_) => None,
        }
    }
}

struct Window {
    started: Instant,
    last_rate: f64,
}

pub struct MetricsAggregator {
    store: Arc<dyn CounterStore>,
    registry: Arc<ConnectionRegistry>,
    config: AggregatorConfig,
    phase: AtomicU8,
    window: Mutex<Window>,
    started_at: Instant,
    last_snapshot: Mutex<Option<MetricsUpdate>>,
}

impl MetricsAggregator {
    pub fn new(
        store: Arc<dyn CounterStore>,
        registry: Arc<ConnectionRegistry>,
        config: AggregatorConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            store,
            registry,
            config,
            phase: AtomicU8::new(AggregatorPhase::Idle as u8),
            window: Mutex::new(Window {
                started: now,
                last_rate: 0.0,
            }),
            started_at: now,
            last_snapshot: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> AggregatorPhase {
        AggregatorPhase::from(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: AggregatorPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn window_started(&self) -> Instant {
        self.window.lock().started
    }

    pub fn last_rate(&self) -> f64 {
        self.window.lock().last_rate
    }

    /// Most recent full snapshot, if any tick has published yet
    pub fn last_snapshot(&self) -> Option<MetricsUpdate> {
        self.last_snapshot.lock().clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Instant::now()).await
    }

    /// Run one tick as if the clock read `now`
    pub async fn tick_at(&self, now: Instant) -> TickOutcome {
        let tick_start = Instant::now();
        self.set_phase(AggregatorPhase::Collecting);

        let outcome = match self.collect(now).await {
            Ok((rate, reused, top_keywords)) => {
                self.set_phase(AggregatorPhase::Publishing);
                let snapshot = self.build_snapshot(rate, top_keywords);
                let report = self.publish(&snapshot);
                TickMetrics::set_rate(rate);
                *self.last_snapshot.lock() = Some(snapshot.clone());

                if reused {
                    TickOutcome::Reused { snapshot, report }
                } else {
                    TickOutcome::Published { snapshot, report }
                }
            }
            Err(e) => {
                StoreMetrics::record_error("tick");
                tracing::warn!(error = %e, "Metrics tick failed, window left open");
                TickOutcome::Failed(e)
            }
        };

        self.set_phase(AggregatorPhase::Idle);
        StoreMetrics::set_healthy(self.store.is_healthy());

        let label = match &outcome {
            TickOutcome::Published { .. } => "published",
            TickOutcome::Reused { .. } => "reused",
            TickOutcome::Failed(_) => "failed",
        };
        TickMetrics::record(label, tick_start.elapsed().as_secs_f64());

        outcome
    }

    /// Read everything the snapshot needs. The counter is taken last so a
    /// failure anywhere leaves the window untouched.
    async fn collect(
        &self,
        now: Instant,
    ) -> Result<(f64, bool, Vec<KeywordCount>), StoreError> {
        let timeout = self.config.operation_timeout;

        if self.config.max_keywords > 0 {
            let trimmed = with_timeout(
                &*self.store,
                timeout,
                self.store.trim_keywords(self.config.max_keywords),
            )
            .await?;
            if trimmed > 0 {
                TickMetrics::record_trimmed(trimmed);
                tracing::debug!(trimmed, cap = self.config.max_keywords, "Keyword table trimmed");
            }
        }

        let top_keywords = with_timeout(&*self.store, timeout, self.store.top_keywords(self.config.top_k))
                .await?;

        let (window_start, previous) = {
            let window = self.window.lock();
            (window.started, window.last_rate)
        };
        let elapsed = now
            .checked_duration_since(window_start)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        if elapsed <= 0.0 {
            return Ok((previous, true, top_keywords));
        }

        let count = with_timeout(&*self.store, timeout, self.store.take_message_count()).await?;
        let rate = compute_rate(count, elapsed, previous);

        {
            let mut window = self.window.lock();
            window.started = now;
            window.last_rate = rate;
        }

        tracing::trace!(count, elapsed_secs = elapsed, rate, "Window closed");
        Ok((rate, false, top_keywords))
    }

    fn build_snapshot(
        &self,
        rate: f64,
        top_keywords: Vec<KeywordCount>,
    ) -> MetricsUpdate {
        MetricsUpdate {
            messages_per_sec: Some(rate),
            active_users: self.registry.active_users(),
            top_keywords: Some(top_keywords),
            memory_bytes: MemoryMetrics::update_process_memory(),
            uptime_seconds: Some(self.uptime().as_secs()),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn publish(&self, snapshot: &MetricsUpdate) -> BroadcastReport {
        let message = ServerMessage::Metrics(snapshot.clone());
        match OutboundMessage::preserialize(&message) {
            Ok(frame) => self.registry.broadcast(frame),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize metrics snapshot");
                BroadcastReport::default()
            }
        }
    }

    /// Zero the counter, clear keywords and restart the rate window
    pub async fn reset(&self) -> Result<(), StoreError> {
        with_timeout(&*self.store, self.config.operation_timeout, self.store.reset()).await?;
        self.reset_window();
        *self.last_snapshot.lock() = None;
        tracing::info!("Metrics state reset");
        Ok(())
    }

    pub fn reset_window(&self) {
        let mut window = self.window.lock();
        window.started = Instant::now();
        window.last_rate = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionController;
    use crate::connection_manager::RegistryConfig;
    use crate::store::MemoryCounterStore;
    use tokio::sync::mpsc;

    fn setup(
        config: AggregatorConfig,
    ) -> (Arc<MemoryCounterStore>, Arc<ConnectionRegistry>, MetricsAggregator) {
        let store = Arc::new(MemoryCounterStore::new());
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(AdmissionController::new(100)),
            RegistryConfig {
                registration_grace: Duration::ZERO,
                stale_threshold: Duration::from_secs(60),
                keepalive_interval: Duration::from_secs(20),
            },
        ));
        let aggregator = MetricsAggregator::new(store.clone(), registry.clone(), config);
        (store, registry, aggregator)
    }

    #[test]
    fn test_compute_rate() {
        assert_eq!(compute_rate(10, 2.0, 0.0), 5.0);
        assert_eq!(compute_rate(0, 1.0, 7.0), 0.0);
        assert_eq!(compute_rate(10, 0.0, 3.5), 3.5);
        assert_eq!(compute_rate(10, -1.0, 3.5), 3.5);
    }

    #[tokio::test]
    async fn test_tick_measures_rate_and_resets_counter() {
        let (store, _registry, aggregator) = setup(AggregatorConfig::default());
        for _ in 0..10 {
            store.record_message(&["rust".to_string()]).await.unwrap();
        }

        let start = aggregator.window_started();
        let outcome = aggregator.tick_at(start + Duration::from_secs(2)).await;

        let snapshot = match outcome {
            TickOutcome::Published { snapshot, .. } => snapshot,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(snapshot.messages_per_sec, Some(5.0));
        assert_eq!(snapshot.top_keywords, Some(vec![KeywordCount::new("rust", 10)]));
        assert_eq!(store.peek_message_count(), 0);
        assert_eq!(aggregator.phase(), AggregatorPhase::Idle);
    }

    #[tokio::test]
    async fn test_zero_elapsed_reuses_previous_rate() {
        let (store, _registry, aggregator) = setup(AggregatorConfig::default());
        store.record_message(&[]).await.unwrap();
        store.record_message(&[]).await.unwrap();

        let start = aggregator.window_started();
        aggregator.tick_at(start + Duration::from_secs(1)).await;
        assert_eq!(aggregator.last_rate(), 2.0);

        store.record_message(&[]).await.unwrap();
        let again = aggregator.window_started();
        let outcome = aggregator.tick_at(again).await;

        assert!(matches!(outcome, TickOutcome::Reused { .. }));
        assert_eq!(outcome.snapshot().and_then(|s| s.messages_per_sec), Some(2.0));
        // The counter was not taken
        assert_eq!(store.peek_message_count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_reaches_connections() {
        let (_store, registry, aggregator) = setup(AggregatorConfig::default());
        let (tx, mut rx) = mpsc::channel(4);
        let handle = registry.register(tx).unwrap();
        registry.on_join(handle.id, "alice");
        let _presence = rx.try_recv().unwrap();

        let outcome = aggregator.tick().await;
        match outcome {
            TickOutcome::Published { report, snapshot } | TickOutcome::Reused { report, snapshot } => {
                assert_eq!(report.delivered, 1);
                assert_eq!(snapshot.active_users, 1);
            }
            TickOutcome::Failed(e) => panic!("tick failed: {}", e),
        }

        let frame = rx.try_recv().unwrap().to_json().unwrap();
        assert!(frame.contains(r#""type":"metrics-update""#));
        assert!(frame.contains(r#""messagesPerSec""#));
    }

    #[tokio::test]
    async fn test_keyword_cap_applied_on_tick() {
        let (store, _registry, aggregator) = setup(AggregatorConfig {
            top_k: 10,
            max_keywords: 2,
            operation_timeout: Duration::from_millis(500),
        });
        store
            .record_message(&["aaa".into(), "bbb".into(), "ccc".into()])
            .await
            .unwrap();
        store.record_message(&["ccc".into()]).await.unwrap();

        aggregator.tick().await;

        assert_eq!(store.keyword_count(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let (store, _registry, aggregator) = setup(AggregatorConfig::default());
        store.record_message(&["hello".into()]).await.unwrap();
        aggregator.tick().await;

        aggregator.reset().await.unwrap();

        assert_eq!(store.peek_message_count(), 0);
        assert!(store.all_keywords().await.unwrap().is_empty());
        assert_eq!(aggregator.last_rate(), 0.0);
        assert!(aggregator.last_snapshot().is_none());
    }
}
