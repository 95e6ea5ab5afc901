use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::MergerConfig;
use crate::metrics::ShardMetrics;
use crate::store::{rank_keywords, KeywordCount};
use crate::websocket::MetricsUpdate;

use super::types::{MergedView, ShardSnapshot, ShardState, ShardStatus};

#[derive(Debug)]
struct ShardEntry {
    state: ShardState,
    snapshot: Option<ShardSnapshot>,
    last_update_ms: Option<i64>,
    consecutive_failures: u32,
    reconnects: u64,
    ever_connected: bool,
    last_error: Option<String>,
}

impl ShardEntry {
    fn new() -> Self {
        Self {
            state: ShardState::Connecting,
            snapshot: None,
            last_update_ms: None,
            consecutive_failures: 0,
            reconnects: 0,
            ever_connected: false,
            last_error: None,
        }
    }

    fn is_live(&self, now_ms: i64, dead_after_ms: i64) -> bool {
        self.state == ShardState::Up
            && self.snapshot.is_some()
            && self
                .last_update_ms
                .is_some_and(|at| now_ms.saturating_sub(at) <= dead_after_ms)
    }
}

/// Latest values per shard plus their connection state.
///
/// The merged view is computed on read so a shard that goes quiet drops out
/// of it without needing another event.
pub struct ShardTable {
    shards: RwLock<BTreeMap<String, ShardEntry>>,
    dead_after_ms: i64,
    top_k: usize,
}

impl ShardTable {
    pub fn new<I, S>(urls: I, dead_after: Duration, top_k: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let shards = urls
            .into_iter()
            .map(|url| (url.into(), ShardEntry::new()))
            .collect::<BTreeMap<_, _>>();

        for url in shards.keys() {
            ShardMetrics::set_state(url, ShardState::Connecting.as_gauge());
        }

        Self {
            shards: RwLock::new(shards),
            dead_after_ms: dead_after.as_millis() as i64,
            top_k,
        }
    }

    pub fn from_config(config: &MergerConfig) -> Self {
        Self::new(
            config.shards.iter().cloned(),
            Duration::from_secs(config.dead_shard_seconds),
            config.top_k,
        )
    }

    pub fn urls(&self) -> Vec<String> {
        self.shards.read().keys().cloned().collect()
    }

    pub fn state(&self, url: &str) -> Option<ShardState> {
        self.shards.read().get(url).map(|entry| entry.state)
    }

    /// Apply a `metrics-update` from `url`: full snapshots replace every
    /// value, presence-only updates replace just the active-user count.
    pub fn apply_update(&self, url: &str, update: MetricsUpdate) -> bool {
        self.apply_update_at(url, update, chrono::Utc::now().timestamp_millis())
    }

    pub fn apply_update_at(&self, url: &str, update: MetricsUpdate, now_ms: i64) -> bool {
        if update.is_partial() {
            self.update_active_users(url, update.active_users as u64, now_ms)
        } else {
            self.upsert_snapshot(url, ShardSnapshot::from(update), now_ms)
        }
    }

    /// Returns false for an unknown shard
    pub fn upsert_snapshot(&self, url: &str, snapshot: ShardSnapshot, now_ms: i64) -> bool {
        let mut shards = self.shards.write();
        let Some(entry) = shards.get_mut(url) else {
            return false;
        };
        entry.snapshot = Some(snapshot);
        entry.last_update_ms = Some(now_ms);
        ShardMetrics::record_snapshot(url);
        true
    }

    pub fn update_active_users(&self, url: &str, active_users: u64, now_ms: i64) -> bool {
        let mut shards = self.shards.write();
        let Some(entry) = shards.get_mut(url) else {
            return false;
        };
        entry.snapshot.get_or_insert_with(ShardSnapshot::default).active_users = active_users;
        entry.last_update_ms = Some(now_ms);
        true
    }

    /// Connection established: the shard is Up and its failure streak ends.
    pub fn mark_up(&self, url: &str) {
        let mut shards = self.shards.write();
        let Some(entry) = shards.get_mut(url) else {
            return;
        };
        if entry.state == ShardState::Down {
            return;
        }
        if entry.ever_connected {
            entry.reconnects += 1;
            ShardMetrics::record_reconnect(url);
        }
        entry.ever_connected = true;
        entry.consecutive_failures = 0;
        entry.last_error = None;
        entry.state = ShardState::Up;
        ShardMetrics::set_state(url, ShardState::Up.as_gauge());
    }

    /// Connection lost or connect failed. Returns the failure streak length.
    ///
    /// The last snapshot is discarded: after a reconnect the shard only
    /// contributes again once it reports fresh values.
    pub fn mark_failed(&self, url: &str, error: impl Into<String>) -> u32 {
        let mut shards = self.shards.write();
        let Some(entry) = shards.get_mut(url) else {
            return 0;
        };
        entry.snapshot = None;
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_error = Some(error.into());
        if entry.state != ShardState::Down {
            entry.state = ShardState::Reconnecting;
            ShardMetrics::set_state(url, ShardState::Reconnecting.as_gauge());
        }
        entry.consecutive_failures
    }

    /// Terminal: a Down shard never comes back
    pub fn mark_down(&self, url: &str) {
        let mut shards = self.shards.write();
        if let Some(entry) = shards.get_mut(url) {
            entry.state = ShardState::Down;
            ShardMetrics::set_state(url, ShardState::Down.as_gauge());
        }
    }

    pub fn merged(&self) -> MergedView {
        self.merged_at(chrono::Utc::now().timestamp_millis())
    }

    /// Sum the live shards' rates and user counts and merge their keyword
    /// tables, evaluated at `now_ms`.
    pub fn merged_at(&self, now_ms: i64) -> MergedView {
        let shards = self.shards.read();

        let mut view = MergedView {
            total_shards: shards.len(),
            timestamp: now_ms,
            ..Default::default()
        };
        let mut keywords: HashMap<&str, u64> = HashMap::new();

        for entry in shards.values() {
            if !entry.is_live(now_ms, self.dead_after_ms) {
                continue;
            }
            let Some(snapshot) = entry.snapshot.as_ref() else {
                continue;
            };

            view.live_shards += 1;
            view.messages_per_sec += snapshot.messages_per_sec;
            view.active_users += snapshot.active_users;
            for row in &snapshot.top_keywords {
                *keywords.entry(row.keyword.as_str()).or_default() += row.count;
            }
        }

        let mut merged: Vec<KeywordCount> = keywords
            .into_iter()
            .map(|(keyword, count)| KeywordCount::new(keyword, count))
            .collect();
        rank_keywords(&mut merged, self.top_k);
        view.top_keywords = merged;

        view
    }

    pub fn statuses(&self) -> Vec<ShardStatus> {
        self.statuses_at(chrono::Utc::now().timestamp_millis())
    }

    pub fn statuses_at(&self, now_ms: i64) -> Vec<ShardStatus> {
        self.shards
            .read()
            .iter()
            .map(|(url, entry)| ShardStatus {
                url: url.clone(),
                state: entry.state,
                live: entry.is_live(now_ms, self.dead_after_ms),
                consecutive_failures: entry.consecutive_failures,
                reconnects: entry.reconnects,
                last_update_ms: entry.last_update_ms,
                last_error: entry.last_error.clone(),
            })
            .collect()
    }
}
