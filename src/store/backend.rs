//! Counter store abstraction.
//!
//! The store holds the per-window message counter and the cumulative keyword
//! frequency table. Both the in-process memory backend and the Redis backend
//! implement [`CounterStore`] so the ingestor and the aggregator never know
//! which one they are talking to.

use std::cmp::Ordering;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The call did not complete within the configured operation timeout (ms)
    #[error("Store operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backend is temporarily unavailable (e.g. circuit breaker open)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// One row of the keyword frequency table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordCount {
    pub keyword: String,
    pub count: u64,
}

impl KeywordCount {
    pub fn new(keyword: impl Into<String>, count: u64) -> Self {
        Self {
            keyword: keyword.into(),
            count,
        }
    }
}

/// Descending frequency, ties broken by ascending keyword
pub fn keyword_order(a: &KeywordCount, b: &KeywordCount) -> Ordering {
    b.count.cmp(&a.count).then_with(|| a.keyword.cmp(&b.keyword))
}

/// Sort in place and keep the first `k` rows
pub fn rank_keywords(entries: &mut Vec<KeywordCount>, k: usize) {
    entries.sort_by(keyword_order);
    entries.truncate(k);
}

/// Atomic counter plus score-ordered keyword table.
///
/// Implementations must be `Send + Sync`: one instance is shared by every
/// connection worker and the periodic tasks.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Backend identifier reported by `/health` and `/stats`
    fn backend_type(&self) -> &'static str;

    /// Count one message and increment each keyword, as a single unit.
    async fn record_message(&self, keywords: &[String]) -> Result<(), StoreError>;

    /// Read the message counter and reset it to zero in one atomic step.
    async fn take_message_count(&self) -> Result<u64, StoreError>;

    /// Top `k` keywords ordered by [`keyword_order`].
    async fn top_keywords(&self, k: usize) -> Result<Vec<KeywordCount>, StoreError>;

    /// Whole keyword table ordered by [`keyword_order`].
    async fn all_keywords(&self) -> Result<Vec<KeywordCount>, StoreError>;

    /// Drop the lowest ranked keywords so at most `max` remain.
    ///
    /// Returns the number of removed keywords.
    async fn trim_keywords(&self, max: usize) -> Result<usize, StoreError>;

    /// Zero the counter and clear the keyword table.
    async fn reset(&self) -> Result<(), StoreError>;

    fn is_healthy(&self) -> bool;

    /// Called when a call into this store was abandoned at its deadline.
    ///
    /// The abandoned future never reports its own outcome, so backends that
    /// track failures count it here.
    fn record_timeout(&self, _timeout: Duration) {}
}

/// Bound a call on `store` by `timeout`, mapping expiry to
/// [`StoreError::Timeout`] and reporting it to the store.
pub async fn with_timeout<T, F>(
    store: &dyn CounterStore,
    timeout: Duration,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            store.record_timeout(timeout);
            Err(StoreError::Timeout(timeout.as_millis() as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_keywords_breaks_ties_lexically() {
        let mut entries = vec![
            KeywordCount::new("zeta", 3),
            KeywordCount::new("alpha", 3),
            KeywordCount::new("beta", 5),
            KeywordCount::new("gamma", 1),
        ];

        rank_keywords(&mut entries, 3);

        let keywords: Vec<_> = entries.iter().map(|e| e.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["beta", "alpha", "zeta"]);
    }

    #[test]
    fn test_keyword_count_serializes_camel_case() {
        let json = serde_json::to_string(&KeywordCount::new("rust", 4)).unwrap();
        assert_eq!(json, r#"{"keyword":"rust","count":4}"#);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let store = crate::store::MemoryCounterStore::new();
        let result: Result<(), StoreError> =
            with_timeout(&store, Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StoreError::Timeout(10))));
    }
}
