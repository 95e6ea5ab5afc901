//! In-process counter store.
//!
//! Default backend for single-shard deployments and tests. State is lost on
//! restart.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{rank_keywords, CounterStore, KeywordCount, StoreError};

pub struct MemoryCounterStore {
    message_count: AtomicU64,
    keywords: DashMap<String, u64>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            message_count: AtomicU64::new(0),
            keywords: DashMap::new(),
        }
    }

    /// Current counter value without resetting it
    pub fn peek_message_count(&self) -> u64 {
        self.message_count.load(Ordering::Acquire)
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }

    fn snapshot(&self) -> Vec<KeywordCount> {
        self.keywords
            .iter()
            .map(|entry| KeywordCount::new(entry.key().clone(), *entry.value()))
            .collect()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn record_message(&self, keywords: &[String]) -> Result<(), StoreError> {
        self.message_count.fetch_add(1, Ordering::AcqRel);
        for keyword in keywords {
            *self.keywords.entry(keyword.clone()).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn take_message_count(&self) -> Result<u64, StoreError> {
        Ok(self.message_count.swap(0, Ordering::AcqRel))
    }

    async fn top_keywords(&self, k: usize) -> Result<Vec<KeywordCount>, StoreError> {
        let mut entries = self.snapshot();
        rank_keywords(&mut entries, k);
        Ok(entries)
    }

    async fn all_keywords(&self) -> Result<Vec<KeywordCount>, StoreError> {
        let mut entries = self.snapshot();
        rank_keywords(&mut entries, usize::MAX);
        Ok(entries)
    }

    async fn trim_keywords(&self, max: usize) -> Result<usize, StoreError> {
        if self.keywords.len() <= max {
            return Ok(0);
        }

        let mut entries = self.snapshot();
        rank_keywords(&mut entries, usize::MAX);

        let mut removed = 0;
        for entry in entries.iter().skip(max) {
            if self.keywords.remove(&entry.keyword).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.message_count.store(0, Ordering::Release);
        self.keywords.clear();
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_take_resets_counter() {
        let store = MemoryCounterStore::new();
        store.record_message(&[]).await.unwrap();
        store.record_message(&[]).await.unwrap();

        assert_eq!(store.take_message_count().await.unwrap(), 2);
        assert_eq!(store.take_message_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keyword_counting_is_order_independent() {
        let forward = MemoryCounterStore::new();
        forward.record_message(&words(&["aaa", "bbb"])).await.unwrap();
        forward.record_message(&words(&["bbb", "ccc"])).await.unwrap();
        forward.record_message(&words(&["ccc"])).await.unwrap();

        let reverse = MemoryCounterStore::new();
        reverse.record_message(&words(&["ccc"])).await.unwrap();
        reverse.record_message(&words(&["bbb", "ccc"])).await.unwrap();
        reverse.record_message(&words(&["aaa", "bbb"])).await.unwrap();

        assert_eq!(
            forward.all_keywords().await.unwrap(),
            reverse.all_keywords().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_top_keywords_ordering() {
        let store = MemoryCounterStore::new();
        store.record_message(&words(&["tokio", "rust", "axum"])).await.unwrap();
        store.record_message(&words(&["rust"])).await.unwrap();

        let top = store.top_keywords(2).await.unwrap();
        assert_eq!(top[0], KeywordCount::new("rust", 2));
        assert_eq!(top[1], KeywordCount::new("axum", 1));
    }

    #[tokio::test]
    async fn test_trim_keeps_highest_ranked() {
        let store = MemoryCounterStore::new();
        store.record_message(&words(&["keep", "keep2", "drop"])).await.unwrap();
        store.record_message(&words(&["keep", "keep2"])).await.unwrap();

        let removed = store.trim_keywords(2).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.keyword_count(), 2);
        assert_eq!(store.trim_keywords(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let store = MemoryCounterStore::new();
        store.record_message(&words(&["hello"])).await.unwrap();

        store.reset().await.unwrap();
        assert_eq!(store.peek_message_count(), 0);
        assert!(store.all_keywords().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.record_message(&["shared".to_string()]).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.take_message_count().await.unwrap(), 800);
        assert_eq!(
            store.top_keywords(1).await.unwrap(),
            vec![KeywordCount::new("shared", 800)]
        );
    }
}
