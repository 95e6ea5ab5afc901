//! Redis counter store.
//!
//! Keys:
//! - `{prefix}:messages_count`: string counter, taken with `GETSET key 0`
//! - `{prefix}:keywords`: sorted set, keyword to cumulative frequency

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::redis::{PoolError, RedisPool};

use super::backend::{keyword_order, rank_keywords, CounterStore, KeywordCount, StoreError};

pub struct RedisCounterStore {
    pool: Arc<RedisPool>,
    count_key: String,
    keywords_key: String,
}

impl RedisCounterStore {
    pub fn new(pool: Arc<RedisPool>, prefix: &str) -> Self {
        Self {
            pool,
            count_key: format!("{}:messages_count", prefix),
            keywords_key: format!("{}:keywords", prefix),
        }
    }

    pub fn count_key(&self) -> &str {
        &self.count_key
    }

    pub fn keywords_key(&self) -> &str {
        &self.keywords_key
    }

    fn map_error(err: PoolError) -> StoreError {
        match err {
            PoolError::Redis(e) => StoreError::Redis(e),
            PoolError::CircuitOpen => {
                StoreError::Unavailable("Circuit breaker is open".to_string())
            }
        }
    }
}

/// The `excess` lowest ranked of `candidates` under [`keyword_order`]: lowest
/// count first, and among equal counts the lexically largest first.
fn eviction_victims(mut candidates: Vec<KeywordCount>, excess: usize) -> Vec<String> {
    candidates.sort_by(keyword_order);
    let keep = candidates.len().saturating_sub(excess);
    candidates.split_off(keep).into_iter().map(|e| e.keyword).collect()
}

fn to_keyword_counts(raw: Vec<(String, f64)>) -> Vec<KeywordCount> {
    raw.into_iter()
        .map(|(keyword, score)| KeywordCount::new(keyword, score.max(0.0) as u64))
        .collect()
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn record_message(&self, keywords: &[String]) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic().incr(&self.count_key, 1).ignore();
        for keyword in keywords {
            pipe.zincr(&self.keywords_key, keyword, 1).ignore();
        }

        self.pool
            .execute(|mut conn| async move {
                let _: () = pipe.query_async(&mut conn).await?;
                Ok(())
            })
            .await
            .map_err(Self::map_error)
    }

    async fn take_message_count(&self) -> Result<u64, StoreError> {
        let key = self.count_key.clone();
        let previous: Option<i64> = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("GETSET")
                    .arg(&key)
                    .arg(0)
                    .query_async(&mut conn)
                    .await
            })
            .await
            .map_err(Self::map_error)?;

        Ok(previous.unwrap_or(0).max(0) as u64)
    }

    async fn top_keywords(&self, k: usize) -> Result<Vec<KeywordCount>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let key = self.keywords_key.clone();
        let raw: Vec<(String, f64)> = self
            .pool
            .execute(|mut conn| async move {
                let head: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
                    .arg(&key)
                    .arg(0)
                    .arg(k as isize - 1)
                    .arg("WITHSCORES")
                    .query_async(&mut conn)
                    .await?;

                // Redis orders equal scores in reverse lexical order; fetch every
                // member tied with the last row so the lexical re-sort is exact.
                let floor = if head.len() == k {
                    head.last().map(|(_, score)| *score)
                } else {
                    None
                };

                match floor {
                    Some(floor) => {
                        redis::cmd("ZREVRANGEBYSCORE")
                            .arg(&key)
                            .arg("+inf")
                            .arg(floor)
                            .arg("WITHSCORES")
                            .query_async(&mut conn)
                            .await
                    }
                    None => Ok(head),
                }
            })
            .await
            .map_err(Self::map_error)?;

        let mut entries = to_keyword_counts(raw);
        rank_keywords(&mut entries, k);
        Ok(entries)
    }

    async fn all_keywords(&self) -> Result<Vec<KeywordCount>, StoreError> {
        let key = self.keywords_key.clone();
        let raw: Vec<(String, f64)> = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("ZREVRANGE")
                    .arg(&key)
                    .arg(0)
                    .arg(-1)
                    .arg("WITHSCORES")
                    .query_async(&mut conn)
                    .await
            })
            .await
            .map_err(Self::map_error)?;

        let mut entries = to_keyword_counts(raw);
        rank_keywords(&mut entries, usize::MAX);
        Ok(entries)
    }

    async fn trim_keywords(&self, max: usize) -> Result<usize, StoreError> {
        let key = self.keywords_key.clone();
        let removed: usize = self
            .pool
            .execute(|mut conn| async move {
                let card: usize = redis::cmd("ZCARD").arg(&key).query_async(&mut conn).await?;
                if card <= max {
                    return Ok(0);
                }
                let excess = card - max;

                // Lowest `excess` scores give the floor; every member at or
                // below it is a candidate, ranked the way top-K ranks them.
                let lowest: Vec<(String, f64)> = redis::cmd("ZRANGE")
                    .arg(&key)
                    .arg(0)
                    .arg(excess as isize - 1)
                    .arg("WITHSCORES")
                    .query_async(&mut conn)
                    .await?;
                let Some(floor) = lowest.last().map(|(_, score)| *score) else {
                    return Ok(0);
                };
                let candidates: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
                    .arg(&key)
                    .arg("-inf")
                    .arg(floor)
                    .arg("WITHSCORES")
                    .query_async(&mut conn)
                    .await?;

                let victims = eviction_victims(to_keyword_counts(candidates), excess);
                if victims.is_empty() {
                    return Ok(0);
                }
                redis::cmd("ZREM")
                    .arg(&key)
                    .arg(&victims)
                    .query_async(&mut conn)
                    .await
            })
            .await
            .map_err(Self::map_error)?;

        Ok(removed)
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let count_key = self.count_key.clone();
        let keywords_key = self.keywords_key.clone();
        self.pool
            .execute(|mut conn| async move {
                let _: () = redis::pipe()
                    .atomic()
                    .set(&count_key, 0)
                    .ignore()
                    .del(&keywords_key)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            })
            .await
            .map_err(Self::map_error)
    }

    fn is_healthy(&self) -> bool {
        self.pool.is_healthy()
    }

    fn record_timeout(&self, timeout: Duration) {
        self.pool.record_timeout(timeout);
    }
}
