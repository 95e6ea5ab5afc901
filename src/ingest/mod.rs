//! Chat message ingestion into the counter store

mod tokenizer;

pub use tokenizer::{extract_keywords, KeywordBand, Keywords};

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::metrics::{IngestMetrics, StoreMetrics};
use crate::store::{with_timeout, CounterStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Counter incremented and `keywords` tokens recorded
    Recorded { keywords: usize },
    /// Store call failed or timed out; nothing was applied
    Dropped { reason: &'static str },
}

fn drop_reason(err: &StoreError) -> &'static str {
    match err {
        StoreError::Timeout(_) => "timeout",
        StoreError::Unavailable(_) => "unavailable",
        StoreError::Redis(_) => "error",
    }
}

/// Applies `message` events to the counter store.
///
/// Shared by every connection task. A failing store never propagates to the
/// caller: the event is logged and dropped.
pub struct EventIngestor {
    store: Arc<dyn CounterStore>,
    band: KeywordBand,
    timeout: Duration,
}

impl EventIngestor {
    pub fn new(store: Arc<dyn CounterStore>, band: KeywordBand, timeout: Duration) -> Self {
        Self {
            store,
            band,
            timeout,
        }
    }

    pub fn from_settings(store: Arc<dyn CounterStore>, settings: &Settings) -> Self {
        Self::new(
            store,
            KeywordBand::from(&settings.metrics),
            settings.store.operation_timeout(),
        )
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Count one message and its keywords as a single store operation.
    #[tracing::instrument(
        name = "ingest.message",
        skip(self, user_id, text),
        fields(user_id = user_id.unwrap_or("-"), text_len = text.len())
    )]
    pub async fn on_message(&self, user_id: Option<&str>, text: &str) -> IngestOutcome {
        let keywords = extract_keywords(text, self.band);

        match with_timeout(&*self.store, self.timeout, self.store.record_message(&keywords)).await {
            Ok(()) => {
                IngestMetrics::record_message(keywords.len());
                IngestOutcome::Recorded {
                    keywords: keywords.len(),
                }
            }
            Err(e) => {
                let reason = drop_reason(&e);
                IngestMetrics::record_dropped(reason);
                StoreMetrics::record_error("record_message");
                tracing::warn!(error = %e, reason, "Dropping chat message");
                IngestOutcome::Dropped { reason }
            }
        }
    }
}
