//! Client-side fan-in over several ChatPulse shards.
//!
//! One [`ShardClient`] per configured shard feeds a shared [`ShardTable`];
//! the merged view is served over HTTP by the `chatpulse-merger` binary.

mod client;
mod table;
mod types;

pub use client::{ClientConfig, ShardClient};
pub use table::ShardTable;
pub use types::{MergedView, ShardError, ShardSnapshot, ShardState, ShardStatus};

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::MergerConfig;

/// Spawn one client task per shard in `table`
pub fn spawn_clients(
    table: &Arc<ShardTable>,
    config: &MergerConfig,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let client_config = ClientConfig::from(config);

    table
        .urls()
        .into_iter()
        .map(|url| {
            let client =
                ShardClient::new(url, table.clone(), client_config.clone(), shutdown.subscribe());
            tokio::spawn(client.run())
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergerHealthResponse {
    /// `ok` when at least one shard contributes to the merge
    pub status: &'static str,
    pub version: &'static str,
    pub live_shards: usize,
    pub shards: Vec<ShardStatus>,
}

/// GET /merged
pub async fn merged(State(table): State<Arc<ShardTable>>) -> Json<MergedView> {
    Json(table.merged())
}

/// GET /health
pub async fn health(State(table): State<Arc<ShardTable>>) -> Json<MergerHealthResponse> {
    let shards = table.statuses();
    let live_shards = shards.iter().filter(|s| s.live).count();

    Json(MergerHealthResponse {
        status: if live_shards > 0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        live_shards,
        shards,
    })
}

pub fn merger_routes(table: Arc<ShardTable>) -> Router {
    Router::new()
        .route("/merged", get(merged))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(table)
}

async fn metrics() -> Result<String, (axum::http::StatusCode, String)> {
    crate::metrics::encode_metrics()
        .map_err(|e| (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
