//! Debug and administration endpoints.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::connection_manager::{EvictionReport, SweepReport};
use crate::error::Result;
use crate::metrics::StoreMetrics;
use crate::server::AppState;
use crate::store::{rank_keywords, with_timeout, KeywordCount};
use crate::websocket::ServerMessage;

/// Suggested client back-off after an operator disconnect
const RECONNECT_AFTER_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
pub struct KeywordQuery {
    /// Return only the first `limit` rows
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordTableResponse {
    pub backend: &'static str,
    /// Distinct keywords in the table, before `limit` is applied
    pub total: usize,
    pub keywords: Vec<KeywordCount>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimResponse {
    #[serde(flatten)]
    pub report: SweepReport,
    pub removed_connections: usize,
    pub active_users: usize,
    pub total_connections: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectAllResponse {
    #[serde(flatten)]
    pub report: EvictionReport,
    pub active_users: usize,
    pub total_connections: usize,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: &'static str,
}

/// GET /debug/keywords - full keyword table, most frequent first
pub async fn debug_keywords(
    State(state): State<AppState>,
    Query(query): Query<KeywordQuery>,
) -> Result<Json<KeywordTableResponse>> {
    let timeout = state.settings.store.operation_timeout();
    let mut keywords = with_timeout(&*state.store, timeout, state.store.all_keywords())
        .await
        .inspect_err(|_| StoreMetrics::record_error("all_keywords"))?;

    let total = keywords.len();
    rank_keywords(&mut keywords, query.limit.unwrap_or(total));

    Ok(Json(KeywordTableResponse {
        backend: state.store.backend_type(),
        total,
        keywords,
    }))
}

/// POST /admin/reclaim - run a sweep now
#[tracing::instrument(name = "admin.reclaim", skip(state))]
pub async fn reclaim(State(state): State<AppState>) -> Json<ReclaimResponse> {
    let report = state.registry.sweep();

    tracing::info!(
        removed_connections = report.removed_connections(),
        removed_users = report.removed_users,
        "Manual reclaim completed"
    );

    Json(ReclaimResponse {
        report,
        removed_connections: report.removed_connections(),
        active_users: state.registry.active_users(),
        total_connections: state.registry.connection_count(),
    })
}

/// POST /admin/disconnect-all - drop every client and presence entry
#[tracing::instrument(name = "admin.disconnect_all", skip(state))]
pub async fn disconnect_all(State(state): State<AppState>) -> Json<DisconnectAllResponse> {
    let notice = ServerMessage::shutdown("disconnected by operator", RECONNECT_AFTER_SECS);
    let report = state.registry.disconnect_all(&notice);

    Json(DisconnectAllResponse {
        report,
        active_users: state.registry.active_users(),
        total_connections: state.registry.connection_count(),
    })
}

/// POST /admin/reset - zero the counter, clear keywords, restart the window
#[tracing::instrument(name = "admin.reset", skip(state))]
pub async fn reset(State(state): State<AppState>) -> Result<Json<ResetResponse>> {
    state
        .aggregator
        .reset()
        .await
        .inspect_err(|_| StoreMetrics::record_error("reset"))?;

    Ok(Json(ResetResponse { status: "reset" }))
}
