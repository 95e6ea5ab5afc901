//! Prometheus metrics endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::metrics::{self, ConnectionMetrics, MemoryMetrics, StoreMetrics};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    refresh_gauges(&state);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Gauges that are sampled at scrape time
fn refresh_gauges(state: &AppState) {
    let stats = state.registry.stats();
    metrics::CONNECTIONS_ACTIVE.set(stats.total_connections as i64);
    ConnectionMetrics::set_active_users(stats.active_users);
    StoreMetrics::set_healthy(state.store.is_healthy());
    MemoryMetrics::update_process_memory();
}
