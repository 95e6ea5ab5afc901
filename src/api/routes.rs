use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::admin::{debug_keywords, disconnect_all, reclaim, reset};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Debug & administration
        .route("/debug/keywords", get(debug_keywords))
        .route("/admin/reclaim", post(reclaim))
        .route("/admin/reset", post(reset))
        .route("/admin/disconnect-all", post(disconnect_all))
}
