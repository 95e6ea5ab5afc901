//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::ConnectionStats;
use crate::metrics::MemoryMetrics;
use crate::server::AppState;
use crate::websocket::MetricsUpdate;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `degraded` while the counter store is unhealthy
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub accepting: bool,
    pub connections: ConnectionHealthResponse,
    pub memory: MemoryHealthResponse,
    pub store: StoreHealthResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealthResponse {
    pub active_users: usize,
    pub total_connections: usize,
    pub max_connections: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHealthResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_bytes: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealthResponse {
    pub backend: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisHealthResponse {
    pub link: &'static str,
    pub circuit_breaker: &'static str,
    pub failure_count: u32,
    pub connects: u64,
    pub timeouts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub aggregator: AggregatorStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<MetricsUpdate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStats {
    pub phase: &'static str,
    pub messages_per_sec: f64,
    pub window_age_ms: u64,
}

fn store_health(state: &AppState) -> StoreHealthResponse {
    let redis = state.redis_pool.as_ref().map(|pool| {
        let link = pool.link().stats();
        let breaker = pool.circuit_breaker().stats();
        RedisHealthResponse {
            link: link.state.as_str(),
            circuit_breaker: breaker.state.as_str(),
            failure_count: breaker.failure_count,
            connects: link.connects,
            timeouts: link.timeouts,
            last_error: link.last_error,
        }
    });

    StoreHealthResponse {
        backend: state.store.backend_type(),
        healthy: state.store.is_healthy(),
        redis,
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = store_health(&state);
    let stats = state.registry.stats();

    Json(HealthResponse {
        status: if store.healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        accepting: state.registry.admission().is_accepting(),
        connections: ConnectionHealthResponse {
            active_users: stats.active_users,
            total_connections: stats.total_connections,
            max_connections: stats.max_connections,
        },
        memory: MemoryHealthResponse {
            rss_bytes: MemoryMetrics::update_process_memory(),
        },
        store,
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let aggregator = &state.aggregator;

    Json(StatsResponse {
        connections: state.registry.stats(),
        aggregator: AggregatorStats {
            phase: aggregator.phase().as_str(),
            messages_per_sec: aggregator.last_rate(),
            window_age_ms: aggregator.window_started().elapsed().as_millis() as u64,
        },
        last_snapshot: aggregator.last_snapshot(),
    })
}
