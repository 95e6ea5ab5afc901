//! API layer - HTTP endpoint handlers organized by concern.

mod admin;
mod health;
mod metrics;
mod routes;

pub use admin::{
    debug_keywords, disconnect_all, reclaim, reset, DisconnectAllResponse, KeywordTableResponse,
    ReclaimResponse,
};
pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
