//! Periodic background tasks
//!
//! - `SweepTask`: reaps closed and stale connections
//! - `MetricsTickTask`: drives the metrics aggregator

mod metrics_tick;
mod sweep;

pub use metrics_tick::MetricsTickTask;
pub use sweep::SweepTask;
