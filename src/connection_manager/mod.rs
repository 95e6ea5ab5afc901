//! Connection lifecycle for WebSocket clients
//!
//! This module provides:
//! - Connection handles with lock-free activity tracking
//! - The user presence table (one live connection per user)
//! - Grace timers, sweep, and broadcast fan-out

mod registry;
mod stats;
mod types;

pub use registry::{ConnectionRegistry, RegistryConfig};
pub use stats::{BroadcastReport, ConnectionStats, Disconnected, EvictionReport, SweepReport};
pub use types::{ConnectionError, ConnectionHandle};
