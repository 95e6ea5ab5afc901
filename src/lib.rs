// Shared components
pub mod backoff;
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
pub mod telemetry;

// Counting and aggregation
pub mod aggregator;
pub mod ingest;
pub mod store;

// Connections
pub mod admission;
pub mod connection_manager;
pub mod websocket;

// Application layer
pub mod api;
pub mod merger;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod tasks;
