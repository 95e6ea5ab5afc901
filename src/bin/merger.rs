use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use chatpulse::config::Settings;
use chatpulse::merger::{merger_routes, spawn_clients, ShardTable};
use chatpulse::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("Failed to load configuration")?;
    init_tracing(&settings.log)?;

    let config = &settings.merger;
    if config.shards.is_empty() {
        bail!("No shards configured (set CHATPULSE__MERGER__SHARDS)");
    }
    tracing::info!(shards = ?config.shards, top_k = config.top_k, "Starting shard merger");

    let table = Arc::new(ShardTable::from_config(config));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let clients = spawn_clients(&table, config, &shutdown_tx);

    let app = merger_routes(table).layer(TraceLayer::new_for_http());

    let addr = settings.merger_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind listener on {}", addr))?;
    tracing::info!("Merger listening on {}", addr);

    let signal_tx = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received Ctrl+C, stopping shard clients");
            let _ = signal_tx.send(());
        })
        .await
        .context("Merger server error")?;

    futures::future::join_all(clients).await;
    tracing::info!("Merger shutdown complete");
    Ok(())
}
