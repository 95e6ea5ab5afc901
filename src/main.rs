use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use chatpulse::config::Settings;
use chatpulse::server::{create_app, AppState};
use chatpulse::shutdown::GracefulShutdown;
use chatpulse::tasks::{MetricsTickTask, SweepTask};
use chatpulse::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("Failed to load configuration")?;
    init_tracing(&settings.log)?;
    tracing::info!(
        store = %settings.store.backend,
        max_connections = settings.websocket.max_connections,
        "Configuration loaded"
    );

    let state = AppState::new(settings.clone()).context("Failed to initialize application state")?;
    tracing::info!(backend = state.store.backend_type(), "Application state initialized");

    // A shared Redis may be down at boot; the breaker handles it from here
    if let Err(e) = state.discard_previous_run().await {
        tracing::warn!(error = %e, "Could not clear counters from a previous run");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let sweep_task = SweepTask::new(
        state.registry.clone(),
        settings.websocket.sweep_interval(),
        shutdown_tx.subscribe(),
    );
    let sweep_handle = tokio::spawn(sweep_task.run());

    let tick_task = MetricsTickTask::new(
        state.aggregator.clone(),
        settings.metrics.tick_interval(),
        shutdown_tx.subscribe(),
    );
    let tick_handle = tokio::spawn(tick_task.run());

    let graceful = GracefulShutdown::new(state.registry.clone(), shutdown_tx.clone());
    let app = create_app(state);

    // Failing to bind is the only fatal runtime condition
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind listener on {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(graceful))
        .await
        .context("Server error")?;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(sweep_handle, tick_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

async fn shutdown_signal_handler(graceful: GracefulShutdown) {
    wait_for_signal().await;
    graceful.execute("server shutting down").await;
}
