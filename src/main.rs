use anyhow::{Context, Result};
use flockwatch::api::{create_router, ApiState};
use flockwatch::config::{load_config, FlockwatchConfig};
use flockwatch::simulation::{SimulationOptions, SimulationRegistry};
use flockwatch::storage::SqliteStore;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flockwatch=info".into()),
        )
        .init();

    info!("Flockwatch starting...");

    let mut config = match std::env::var("FLOCKWATCH_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => FlockwatchConfig::default(),
    };
    config.apply_env();

    info!(
        database_path = %config.storage.database_path.display(),
        bind_address = %config.api.bind_address,
        interval_seconds = config.simulation.default_interval_seconds,
        retention_days = config.simulation.retention_days,
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::new(&config.storage.database_path)
            .context("Failed to initialize flockwatch store")?,
    );
    info!("Store initialized");

    // Simulations are not resumed across restarts
    let registry = Arc::new(SimulationRegistry::new(
        store.clone(),
        SimulationOptions::from(&config.simulation),
    ));

    let router = create_router(ApiState::from_sqlite(
        Arc::clone(&store),
        Arc::clone(&registry),
        config.api.clone(),
    ));
    let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_address))?;
    info!(address = %config.api.bind_address, "API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    let stopped = registry.shutdown();
    info!(simulations_stopped = stopped, "Flockwatch stopped");

    Ok(())
}
