// HTTP control surface: block management, simulation control, monitoring data

mod blocks;
mod error;
mod monitoring;
mod simulation;

pub use blocks::{create_blocks_router, BlockView};
pub use error::ApiError;
pub use monitoring::{create_monitoring_router, HistoryResponse, OwnerOverview};
pub use simulation::{create_simulation_router, SimulationStatus, StartRequest};

use crate::config::ApiConfig;
use crate::simulation::SimulationRegistry;
use crate::storage::{BlockDirectory, MonitoringStore, SqliteStore};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared state for all API routes
pub struct ApiState {
    pub blocks: Arc<dyn BlockDirectory>,
    pub store: Arc<dyn MonitoringStore>,
    pub registry: Arc<SimulationRegistry>,
    pub config: ApiConfig,
}

impl ApiState {
    /// State backed by a single SQLite store for blocks, readings and alerts.
    pub fn from_sqlite(
        store: Arc<SqliteStore>,
        registry: Arc<SimulationRegistry>,
        config: ApiConfig,
    ) -> Self {
        Self {
            blocks: store.clone(),
            store,
            registry,
            config,
        }
    }
}

/// Create the full API router
pub fn create_router(state: ApiState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .merge(create_blocks_router(Arc::clone(&state)))
        .merge(create_simulation_router(Arc::clone(&state)))
        .merge(create_monitoring_router(state))
        .layer(CorsLayer::permissive())
}
