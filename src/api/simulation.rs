use super::error::{block_not_found, ApiError};
use super::ApiState;
use crate::sensor::StoredReading;
use crate::simulation::{RunnerState, RunnerStats};
use crate::storage::ReadingFilter;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// Optional body for the start endpoint
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub interval_seconds: Option<f64>,
}

#[derive(Serialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub interval_seconds: f64,
    pub started_at: DateTime<Utc>,
    pub state: RunnerState,
    pub stats: RunnerStats,
}

#[derive(Serialize)]
pub struct SimulationStatus {
    pub block_id: i64,
    pub block_name: String,
    pub is_running: bool,
    pub run: Option<RunInfo>,
    pub latest_data: Option<StoredReading>,
}

pub fn create_simulation_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/blocks/:id/simulation", get(simulation_status))
        .route("/api/blocks/:id/simulation/start", post(start_simulation))
        .route("/api/blocks/:id/simulation/stop", post(stop_simulation))
        .with_state(state)
}

/// `{"success": false, "error": ..}` with the given status
fn soft_failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message.into(),
        })),
    )
        .into_response()
}

fn parse_start_request(body: &Bytes) -> Result<StartRequest, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| format!("Invalid start request: {}", e))
}

/// Longest tick interval a start request may ask for (one day)
const MAX_INTERVAL_SECONDS: f64 = 86_400.0;

fn interval_from(seconds: f64) -> Result<Duration, String> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!(
            "interval_seconds must be a positive number, got {}",
            seconds
        ));
    }
    if seconds > MAX_INTERVAL_SECONDS {
        return Err(format!(
            "interval_seconds must be at most {}, got {}",
            MAX_INTERVAL_SECONDS, seconds
        ));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Invalid interval: {}", e))
}

/// POST /api/blocks/:id/simulation/start
///
/// Idempotent: a second start reports the run already in progress.
async fn start_simulation(
    State(state): State<Arc<ApiState>>,
    Path(block_id): Path<i64>,
    body: Bytes,
) -> Response {
    let request = match parse_start_request(&body) {
        Ok(r) => r,
        Err(msg) => return soft_failure(StatusCode::BAD_REQUEST, msg),
    };

    let block = match state.blocks.get_block(block_id) {
        Ok(Some(block)) => block,
        Ok(None) => return soft_failure(StatusCode::NOT_FOUND, "Block not found"),
        Err(e) => {
            error!(block_id, error = %e, "Failed to load block for simulation start");
            return soft_failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to start simulation: {:#}", e),
            );
        }
    };

    let already_running = state.registry.is_running(block_id);
    let handle = match request.interval_seconds {
        Some(seconds) => match interval_from(seconds) {
            Ok(interval) => state.registry.start_with_interval(&block, interval),
            Err(msg) => return soft_failure(StatusCode::BAD_REQUEST, msg),
        },
        None => state.registry.start(&block),
    };

    let message = if already_running {
        format!("Simulation already running for block: {}", block.name)
    } else {
        info!(block_id, run_id = %handle.run_id(), "Simulation started via API");
        format!("Simulation started for block: {}", block.name)
    };

    Json(serde_json::json!({
        "success": true,
        "message": message,
        "block_id": block_id,
        "is_running": true,
        "already_running": already_running,
        "run_id": handle.run_id(),
        "interval_seconds": handle.interval().as_secs_f64(),
    }))
    .into_response()
}

/// POST /api/blocks/:id/simulation/stop
async fn stop_simulation(State(state): State<Arc<ApiState>>, Path(block_id): Path<i64>) -> Response {
    let block = match state.blocks.get_block(block_id) {
        Ok(Some(block)) => block,
        Ok(None) => return soft_failure(StatusCode::NOT_FOUND, "Block not found"),
        Err(e) => {
            error!(block_id, error = %e, "Failed to load block for simulation stop");
            return soft_failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to stop simulation: {:#}", e),
            );
        }
    };

    let was_running = state.registry.stop(block_id);
    let message = if was_running {
        format!("Simulation stopped for block: {}", block.name)
    } else {
        format!("Simulation was not running for block: {}", block.name)
    };

    Json(serde_json::json!({
        "success": true,
        "message": message,
        "block_id": block_id,
        "is_running": false,
        "was_running": was_running,
    }))
    .into_response()
}

/// GET /api/blocks/:id/simulation
async fn simulation_status(
    State(state): State<Arc<ApiState>>,
    Path(block_id): Path<i64>,
) -> Result<Json<SimulationStatus>, ApiError> {
    let block = state
        .blocks
        .get_block(block_id)?
        .ok_or_else(|| block_not_found(block_id))?;

    let run = state.registry.handle(block_id).map(|handle| RunInfo {
        run_id: handle.run_id(),
        interval_seconds: handle.interval().as_secs_f64(),
        started_at: handle.started_at(),
        state: handle.state(),
        stats: handle.stats(),
    });

    // Latest data is only meaningful while a run is producing it
    let latest_data = match run {
        Some(_) => state
            .store
            .latest_reading(&ReadingFilter::for_block(block_id))?,
        None => None,
    };

    Ok(Json(SimulationStatus {
        block_id,
        block_name: block.name,
        is_running: run.is_some(),
        run,
        latest_data,
    }))
}
