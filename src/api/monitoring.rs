use super::error::{block_not_found, ApiError};
use super::ApiState;
use crate::history::{summarize, HistoryRange};
use crate::sensor::{SensorValues, StoredAlert, StoredReading};
use crate::storage::{AlertFilter, ReadingFilter};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Deserialize)]
pub struct HistoryParams {
    /// One of 1h, 6h, 12h, 24h, 7d, 30d. Anything else means 24h.
    pub range: Option<String>,
}

#[derive(Deserialize)]
pub struct AlertParams {
    pub resolved: Option<bool>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub block_id: i64,
    pub range: HistoryRange,
    pub data_points: usize,
    pub averages: SensorValues,
    pub readings: Vec<StoredReading>,
}

#[derive(Serialize)]
pub struct BlockOverview {
    pub block_id: i64,
    pub name: String,
    pub number_of_birds: u32,
    pub is_running: bool,
}

#[derive(Serialize)]
pub struct OwnerOverview {
    pub owner_id: i64,
    pub total_blocks: usize,
    pub total_birds: u64,
    pub active_simulations: usize,
    pub data_points: u64,
    pub unresolved_alerts: usize,
    pub blocks: Vec<BlockOverview>,
}

pub fn create_monitoring_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/blocks/:id/readings", get(block_history))
        .route("/api/blocks/:id/readings/latest", get(block_latest))
        .route("/api/blocks/:id/alerts", get(block_alerts))
        .route("/api/alerts/:id/resolve", post(resolve_alert))
        .route("/api/owners/:owner_id/overview", get(owner_overview))
        .route("/api/owners/:owner_id/readings", get(owner_recent_readings))
        .route("/api/owners/:owner_id/readings/latest", get(owner_latest))
        .route("/api/owners/:owner_id/alerts", get(owner_alerts))
        .with_state(state)
}

fn ensure_block(state: &ApiState, block_id: i64) -> Result<(), ApiError> {
    match state.blocks.get_block(block_id)? {
        Some(_) => Ok(()),
        None => Err(block_not_found(block_id)),
    }
}

/// GET /api/blocks/:id/readings/latest
async fn block_latest(
    State(state): State<Arc<ApiState>>,
    Path(block_id): Path<i64>,
) -> Result<Json<Option<StoredReading>>, ApiError> {
    ensure_block(&state, block_id)?;
    let latest = state
        .store
        .latest_reading(&ReadingFilter::for_block(block_id))?;
    Ok(Json(latest))
}

/// GET /api/blocks/:id/readings?range=24h
///
/// Oldest first, with per-metric averages over the window.
async fn block_history(
    State(state): State<Arc<ApiState>>,
    Path(block_id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    ensure_block(&state, block_id)?;

    let range = HistoryRange::parse_or_default(params.range.as_deref());
    let readings = state
        .store
        .filter_readings(&range.filter(block_id, Utc::now()))?;
    let summary = summarize(&readings);

    Ok(Json(HistoryResponse {
        block_id,
        range,
        data_points: summary.data_points,
        averages: summary.averages,
        readings,
    }))
}

/// GET /api/blocks/:id/alerts?resolved=false
async fn block_alerts(
    State(state): State<Arc<ApiState>>,
    Path(block_id): Path<i64>,
    Query(params): Query<AlertParams>,
) -> Result<Json<Vec<StoredAlert>>, ApiError> {
    ensure_block(&state, block_id)?;

    let filter = AlertFilter {
        resolved: params.resolved,
        ..AlertFilter::for_block(block_id)
    }
    .limit(state.config.alerts_limit);
    Ok(Json(state.store.filter_alerts(&filter)?))
}

/// POST /api/alerts/:id/resolve
async fn resolve_alert(
    State(state): State<Arc<ApiState>>,
    Path(alert_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.resolve_alert(alert_id)? {
        return Err(ApiError::NotFound(format!("Alert {} not found", alert_id)));
    }
    info!(alert_id, "Alert resolved");
    Ok(Json(serde_json::json!({
        "success": true,
        "alert_id": alert_id,
    })))
}

/// GET /api/owners/:owner_id/overview
async fn owner_overview(
    State(state): State<Arc<ApiState>>,
    Path(owner_id): Path<i64>,
) -> Result<Json<OwnerOverview>, ApiError> {
    let blocks: Vec<BlockOverview> = state
        .blocks
        .list_blocks(owner_id)?
        .into_iter()
        .map(|b| BlockOverview {
            is_running: state.registry.is_running(b.id),
            block_id: b.id,
            name: b.name,
            number_of_birds: b.number_of_birds,
        })
        .collect();

    let data_points = state
        .store
        .count_readings(&ReadingFilter::for_owner(owner_id))?;
    let unresolved_alerts = state
        .store
        .filter_alerts(&AlertFilter::for_owner(owner_id).unresolved())?
        .len();

    Ok(Json(OwnerOverview {
        owner_id,
        total_blocks: blocks.len(),
        total_birds: blocks.iter().map(|b| b.number_of_birds as u64).sum(),
        active_simulations: blocks.iter().filter(|b| b.is_running).count(),
        data_points,
        unresolved_alerts,
        blocks,
    }))
}

/// GET /api/owners/:owner_id/readings - most recent readings across all blocks
async fn owner_recent_readings(
    State(state): State<Arc<ApiState>>,
    Path(owner_id): Path<i64>,
) -> Result<Json<Vec<StoredReading>>, ApiError> {
    let filter = ReadingFilter::for_owner(owner_id).limit(state.config.history_limit);
    Ok(Json(state.store.filter_readings(&filter)?))
}

/// GET /api/owners/:owner_id/readings/latest
async fn owner_latest(
    State(state): State<Arc<ApiState>>,
    Path(owner_id): Path<i64>,
) -> Result<Json<Option<StoredReading>>, ApiError> {
    Ok(Json(
        state
            .store
            .latest_reading(&ReadingFilter::for_owner(owner_id))?,
    ))
}

/// GET /api/owners/:owner_id/alerts - newest unresolved alerts
async fn owner_alerts(
    State(state): State<Arc<ApiState>>,
    Path(owner_id): Path<i64>,
) -> Result<Json<Vec<StoredAlert>>, ApiError> {
    let filter = AlertFilter::for_owner(owner_id)
        .unresolved()
        .limit(state.config.alerts_limit);
    Ok(Json(state.store.filter_alerts(&filter)?))
}
