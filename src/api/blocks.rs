use super::error::{block_not_found, ApiError};
use super::ApiState;
use crate::flock::{validate_name, FlockBlock, FlockBlockUpdate, NewFlockBlock};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A block together with its live simulation status
#[derive(Serialize)]
pub struct BlockView {
    #[serde(flatten)]
    pub block: FlockBlock,
    pub is_running: bool,
}

#[derive(Deserialize)]
pub struct OwnerParams {
    pub owner_id: i64,
}

#[derive(Serialize)]
pub struct UpdateResponse {
    pub block: FlockBlock,
    /// The running simulation still uses the old attributes until restarted
    pub restart_required: bool,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub block_id: i64,
    pub simulation_stopped: bool,
}

pub fn create_blocks_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/blocks", get(list_blocks).post(create_block))
        .route(
            "/api/blocks/:id",
            get(get_block).put(update_block).delete(delete_block),
        )
        .with_state(state)
}

fn view(state: &ApiState, block: FlockBlock) -> BlockView {
    BlockView {
        is_running: state.registry.is_running(block.id),
        block,
    }
}

/// POST /api/blocks
async fn create_block(
    State(state): State<Arc<ApiState>>,
    Json(new): Json<NewFlockBlock>,
) -> Result<(StatusCode, Json<BlockView>), ApiError> {
    validate_name(&new.name)?;

    let max = state.config.max_blocks_per_owner;
    let block = state
        .blocks
        .create_block_within_limit(&new, max)?
        .ok_or(ApiError::LimitReached { max })?;
    info!(block_id = block.id, owner_id = block.owner_id, name = %block.name, "Block created");
    Ok((StatusCode::CREATED, Json(view(&state, block))))
}

/// GET /api/blocks?owner_id=N
async fn list_blocks(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<Vec<BlockView>>, ApiError> {
    let blocks = state.blocks.list_blocks(params.owner_id)?;
    Ok(Json(blocks.into_iter().map(|b| view(&state, b)).collect()))
}

/// GET /api/blocks/:id
async fn get_block(
    State(state): State<Arc<ApiState>>,
    Path(block_id): Path<i64>,
) -> Result<Json<BlockView>, ApiError> {
    let block = state
        .blocks
        .get_block(block_id)?
        .ok_or_else(|| block_not_found(block_id))?;
    Ok(Json(view(&state, block)))
}

/// PUT /api/blocks/:id - partial update
async fn update_block(
    State(state): State<Arc<ApiState>>,
    Path(block_id): Path<i64>,
    Json(update): Json<FlockBlockUpdate>,
) -> Result<Json<UpdateResponse>, ApiError> {
    if let Some(name) = &update.name {
        validate_name(name)?;
    }

    let block = state
        .blocks
        .update_block(block_id, &update)?
        .ok_or_else(|| block_not_found(block_id))?;

    let restart_required = state.registry.is_running(block_id);
    if restart_required {
        warn!(block_id, "Block updated while simulating; restart to apply changes");
    }

    Ok(Json(UpdateResponse {
        block,
        restart_required,
    }))
}

/// DELETE /api/blocks/:id - stops the simulation, then removes the block
/// with its readings and alerts
async fn delete_block(
    State(state): State<Arc<ApiState>>,
    Path(block_id): Path<i64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if state.blocks.get_block(block_id)?.is_none() {
        return Err(block_not_found(block_id));
    }

    let simulation_stopped = state.registry.stop_and_wait(block_id).await;
    if !state.blocks.delete_block(block_id)? {
        return Err(block_not_found(block_id));
    }

    info!(block_id, simulation_stopped, "Block deleted");
    Ok(Json(DeleteResponse {
        block_id,
        simulation_stopped,
    }))
}
