use crate::flock::FlockError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::error;

/// API errors
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    LimitReached { max: usize },
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Storage(e)
    }
}

impl From<FlockError> for ApiError {
    fn from(e: FlockError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::LimitReached { max } => (
                StatusCode::CONFLICT,
                format!("Block limit reached: an owner may have at most {} blocks", max),
            ),
            ApiError::Storage(e) => {
                error!(error = %e, "Storage error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal storage error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub(crate) fn block_not_found(block_id: i64) -> ApiError {
    ApiError::NotFound(format!("Block {} not found", block_id))
}
