//! Health check endpoints

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::PoolError;
use crate::models::{ApiResponse, PoolStatus};

/// Health check endpoint
pub async fn health_check() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::ok(json!({
        "status": "healthy",
        "service": "freepool"
    })))
}

/// Uptime plus stored / available / leased counts
pub async fn status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PoolStatus>>, PoolError> {
    let status = state.engine.status().await?;
    Ok(Json(ApiResponse::ok(status)))
}
