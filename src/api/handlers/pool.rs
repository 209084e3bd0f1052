//! Pool operation handlers

use axum::extract::{Query, State};
use axum::Json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::{PoolError, Result};
use crate::models::{ApiResponse, EndpointParams, PageParams, ProxyRecord};

type ApiResult<T> = Result<Json<ApiResponse<T>>>;

/// Required `?ip=` value
fn required_endpoint(params: &EndpointParams) -> Result<&str> {
    let endpoint = params.endpoint();
    if endpoint.is_empty() {
        return Err(PoolError::InvalidArgument("ip must not be empty".to_string()));
    }
    Ok(endpoint)
}

/// Keys of the shard selected by `?page=`
pub async fn list_keys(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<Vec<String>> {
    let keys = state.engine.list_keys(params.page()).await?;
    Ok(Json(ApiResponse::ok(keys)))
}

/// Store a new endpoint
pub async fn add_endpoint(
    State(state): State<AppState>,
    Query(params): Query<EndpointParams>,
) -> ApiResult<String> {
    let endpoint = required_endpoint(&params)?;
    let key = state.engine.add_endpoint(endpoint).await?;
    Ok(Json(ApiResponse::ok_with_message("added", key)))
}

/// Probe an endpoint once
pub async fn check_endpoint(
    State(state): State<AppState>,
    Query(params): Query<EndpointParams>,
) -> ApiResult<String> {
    let endpoint = required_endpoint(&params)?;
    let report = state.engine.check_once(endpoint).await?;
    Ok(Json(ApiResponse::ok(report)))
}

/// Lease an available endpoint; empty data when none is available
pub async fn allocate(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    match state.engine.allocate() {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "Endpoint leased");
            Json(ApiResponse::ok(endpoint))
        }
        None => Json(ApiResponse::ok_with_message(
            "no available proxy",
            String::new(),
        )),
    }
}

pub async fn list_leased(State(state): State<AppState>) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(state.engine.list_leased()))
}

pub async fn list_available(State(state): State<AppState>) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(state.engine.list_available()))
}

/// Return a lease early
pub async fn release(
    State(state): State<AppState>,
    Query(params): Query<EndpointParams>,
) -> ApiResult<String> {
    let endpoint = required_endpoint(&params)?;
    state.engine.release(endpoint)?;
    Ok(Json(ApiResponse::ok_with_message(
        "released",
        endpoint.to_string(),
    )))
}

/// Full stored record
pub async fn get_record(
    State(state): State<AppState>,
    Query(params): Query<EndpointParams>,
) -> ApiResult<ProxyRecord> {
    let endpoint = required_endpoint(&params)?;
    let record = state.engine.get_record(endpoint).await?;
    Ok(Json(ApiResponse::ok(record)))
}
