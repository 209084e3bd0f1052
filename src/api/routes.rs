//! API route definitions

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .route("/all", get(handlers::pool::list_keys))
        .route(
            "/add",
            get(handlers::pool::add_endpoint).post(handlers::pool::add_endpoint),
        )
        .route("/check", get(handlers::pool::check_endpoint))
        .route("/get", get(handlers::pool::allocate))
        .route("/useList", get(handlers::pool::list_leased))
        .route("/notuseList", get(handlers::pool::list_available))
        .route(
            "/release",
            get(handlers::pool::release).post(handlers::pool::release),
        )
        .route("/record", get(handlers::pool::get_record))
        .with_state(state)
}
