//! API server using Axum
//!
//! Serves the pool's control surface over HTTP.

use std::net::SocketAddr;

use axum::middleware::from_fn;
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::engine::PoolEngine;
use crate::error::{PoolError, Result};
use crate::lifecycle::ShutdownSignal;

use super::middleware::{cors_layer, RequestLogging};
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: PoolEngine,
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, engine: PoolEngine) -> Self {
        Self {
            config,
            state: AppState { engine },
        }
    }

    /// Build the router with every layer applied
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(from_fn(RequestLogging::log_request))
            .layer(TimeoutLayer::new(self.config.request_timeout))
            .layer(cors_layer(&self.config.cors_origins))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` fires, then drain
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| PoolError::InvalidConfig(format!("invalid API address: {}", e)))?;

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("API server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.recv().await })
            .await
            .map_err(|e| PoolError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
