//! CORS middleware configuration

use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

/// Create a CORS layer with the specified allowed origins
///
/// An empty list allows any origin. Credentials are never allowed since
/// the surface carries no authentication.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if allowed_origins.is_empty() {
        debug!("CORS: No origins specified, allowing any origin");
        return layer.allow_origin(Any);
    }

    debug!("CORS: Allowing origins: {:?}", allowed_origins);
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("CORS: Ignoring invalid origin {}", o);
                None
            }
        })
        .collect();

    layer.allow_origin(origins)
}
