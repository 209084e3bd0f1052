//! Request logging middleware

use axum::body::Body;
use axum::http::{Request, Uri};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Request logging middleware
pub struct RequestLogging;

impl RequestLogging {
    /// One line per request, tagged with the `ip` the route acted on
    pub async fn log_request(req: Request<Body>, next: Next) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let endpoint = endpoint_param(req.uri()).unwrap_or_default();
        let start = Instant::now();

        debug!(%method, %path, endpoint = %endpoint, "request started");

        let response = next.run(req).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let status = response.status().as_u16();

        if response.status().is_server_error() {
            warn!(%method, %path, endpoint = %endpoint, status, elapsed_ms, "request failed");
        } else {
            info!(%method, %path, endpoint = %endpoint, status, elapsed_ms, "request handled");
        }

        response
    }
}

/// Trimmed `ip` query value, if any
fn endpoint_param(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "ip")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_param() {
        let uri: Uri = "/add?ip=%2010.0.0.1%3A3128%20".parse().unwrap();
        assert_eq!(endpoint_param(&uri).as_deref(), Some("10.0.0.1:3128"));

        let uri: Uri = "/check?page=2&ip=socks5://u:p@h:1080".parse().unwrap();
        assert_eq!(endpoint_param(&uri).as_deref(), Some("socks5://u:p@h:1080"));

        let uri: Uri = "/get".parse().unwrap();
        assert_eq!(endpoint_param(&uri), None);

        let uri: Uri = "/add?ip=".parse().unwrap();
        assert_eq!(endpoint_param(&uri), None);
    }
}
