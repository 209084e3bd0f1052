//! Proxy transport layer for HTTP and SOCKS protocols
//!
//! Parses endpoint strings and establishes connections through them.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{PoolError, Result};
use crate::models::ProxyProtocol;

/// A parsed, dialable proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub protocol: ProxyProtocol,
    /// Host as it appears in a URL authority (IPv6 stays bracketed)
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Parse `host:port` or `scheme://[user:pass@]host:port`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PoolError::InvalidArgument(
                "endpoint must not be empty".to_string(),
            ));
        }

        let url = if raw.contains("://") {
            Url::parse(raw)?
        } else {
            // Bare endpoints are dialed as HTTP proxies
            Url::parse(&format!("http://{}", raw))?
        };

        let protocol = ProxyProtocol::from_str(url.scheme())
            .ok_or_else(|| PoolError::UnsupportedProtocol(url.scheme().to_string()))?;

        if !(url.path().is_empty() || url.path() == "/")
            || url.query().is_some()
            || url.fragment().is_some()
        {
            return Err(PoolError::InvalidProxyAddress(format!(
                "{} must not include a path, query or fragment",
                raw
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PoolError::InvalidProxyAddress(format!("{} has no host", raw)))?
            .to_string();

        let port = match url.port_or_known_default() {
            Some(p) => p,
            None if protocol.is_socks() => 1080,
            None => {
                return Err(PoolError::InvalidProxyAddress(format!(
                    "{} has no port",
                    raw
                )))
            }
        };

        let username = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };
        let password = url.password().map(str::to_string);

        Ok(Self {
            protocol,
            host,
            port,
            username,
            password,
        })
    }

    /// Validate a raw endpoint for storage
    ///
    /// Returns the trimmed key and the protocol when a scheme was given.
    pub fn validate_key(raw: &str) -> Result<(String, Option<ProxyProtocol>)> {
        let parsed = Self::parse(raw)?;
        let key = raw.trim().to_string();
        let kind = key.contains("://").then_some(parsed.protocol);
        Ok((key, kind))
    }

    /// `host:port` suitable for `TcpStream::connect`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value for a `Proxy-Authorization` header, when credentials are present
    pub fn basic_auth(&self) -> Option<String> {
        let username = self.username.as_ref()?;
        let password = self.password.as_deref().unwrap_or("");
        let credentials = format!("{}:{}", username, password);
        Some(format!("Basic {}", BASE64.encode(credentials.as_bytes())))
    }
}

/// Proxy transport handler
///
/// Manages connections through various proxy protocols
pub struct ProxyTransport;

impl ProxyTransport {
    /// Open a plain TCP connection to the proxy itself
    pub async fn connect_proxy(endpoint: &ProxyEndpoint) -> Result<TcpStream> {
        TcpStream::connect(endpoint.address())
            .await
            .map_err(|e| PoolError::ProbeFailed(format!("TCP connect failed: {}", e)))
    }

    /// Establish a tunnel to `target_host:target_port` through the proxy
    #[instrument(skip(endpoint), fields(proxy = %endpoint.address(), target = %target_host))]
    pub async fn tunnel(
        endpoint: &ProxyEndpoint,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        match endpoint.protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => {
                Self::connect_http(endpoint, target_host, target_port).await
            }
            ProxyProtocol::Socks5 => Self::connect_socks5(endpoint, target_host, target_port).await,
        }
    }

    /// Connect through HTTP CONNECT method
    async fn connect_http(
        endpoint: &ProxyEndpoint,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        debug!("Connecting to HTTP proxy at {}", endpoint.address());

        let mut stream = Self::connect_proxy(endpoint).await?;

        let request = Self::build_connect_request(endpoint, target_host, target_port);
        stream.write_all(request.as_bytes()).await.map_err(|e| {
            PoolError::ProbeFailed(format!("Failed to send CONNECT: {}", e))
        })?;

        let mut response = vec![0u8; 1024];
        let n = stream.read(&mut response).await.map_err(|e| {
            PoolError::ProbeFailed(format!("Failed to read CONNECT response: {}", e))
        })?;
        if n == 0 {
            return Err(PoolError::ProbeFailed("empty CONNECT response".to_string()));
        }

        let response_str = String::from_utf8_lossy(&response[..n]);
        if !response_str.starts_with("HTTP/1.1 200") && !response_str.starts_with("HTTP/1.0 200") {
            return Err(PoolError::ProbeFailed(format!(
                "CONNECT failed: {}",
                response_str.lines().next().unwrap_or("Unknown error")
            )));
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(stream)
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(endpoint: &ProxyEndpoint, target_host: &str, target_port: u16) -> String {
        let authority = format_authority(target_host, target_port);
        let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

        if let Some(auth) = endpoint.basic_auth() {
            request.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
        }

        request.push_str("\r\n");
        request
    }

    /// Connect through SOCKS5 proxy
    async fn connect_socks5(
        endpoint: &ProxyEndpoint,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        debug!("Connecting to SOCKS5 proxy at {}", endpoint.address());

        let socket = Self::connect_proxy(endpoint).await?;

        let stream = match (&endpoint.username, &endpoint.password) {
            (Some(username), Some(password)) => {
                Socks5Stream::connect_with_password_and_socket(
                    socket,
                    (target_host, target_port),
                    username,
                    password,
                )
                .await
            }
            _ => Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await,
        }
        .map_err(|e| PoolError::ProbeFailed(format!("SOCKS5 connect failed: {}", e)))?;

        debug!("SOCKS5 connection established");
        Ok(stream.into_inner())
    }
}

/// `host:port` for a request line, bracketing bare IPv6 literals
pub fn format_authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
