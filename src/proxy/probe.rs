//! Liveness probes routed through a candidate proxy

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};
use url::Url;

use super::transport::{format_authority, ProxyEndpoint, ProxyTransport};
use crate::error::{PoolError, Result};
use crate::models::ProxyProtocol;

/// Probe configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Fixed, low-variance resource fetched through each proxy
    pub target_url: String,
    /// Timeout used by the background loops
    pub timeout: Duration,
    /// Timeout for on-demand checks
    pub inspect_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_url: "http://icanhazip.com/".to_string(),
            timeout: Duration::from_secs(10),
            inspect_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a successful probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub latency: Duration,
    /// First response line, or a note that only the tunnel was verified
    pub status_line: String,
}

impl ProbeReport {
    /// Human-readable summary
    pub fn summary(&self) -> String {
        format!("{}  ms:{}", self.status_line, self.latency.as_millis())
    }
}

/// Validation transport shared by every loop that checks liveness
#[async_trait]
pub trait Prober: Send + Sync {
    /// Route one request through `endpoint` with the loop timeout
    async fn probe(&self, endpoint: &str) -> Result<ProbeReport>;

    /// One-off check requested by an operator
    async fn inspect(&self, endpoint: &str) -> Result<ProbeReport> {
        self.probe(endpoint).await
    }
}

/// Parsed probe target
#[derive(Debug, Clone)]
struct ProbeTarget {
    url: String,
    host: String,
    port: u16,
    path: String,
    tls: bool,
}

impl ProbeTarget {
    fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| PoolError::InvalidConfig(format!("probe URL {} is invalid: {}", raw, e)))?;

        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(PoolError::InvalidConfig(format!(
                    "probe URL scheme must be http or https, got {}",
                    other
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| PoolError::InvalidConfig(format!("probe URL {} has no host", raw)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            url: url.to_string(),
            host,
            port,
            path,
            tls,
        })
    }

    fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port != default_port {
            format_authority(&self.host, self.port)
        } else if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

/// Prober that dials through the proxy with [`ProxyTransport`]
pub struct TransportProber {
    target: ProbeTarget,
    config: ProbeConfig,
}

impl TransportProber {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let target = ProbeTarget::parse(&config.target_url)?;
        Ok(Self { target, config })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Route one request through `endpoint`, bounded by `limit`
    #[instrument(skip(self, limit))]
    pub async fn probe_with_timeout(&self, endpoint: &str, limit: Duration) -> Result<ProbeReport> {
        let parsed = ProxyEndpoint::parse(endpoint)?;

        match timeout(limit, self.run_probe(&parsed)).await {
            Ok(Ok(report)) => {
                debug!(latency_ms = report.latency.as_millis() as u64, "Probe succeeded");
                Ok(report)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PoolError::ProbeFailed(format!(
                "timed out after {}s",
                limit.as_secs_f32()
            ))),
        }
    }

    async fn run_probe(&self, endpoint: &ProxyEndpoint) -> Result<ProbeReport> {
        let start = Instant::now();

        if self.target.tls {
            ProxyTransport::tunnel(endpoint, &self.target.host, self.target.port).await?;
            return Ok(ProbeReport {
                latency: start.elapsed(),
                status_line: format!("tunnel to {} established", self.target.host),
            });
        }

        let mut stream = match endpoint.protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => {
                ProxyTransport::connect_proxy(endpoint).await?
            }
            ProxyProtocol::Socks5 => {
                ProxyTransport::tunnel(endpoint, &self.target.host, self.target.port).await?
            }
        };

        let request = self.build_request(endpoint);
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| PoolError::ProbeFailed(format!("write failed: {}", e)))?;

        let status_line = read_status_line(&mut stream).await?;
        let latency = start.elapsed();

        let status = parse_status_code(&status_line).ok_or_else(|| {
            PoolError::ProbeFailed(format!("invalid HTTP response: {}", status_line))
        })?;
        if !(200..400).contains(&status) {
            return Err(PoolError::ProbeFailed(format!(
                "unexpected response: {}",
                status_line
            )));
        }

        Ok(ProbeReport {
            latency,
            status_line,
        })
    }

    /// HTTP proxies get absolute-form requests, tunnels get origin-form
    fn build_request(&self, endpoint: &ProxyEndpoint) -> String {
        let target = if endpoint.protocol.is_http() {
            self.target.url.clone()
        } else {
            self.target.path.clone()
        };

        let mut request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: freepool-probe\r\nAccept: */*\r\nConnection: close\r\n",
            target,
            self.target.host_header()
        );

        if endpoint.protocol.is_http() {
            if let Some(auth) = endpoint.basic_auth() {
                request.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
            }
        }

        request.push_str("\r\n");
        request
    }
}

#[async_trait]
impl Prober for TransportProber {
    async fn probe(&self, endpoint: &str) -> Result<ProbeReport> {
        self.probe_with_timeout(endpoint, self.config.timeout).await
    }

    async fn inspect(&self, endpoint: &str) -> Result<ProbeReport> {
        self.probe_with_timeout(endpoint, self.config.inspect_timeout)
            .await
    }
}

/// Read until the end of the first response line
async fn read_status_line(stream: &mut TcpStream) -> Result<String> {
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];

    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| PoolError::ProbeFailed(format!("read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.contains(&b'\n') || buf.len() >= 4096 {
            break;
        }
    }

    if buf.is_empty() {
        return Err(PoolError::ProbeFailed("empty response".to_string()));
    }

    let text = String::from_utf8_lossy(&buf);
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}

/// Status code from `HTTP/x.y NNN reason`
fn parse_status_code(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Scriptable prober for tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Succeeds for a mutable set of endpoints and counts every call
    #[derive(Default)]
    pub struct FakeProber {
        healthy: Mutex<HashSet<String>>,
        calls: AtomicUsize,
    }

    impl FakeProber {
        pub fn new(healthy: &[&str]) -> Self {
            Self {
                healthy: Mutex::new(healthy.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn set_healthy(&self, endpoint: &str, healthy: bool) {
            let mut set = self.healthy.lock();
            if healthy {
                set.insert(endpoint.to_string());
            } else {
                set.remove(endpoint);
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, endpoint: &str) -> Result<ProbeReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy.lock().contains(endpoint) {
                Ok(ProbeReport {
                    latency: Duration::from_millis(42),
                    status_line: "HTTP/1.1 200 OK".to_string(),
                })
            } else {
                Err(PoolError::ProbeFailed("connection refused".to_string()))
            }
        }
    }
}
