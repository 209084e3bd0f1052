use crate::error::{PoolError, Result};
use crate::proxy::probe::ProbeConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Control-surface server configuration
    pub api: ApiServerConfig,
    /// Shard store location
    pub store: StoreConfig,
    /// Probe target and timeouts
    pub probe: ProbeConfig,
    /// Health-sweep pacing
    pub health: HealthConfig,
    /// Lease, discovery and revalidation settings
    pub allocation: AllocationConfig,
    /// Optional candidate collector
    pub collector: CollectorConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8082)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = any origin)
    pub cors_origins: Vec<String>,
    /// How long in-flight requests may drain on shutdown
    pub shutdown_grace: Duration,
    /// Upper bound for a single request
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding one SQLite file per shard
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Pause between consecutive probes within a sweep
    pub probe_delay: Duration,
    /// Pause between full sweeps
    pub cycle_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct AllocationConfig {
    /// A lease older than this is reclaimed
    pub lease_timeout: Duration,
    /// Interval between reclaim scans
    pub reclaim_interval: Duration,
    /// Interval between discovery passes
    pub discovery_interval: Duration,
    /// Pause between launching discovery probes
    pub discovery_probe_delay: Duration,
    /// Concurrent discovery probes
    pub discovery_workers: usize,
    /// Probe attempts before a revalidated endpoint is dropped
    pub revalidate_attempts: u32,
    /// Pause between revalidation attempts
    pub revalidate_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Candidate list URL; the collector is disabled when unset
    pub source_url: Option<String>,
    /// Interval between fetches
    pub interval: Duration,
    /// HTTP timeout for a single fetch
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            api: ApiServerConfig {
                port: parse_env("API_PORT", "8082")?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                shutdown_grace: Duration::from_secs(parse_env("API_SHUTDOWN_GRACE_SECS", "5")?),
                request_timeout: Duration::from_secs(parse_env("API_REQUEST_TIMEOUT_SECS", "60")?),
            },
            store: StoreConfig {
                data_dir: PathBuf::from(get_env_or("DATA_DIR", "./data")),
            },
            probe: ProbeConfig {
                target_url: get_env_or("PROBE_URL", "http://icanhazip.com/"),
                timeout: Duration::from_secs(parse_env("PROBE_TIMEOUT_SECS", "10")?),
                inspect_timeout: Duration::from_secs(parse_env("CHECK_TIMEOUT_SECS", "30")?),
            },
            health: HealthConfig {
                probe_delay: Duration::from_millis(parse_env("HEALTH_PROBE_DELAY_MS", "1000")?),
                cycle_delay: Duration::from_secs(parse_env("HEALTH_CYCLE_DELAY_SECS", "4")?),
            },
            allocation: AllocationConfig {
                lease_timeout: Duration::from_secs(parse_env("LEASE_TIMEOUT_SECS", "120")?),
                reclaim_interval: Duration::from_secs(parse_env("RECLAIM_INTERVAL_SECS", "4")?),
                discovery_interval: Duration::from_secs(parse_env(
                    "DISCOVERY_INTERVAL_SECS",
                    "1",
                )?),
                discovery_probe_delay: Duration::from_millis(parse_env(
                    "DISCOVERY_PROBE_DELAY_MS",
                    "1000",
                )?),
                discovery_workers: parse_env("DISCOVERY_WORKERS", "8")?,
                revalidate_attempts: parse_env("REVALIDATE_ATTEMPTS", "5")?,
                revalidate_delay: Duration::from_millis(parse_env("REVALIDATE_DELAY_MS", "1000")?),
            },
            collector: CollectorConfig {
                source_url: env::var("COLLECTOR_SOURCE_URL")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                interval: Duration::from_secs(parse_env("COLLECTOR_INTERVAL_SECS", "14")?),
                timeout: Duration::from_secs(parse_env("COLLECTOR_TIMEOUT_SECS", "30")?),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the background loops
    pub fn validate(&self) -> Result<()> {
        if self.store.data_dir.as_os_str().is_empty() {
            return Err(PoolError::InvalidConfig("DATA_DIR must not be empty".into()));
        }

        let probe_url = Url::parse(&self.probe.target_url).map_err(|e| {
            PoolError::InvalidConfig(format!("PROBE_URL must be a valid URL: {}", e))
        })?;
        if !matches!(probe_url.scheme(), "http" | "https") {
            return Err(PoolError::InvalidConfig(
                "PROBE_URL must use http or https".into(),
            ));
        }

        if self.probe.timeout.is_zero() || self.probe.inspect_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "probe timeouts must be greater than zero".into(),
            ));
        }
        if self.api.request_timeout <= self.probe.inspect_timeout {
            return Err(PoolError::InvalidConfig(
                "API_REQUEST_TIMEOUT_SECS must exceed CHECK_TIMEOUT_SECS".into(),
            ));
        }
        if self.allocation.reclaim_interval.is_zero()
            || self.allocation.discovery_interval.is_zero()
            || self.collector.interval.is_zero()
        {
            return Err(PoolError::InvalidConfig(
                "loop intervals must be greater than zero".into(),
            ));
        }
        if self.allocation.discovery_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "DISCOVERY_WORKERS must be at least 1".into(),
            ));
        }
        if self.allocation.revalidate_attempts == 0 {
            return Err(PoolError::InvalidConfig(
                "REVALIDATE_ATTEMPTS must be at least 1".into(),
            ));
        }

        if let Some(source) = &self.collector.source_url {
            Url::parse(source).map_err(|e| {
                PoolError::InvalidConfig(format!("COLLECTOR_SOURCE_URL must be a valid URL: {}", e))
            })?;
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    let raw = get_env_or(key, default);
    raw.trim().parse().map_err(|_| {
        PoolError::InvalidConfig(format!("{} has an invalid value: {}", key, raw))
    })
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
