//! Candidate collector
//!
//! Periodically pulls raw endpoints from a [`CandidateSource`] and stores
//! them as fresh records. Existing records keep their check metadata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::CollectorConfig;
use crate::error::{PoolError, Result};
use crate::lifecycle::ShutdownSignal;
use crate::proxy::transport::ProxyEndpoint;
use crate::repository::ProxyRepository;

/// Supplier of raw candidate endpoints
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Tag stored as the record's `source`
    fn name(&self) -> &str;

    /// Fetch the current batch of candidates
    async fn fetch_candidates(&self) -> Result<Vec<String>>;
}

/// Plain-text candidate list served over HTTP, one endpoint per line
pub struct HttpCandidateSource {
    client: Client,
    url: String,
    name: String,
}

impl HttpCandidateSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| {
            PoolError::InvalidConfig(format!("candidate source URL {} is invalid: {}", url, e))
        })?;
        let name = parsed.host_str().unwrap_or("unknown").to_string();

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("freepool/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            name,
        })
    }
}

#[async_trait]
impl CandidateSource for HttpCandidateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_candidates(&self) -> Result<Vec<String>> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PoolError::SourceFailed(format!(
                "GET {} returned {}",
                self.url, status
            )));
        }

        let body = response.text().await?;
        Ok(split_candidates(&body))
    }
}

/// Trimmed, non-empty lines of a candidate list
pub fn split_candidates(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Outcome of one collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub stored: usize,
    pub rejected: usize,
}

/// Collector loop
pub struct Collector {
    repo: ProxyRepository,
    source: Arc<dyn CandidateSource>,
    interval: Duration,
}

impl Collector {
    pub fn new(repo: ProxyRepository, source: Arc<dyn CandidateSource>, interval: Duration) -> Self {
        Self {
            repo,
            source,
            interval,
        }
    }

    /// Collector fed by `COLLECTOR_SOURCE_URL`, or `None` when unset
    pub fn from_config(repo: ProxyRepository, config: &CollectorConfig) -> Result<Option<Self>> {
        let Some(url) = config.source_url.as_deref() else {
            return Ok(None);
        };
        let source = HttpCandidateSource::new(url, config.timeout)?;
        Ok(Some(Self::new(repo, Arc::new(source), config.interval)))
    }

    /// Run the collector (call in a spawned task)
    #[instrument(skip(self, shutdown), fields(source = %self.source.name()))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(
            "Starting collector (interval: {}s)",
            self.interval.as_secs()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // First fetch waits one interval

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            match self.collect_once().await {
                Ok(summary) => info!(
                    "Collected {} candidates ({} rejected)",
                    summary.stored, summary.rejected
                ),
                Err(e) => error!("Candidate fetch failed: {}", e),
            }
        }

        info!("Collector shutting down");
    }

    /// Fetch one batch and store every valid candidate
    pub async fn collect_once(&self) -> Result<CollectSummary> {
        let candidates = self.source.fetch_candidates().await?;
        let mut summary = CollectSummary::default();

        for raw in candidates {
            let (endpoint, kind) = match ProxyEndpoint::validate_key(&raw) {
                Ok(validated) => validated,
                Err(e) => {
                    debug!(candidate = %raw, "Rejected candidate: {}", e);
                    summary.rejected += 1;
                    continue;
                }
            };

            match self
                .repo
                .add_endpoint(&endpoint, kind, Some(self.source.name()))
                .await
            {
                Ok(()) => summary.stored += 1,
                Err(e) => {
                    warn!(endpoint = %endpoint, "Failed to store candidate: {}", e);
                    summary.rejected += 1;
                }
            }
        }

        Ok(summary)
    }
}
