//! Discovery loop
//!
//! Scans stored endpoints that are neither Available nor Leased, probes
//! them with bounded concurrency and promotes the live ones to Available.
//! Nothing is written back to the store.

use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, info, instrument, warn};

use crate::config::AllocationConfig;
use crate::lifecycle::ShutdownSignal;
use crate::proxy::allocation::AllocationMachine;
use crate::proxy::probe::Prober;
use crate::repository::ProxyRepository;

/// Floor for the probe pacing interval; `tokio::time::interval` rejects zero
const MIN_PACING: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Pause between full passes
    pub interval: Duration,
    /// Pause between launching consecutive probes
    pub probe_delay: Duration,
    /// Probes in flight at once
    pub workers: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            probe_delay: Duration::from_secs(1),
            workers: 8,
        }
    }
}

impl From<&AllocationConfig> for DiscoveryConfig {
    fn from(config: &AllocationConfig) -> Self {
        Self {
            interval: config.discovery_interval,
            probe_delay: config.discovery_probe_delay,
            workers: config.discovery_workers.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub probed: usize,
    pub promoted: usize,
}

pub struct DiscoveryService {
    repo: ProxyRepository,
    allocator: Arc<AllocationMachine>,
    prober: Arc<dyn Prober>,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(
        repo: ProxyRepository,
        allocator: Arc<AllocationMachine>,
        prober: Arc<dyn Prober>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            repo,
            allocator,
            prober,
            config,
        }
    }

    /// Run the discovery loop (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(
            "Starting discovery ({} workers, {}ms between probes)",
            self.config.workers,
            self.config.probe_delay.as_millis()
        );

        loop {
            let summary = self.discover_once(&mut shutdown).await;
            if summary.probed > 0 {
                debug!(
                    "Discovery pass: {} probed, {} promoted",
                    summary.probed, summary.promoted
                );
            }

            if !shutdown.pause(self.config.interval).await {
                break;
            }
        }

        info!("Discovery shutting down");
    }

    /// One pass over every Unknown endpoint in the store
    pub async fn discover_once(&self, shutdown: &mut ShutdownSignal) -> DiscoverySummary {
        let candidates = self.unknown_endpoints().await;
        if candidates.is_empty() || shutdown.is_shutdown() {
            return DiscoverySummary::default();
        }

        let mut pacing = interval(self.config.probe_delay.max(MIN_PACING));
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Shutdown stops feeding candidates; checks already in flight finish
        let outcomes: Vec<bool> = stream::iter(candidates)
            .zip(IntervalStream::new(pacing))
            .take_until(shutdown.recv())
            .map(|(endpoint, _)| self.probe_candidate(endpoint))
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        DiscoverySummary {
            probed: outcomes.len(),
            promoted: outcomes.iter().filter(|&&promoted| promoted).count(),
        }
    }

    async fn probe_candidate(&self, endpoint: String) -> bool {
        // Another loop may have claimed it while this one was queued
        if !self.allocator.is_unknown(&endpoint) {
            return false;
        }

        match self.prober.probe(&endpoint).await {
            Ok(report) => {
                let promoted = self.allocator.mark_available(&endpoint);
                if promoted {
                    debug!(
                        endpoint = %endpoint,
                        latency_ms = report.latency.as_millis() as u64,
                        "Endpoint available"
                    );
                }
                promoted
            }
            Err(e) => {
                debug!(endpoint = %endpoint, "Discovery probe failed: {}", e);
                false
            }
        }
    }

    async fn unknown_endpoints(&self) -> Vec<String> {
        let mut endpoints = Vec::new();
        for shard in self.repo.list_all_shards() {
            match self.repo.list_keys_for_shard(shard).await {
                Ok(keys) => endpoints.extend(
                    keys.into_iter()
                        .filter(|endpoint| self.allocator.is_unknown(endpoint)),
                ),
                Err(e) => warn!(shard, "Failed to list shard keys: {}", e),
            }
        }
        endpoints
    }
}
