//! Health checking for stored proxies
//!
//! Sweeps every shard, probes every stored endpoint and persists the
//! outcome. Records past the failure threshold are evicted before probing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::HealthConfig;
use crate::error::{PoolError, Result};
use crate::lifecycle::ShutdownSignal;
use crate::proxy::probe::Prober;
use crate::repository::ProxyRepository;

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// Pause between consecutive probes
    pub probe_delay: Duration,
    /// Pause between full sweeps
    pub cycle_delay: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            probe_delay: Duration::from_secs(1),
            cycle_delay: Duration::from_secs(4),
        }
    }
}

impl From<&HealthConfig> for HealthCheckerConfig {
    fn from(config: &HealthConfig) -> Self {
        Self {
            probe_delay: config.probe_delay,
            cycle_delay: config.cycle_delay,
        }
    }
}

/// Result of checking a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Healthy,
    Unhealthy,
    Evicted,
    /// Record vanished between listing and lookup
    Missing,
}

/// Counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub healthy: usize,
    pub unhealthy: usize,
    pub evicted: usize,
    pub errors: usize,
    /// Sweep stopped early on shutdown
    pub interrupted: bool,
}

/// Health checker for stored proxies
pub struct HealthChecker {
    repo: ProxyRepository,
    prober: Arc<dyn Prober>,
    config: HealthCheckerConfig,
}

impl HealthChecker {
    pub fn new(
        repo: ProxyRepository,
        prober: Arc<dyn Prober>,
        config: HealthCheckerConfig,
    ) -> Self {
        Self {
            repo,
            prober,
            config,
        }
    }

    /// Run the health checker (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(
            "Starting health checker ({}ms between probes, {}s between sweeps)",
            self.config.probe_delay.as_millis(),
            self.config.cycle_delay.as_secs()
        );

        loop {
            let summary = self.sweep(&mut shutdown).await;
            info!(
                "Health sweep complete: {} healthy, {} unhealthy, {} evicted, {} errors",
                summary.healthy, summary.unhealthy, summary.evicted, summary.errors
            );

            if summary.interrupted || !shutdown.pause(self.config.cycle_delay).await {
                break;
            }
        }

        info!("Health checker shutting down");
    }

    /// One pass over every shard and every key
    pub async fn sweep(&self, shutdown: &mut ShutdownSignal) -> SweepSummary {
        let mut summary = SweepSummary::default();

        for shard in self.repo.list_all_shards() {
            let keys = match self.repo.list_keys_for_shard(shard).await {
                Ok(keys) => keys,
                Err(e) => {
                    error!(shard, "Failed to list shard keys: {}", e);
                    summary.errors += 1;
                    continue;
                }
            };

            for endpoint in keys {
                if shutdown.is_shutdown() {
                    summary.interrupted = true;
                    return summary;
                }

                match self.check_endpoint(&endpoint).await {
                    Ok(CheckOutcome::Healthy) => summary.healthy += 1,
                    Ok(CheckOutcome::Unhealthy) => summary.unhealthy += 1,
                    Ok(CheckOutcome::Evicted) => summary.evicted += 1,
                    Ok(CheckOutcome::Missing) => {}
                    Err(e) => {
                        warn!(endpoint = %endpoint, "Health check failed: {}", e);
                        summary.errors += 1;
                    }
                }

                if !shutdown.pause(self.config.probe_delay).await {
                    summary.interrupted = true;
                    return summary;
                }
            }
        }

        summary
    }

    /// Check one record and persist the result
    #[instrument(skip(self))]
    pub async fn check_endpoint(&self, endpoint: &str) -> Result<CheckOutcome> {
        let Some(mut record) = self.repo.get(endpoint).await? else {
            return Ok(CheckOutcome::Missing);
        };

        if record.exceeds_failure_threshold() {
            match self.repo.delete(endpoint).await {
                Ok(()) => info!(fail_count = record.fail_count, "Evicted failing proxy"),
                Err(PoolError::NotFound(_)) => debug!("Already evicted"),
                Err(e) => return Err(e),
            }
            return Ok(CheckOutcome::Evicted);
        }

        let outcome = match self.prober.probe(endpoint).await {
            Ok(report) => {
                debug!(latency_ms = report.latency.as_millis() as u64, "Proxy is healthy");
                record.record_success(report.latency, Utc::now());
                CheckOutcome::Healthy
            }
            Err(e) => {
                debug!(fail_count = record.fail_count + 1, "Proxy is unhealthy: {}", e);
                record.record_failure();
                CheckOutcome::Unhealthy
            }
        };

        self.repo.upsert(&record).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::lifecycle::Shutdown;
    use crate::models::ProxyRecord;
    use crate::proxy::probe::fake::FakeProber;
    use tempfile::TempDir;

    fn zero_delay() -> HealthCheckerConfig {
        HealthCheckerConfig {
            probe_delay: Duration::ZERO,
            cycle_delay: Duration::ZERO,
        }
    }

    async fn setup(healthy: &[&str]) -> (TempDir, ProxyRepository, Arc<FakeProber>, HealthChecker) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_blocking(dir.path()).unwrap();
        let repo = ProxyRepository::new(db);
        let prober = Arc::new(FakeProber::new(healthy));
        let checker = HealthChecker::new(repo.clone(), prober.clone(), zero_delay());
        (dir, repo, prober, checker)
    }

    #[tokio::test]
    async fn test_record_past_threshold_is_evicted_without_probe() {
        let (_dir, repo, prober, checker) = setup(&[]).await;

        let mut record = ProxyRecord::new("10.0.0.9:8080");
        record.fail_count = 6;
        repo.upsert(&record).await.unwrap();

        let shutdown = Shutdown::new();
        let summary = checker.sweep(&mut shutdown.subscribe()).await;

        assert_eq!(summary.evicted, 1);
        assert_eq!(prober.calls(), 0);
        assert!(repo.get("10.0.0.9:8080").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failures_increment_and_success_resets() {
        let (_dir, repo, _prober, checker) = setup(&["good:1"]).await;

        let mut good = ProxyRecord::new("good:1");
        good.fail_count = 3;
        repo.upsert(&good).await.unwrap();
        repo.upsert(&ProxyRecord::new("bad:1")).await.unwrap();

        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        checker.sweep(&mut signal).await;
        checker.sweep(&mut signal).await;

        let good = repo.get("good:1").await.unwrap().unwrap();
        assert_eq!(good.fail_count, 0);
        assert_eq!(good.check_count, 2);
        assert_eq!(good.last_latency_ms, Some(42));
        assert!(good.last_checked_at.is_some());

        let bad = repo.get("bad:1").await.unwrap().unwrap();
        assert_eq!(bad.fail_count, 2);
        assert_eq!(bad.check_count, 0);
        assert!(bad.last_checked_at.is_none());
        assert!(bad.last_latency_ms.is_none());
    }

    #[tokio::test]
    async fn test_repeated_failures_lead_to_eviction() {
        let (_dir, repo, prober, checker) = setup(&[]).await;
        repo.upsert(&ProxyRecord::new("dead:1")).await.unwrap();

        for _ in 0..6 {
            assert_eq!(
                checker.check_endpoint("dead:1").await.unwrap(),
                CheckOutcome::Unhealthy
            );
        }
        assert_eq!(
            checker.check_endpoint("dead:1").await.unwrap(),
            CheckOutcome::Evicted
        );
        assert_eq!(prober.calls(), 6);
        assert_eq!(
            checker.check_endpoint("dead:1").await.unwrap(),
            CheckOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_sweep_stops_on_shutdown() {
        let (_dir, repo, prober, checker) = setup(&[]).await;
        repo.upsert(&ProxyRecord::new("a:1")).await.unwrap();

        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        shutdown.trigger();

        let summary = checker.sweep(&mut signal).await;
        assert!(summary.interrupted);
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_closed_shard() {
        let (_dir, repo, prober, checker) = setup(&[]).await;

        let lost = "10.0.0.1:8080";
        let kept = (2..64)
            .map(|i| format!("10.0.0.{}:8080", i))
            .find(|e| Database::shard_index(e) != Database::shard_index(lost))
            .unwrap();
        repo.upsert(&ProxyRecord::new(lost)).await.unwrap();
        repo.upsert(&ProxyRecord::new(kept.as_str())).await.unwrap();
        prober.set_healthy(&kept, true);

        repo.database()
            .shard(Database::shard_index(lost))
            .unwrap()
            .close();

        let shutdown = Shutdown::new();
        let summary = checker.sweep(&mut shutdown.subscribe()).await;

        assert!(summary.errors >= 1);
        assert!(!summary.interrupted);
        assert_eq!(summary.healthy, 1);
        assert_eq!(prober.calls(), 1);

        let stored = repo.get(&kept).await.unwrap().unwrap();
        assert_eq!(stored.check_count, 1);
        assert_eq!(stored.last_latency_ms, Some(42));
    }
}
