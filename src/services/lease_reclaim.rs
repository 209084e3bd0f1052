//! Lease reclaim loop
//!
//! Expired leases are removed from Leased and re-validated before the
//! endpoint may be Available again. Endpoints that keep failing stay
//! Unknown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{stream, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument};

use super::revalidation::{revalidate, Revalidation, RevalidationPolicy};
use crate::config::AllocationConfig;
use crate::lifecycle::ShutdownSignal;
use crate::proxy::allocation::AllocationMachine;
use crate::proxy::probe::Prober;

#[derive(Debug, Clone)]
pub struct LeaseReclaimConfig {
    /// How often to scan Leased
    pub interval: Duration,
    /// Leases older than this are reclaimed
    pub lease_timeout: Duration,
    pub policy: RevalidationPolicy,
    /// Re-validations in flight at once
    pub workers: usize,
}

impl Default for LeaseReclaimConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(4),
            lease_timeout: Duration::from_secs(120),
            policy: RevalidationPolicy::default(),
            workers: 8,
        }
    }
}

impl From<&AllocationConfig> for LeaseReclaimConfig {
    fn from(config: &AllocationConfig) -> Self {
        Self {
            interval: config.reclaim_interval,
            lease_timeout: config.lease_timeout,
            policy: RevalidationPolicy::from(config),
            workers: config.discovery_workers.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimSummary {
    pub reclaimed: usize,
    pub restored: usize,
    pub dropped: usize,
}

pub struct LeaseReclaimer {
    allocator: Arc<AllocationMachine>,
    prober: Arc<dyn Prober>,
    config: LeaseReclaimConfig,
}

impl LeaseReclaimer {
    pub fn new(
        allocator: Arc<AllocationMachine>,
        prober: Arc<dyn Prober>,
        config: LeaseReclaimConfig,
    ) -> Self {
        Self {
            allocator,
            prober,
            config,
        }
    }

    /// Run the reclaim loop (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(
            "Starting lease reclaimer (timeout: {}s, interval: {}s)",
            self.config.lease_timeout.as_secs(),
            self.config.interval.as_secs()
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            let summary = self.reclaim_once(&shutdown).await;
            if summary.reclaimed > 0 {
                info!(
                    "Reclaimed {} leases: {} restored, {} dropped",
                    summary.reclaimed, summary.restored, summary.dropped
                );
            }
        }

        info!("Lease reclaimer shutting down");
    }

    /// Reclaim expired leases and re-validate them
    pub async fn reclaim_once(&self, shutdown: &ShutdownSignal) -> ReclaimSummary {
        let reclaimed = self
            .allocator
            .reclaim_expired(Utc::now(), self.config.lease_timeout);

        let mut summary = ReclaimSummary {
            reclaimed: reclaimed.len(),
            ..Default::default()
        };
        if reclaimed.is_empty() {
            return summary;
        }

        let verdicts: Vec<bool> = stream::iter(reclaimed)
            .map(|endpoint| {
                let mut signal = shutdown.clone();
                async move {
                    match revalidate(self.prober.as_ref(), &endpoint, self.config.policy, &mut signal)
                        .await
                    {
                        Revalidation::Passed(_) => self.allocator.mark_available(&endpoint),
                        Revalidation::Failed { attempts, last_error } => {
                            debug!(
                                endpoint = %endpoint,
                                attempts,
                                "Dropped reclaimed endpoint: {}",
                                last_error
                            );
                            false
                        }
                        Revalidation::Cancelled => false,
                    }
                }
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        summary.restored = verdicts.iter().filter(|&&restored| restored).count();
        summary.dropped = summary.reclaimed - summary.restored;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::proxy::probe::fake::FakeProber;

    fn reclaimer(healthy: &[&str]) -> (Arc<AllocationMachine>, Arc<FakeProber>, LeaseReclaimer) {
        let allocator = Arc::new(AllocationMachine::new());
        let prober = Arc::new(FakeProber::new(healthy));
        let config = LeaseReclaimConfig {
            interval: Duration::from_millis(10),
            lease_timeout: Duration::from_secs(120),
            policy: RevalidationPolicy {
                attempts: 5,
                delay: Duration::ZERO,
            },
            workers: 2,
        };
        let reclaimer = LeaseReclaimer::new(allocator.clone(), prober.clone(), config);
        (allocator, prober, reclaimer)
    }

    fn lease_at(allocator: &AllocationMachine, endpoint: &str, age_secs: i64) {
        allocator.mark_available(endpoint);
        let granted = allocator
            .allocate_at(Utc::now() - chrono::Duration::seconds(age_secs))
            .unwrap();
        assert_eq!(granted, endpoint);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed_and_revalidated() {
        let (allocator, prober, reclaimer) = reclaimer(&["old:1"]);
        lease_at(&allocator, "old:1", 121);
        lease_at(&allocator, "fresh:1", 5);

        let shutdown = Shutdown::new();
        let summary = reclaimer.reclaim_once(&shutdown.subscribe()).await;

        assert_eq!(
            summary,
            ReclaimSummary {
                reclaimed: 1,
                restored: 1,
                dropped: 0
            }
        );
        assert_eq!(allocator.list_leased(), vec!["fresh:1".to_string()]);
        assert_eq!(allocator.list_available(), vec!["old:1".to_string()]);
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_reclaimed_endpoint_is_dropped() {
        let (allocator, prober, reclaimer) = reclaimer(&[]);
        lease_at(&allocator, "dead:1", 300);

        let shutdown = Shutdown::new();
        let summary = reclaimer.reclaim_once(&shutdown.subscribe()).await;

        assert_eq!(summary.dropped, 1);
        assert!(allocator.is_unknown("dead:1"));
        assert_eq!(prober.calls(), 5);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let (allocator, _prober, reclaimer) = reclaimer(&[]);
        lease_at(&allocator, "old:1", 121);

        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        let handle = tokio::spawn(async move { reclaimer.run(signal).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(allocator.list_leased().is_empty());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
