//! Availability audit
//!
//! Re-validates Available endpoints on a fixed cadence and discards the
//! ones that fail every attempt, so `allocate` keeps handing out live
//! proxies between discovery passes.

use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument};

use super::revalidation::{revalidate, Revalidation, RevalidationPolicy};
use crate::config::AllocationConfig;
use crate::lifecycle::ShutdownSignal;
use crate::proxy::allocation::AllocationMachine;
use crate::proxy::probe::Prober;

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub interval: Duration,
    pub policy: RevalidationPolicy,
    pub workers: usize,
}

impl From<&AllocationConfig> for AuditConfig {
    fn from(config: &AllocationConfig) -> Self {
        Self {
            interval: config.reclaim_interval,
            policy: RevalidationPolicy::from(config),
            workers: config.discovery_workers.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditSummary {
    pub checked: usize,
    pub discarded: usize,
}

pub struct AvailabilityAudit {
    allocator: Arc<AllocationMachine>,
    prober: Arc<dyn Prober>,
    config: AuditConfig,
}

impl AvailabilityAudit {
    pub fn new(
        allocator: Arc<AllocationMachine>,
        prober: Arc<dyn Prober>,
        config: AuditConfig,
    ) -> Self {
        Self {
            allocator,
            prober,
            config,
        }
    }

    /// Run the audit loop (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(
            "Starting availability audit (interval: {}s)",
            self.config.interval.as_secs()
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            let summary = self.audit_once(&shutdown).await;
            if summary.discarded > 0 {
                info!(
                    "Audit discarded {} of {} available endpoints",
                    summary.discarded, summary.checked
                );
            }
        }

        info!("Availability audit shutting down");
    }

    /// Re-validate every currently Available endpoint once
    pub async fn audit_once(&self, shutdown: &ShutdownSignal) -> AuditSummary {
        let available = self.allocator.list_available();
        let checked = available.len();

        let discarded = stream::iter(available)
            .map(|endpoint| {
                let mut signal = shutdown.clone();
                async move {
                    let verdict =
                        revalidate(self.prober.as_ref(), &endpoint, self.config.policy, &mut signal)
                            .await;
                    match verdict {
                        Revalidation::Failed { last_error, .. } => {
                            // No-op when it was leased in the meantime
                            let discarded = self.allocator.discard(&endpoint);
                            if discarded {
                                debug!(endpoint = %endpoint, "Discarded stale endpoint: {}", last_error);
                            }
                            discarded
                        }
                        Revalidation::Passed(_) | Revalidation::Cancelled => false,
                    }
                }
            })
            .buffer_unordered(self.config.workers.max(1))
            .filter(|discarded| futures::future::ready(*discarded))
            .count()
            .await;

        AuditSummary { checked, discarded }
    }
}
