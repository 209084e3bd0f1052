//! Bounded re-validation shared by the reclaim and audit loops

use std::time::Duration;

use tracing::debug;

use crate::config::AllocationConfig;
use crate::error::PoolError;
use crate::lifecycle::ShutdownSignal;
use crate::proxy::probe::{ProbeReport, Prober};

/// How many probes an endpoint gets and how far apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevalidationPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RevalidationPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl From<&AllocationConfig> for RevalidationPolicy {
    fn from(config: &AllocationConfig) -> Self {
        Self {
            attempts: config.revalidate_attempts.max(1),
            delay: config.revalidate_delay,
        }
    }
}

#[derive(Debug)]
pub enum Revalidation {
    Passed(ProbeReport),
    /// Every attempt failed
    Failed { attempts: u32, last_error: PoolError },
    /// Shutdown arrived before a verdict
    Cancelled,
}

impl Revalidation {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed(_))
    }
}

/// Probe `endpoint` until one attempt succeeds or the policy runs out
pub async fn revalidate(
    prober: &dyn Prober,
    endpoint: &str,
    policy: RevalidationPolicy,
    shutdown: &mut ShutdownSignal,
) -> Revalidation {
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if shutdown.is_shutdown() {
            return Revalidation::Cancelled;
        }

        match prober.probe(endpoint).await {
            Ok(report) => return Revalidation::Passed(report),
            Err(e) => {
                debug!(endpoint, attempt, "Re-validation attempt failed: {}", e);
                last_error = Some(e);
            }
        }

        if attempt < attempts && !shutdown.pause(policy.delay).await {
            return Revalidation::Cancelled;
        }
    }

    Revalidation::Failed {
        attempts,
        last_error: last_error
            .unwrap_or_else(|| PoolError::Internal("no attempt was made".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::proxy::probe::fake::FakeProber;

    fn policy(attempts: u32) -> RevalidationPolicy {
        RevalidationPolicy {
            attempts,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_passes_on_first_success() {
        let prober = FakeProber::new(&["a:1"]);
        let shutdown = Shutdown::new();

        let verdict = revalidate(&prober, "a:1", policy(5), &mut shutdown.subscribe()).await;
        assert!(verdict.passed());
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn test_fails_after_all_attempts() {
        let prober = FakeProber::new(&[]);
        let shutdown = Shutdown::new();

        let verdict = revalidate(&prober, "a:1", policy(5), &mut shutdown.subscribe()).await;
        assert!(matches!(
            verdict,
            Revalidation::Failed {
                attempts: 5,
                last_error: PoolError::ProbeFailed(_)
            }
        ));
        assert_eq!(prober.calls(), 5);
    }

    #[tokio::test]
    async fn test_cancelled_by_shutdown() {
        let prober = FakeProber::new(&[]);
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        shutdown.trigger();

        let verdict = revalidate(&prober, "a:1", policy(5), &mut signal).await;
        assert!(matches!(verdict, Revalidation::Cancelled));
        assert_eq!(prober.calls(), 0);
    }
}
