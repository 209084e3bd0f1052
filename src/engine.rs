//! Pool engine
//!
//! The operations exposed to the control surface, wired over the record
//! store, the allocation machine and the probe transport.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};

use crate::error::{PoolError, Result};
use crate::models::{PoolStatus, ProxyRecord};
use crate::proxy::allocation::AllocationMachine;
use crate::proxy::probe::Prober;
use crate::proxy::transport::ProxyEndpoint;
use crate::repository::ProxyRepository;

#[derive(Clone)]
pub struct PoolEngine {
    repo: ProxyRepository,
    allocator: Arc<AllocationMachine>,
    prober: Arc<dyn Prober>,
    started_at: Instant,
}

impl PoolEngine {
    pub fn new(
        repo: ProxyRepository,
        allocator: Arc<AllocationMachine>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            repo,
            allocator,
            prober,
            started_at: Instant::now(),
        }
    }

    pub fn repository(&self) -> &ProxyRepository {
        &self.repo
    }

    pub fn allocator(&self) -> &Arc<AllocationMachine> {
        &self.allocator
    }

    /// Validate and store an endpoint; repeated adds keep its counters
    #[instrument(skip(self))]
    pub async fn add_endpoint(&self, endpoint: &str) -> Result<String> {
        let (key, kind) = ProxyEndpoint::validate_key(endpoint)?;
        self.repo.add_endpoint(&key, kind, None).await?;
        info!(endpoint = %key, "Endpoint added");
        Ok(key)
    }

    /// Keys of one shard; see [`ProxyRepository::list_page`]
    pub async fn list_keys(&self, page: i64) -> Result<Vec<String>> {
        self.repo.list_page(page).await
    }

    /// Probe once; `"<status line>  ms:<latency>"` on success
    pub async fn check_once(&self, endpoint: &str) -> Result<String> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(PoolError::InvalidArgument(
                "endpoint must not be empty".to_string(),
            ));
        }
        let report = self.prober.inspect(endpoint).await?;
        Ok(report.summary())
    }

    /// Lease an Available endpoint; `None` when the pool is exhausted
    pub fn allocate(&self) -> Option<String> {
        self.allocator.allocate()
    }

    pub fn list_leased(&self) -> Vec<String> {
        self.allocator.list_leased()
    }

    pub fn list_available(&self) -> Vec<String> {
        self.allocator.list_available()
    }

    /// Return a lease early; the endpoint must be re-validated
    pub fn release(&self, endpoint: &str) -> Result<()> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(PoolError::InvalidArgument(
                "endpoint must not be empty".to_string(),
            ));
        }
        if self.allocator.release(endpoint) {
            Ok(())
        } else {
            Err(PoolError::NotFound(format!("{} is not leased", endpoint)))
        }
    }

    /// Full stored record
    pub async fn get_record(&self, endpoint: &str) -> Result<ProxyRecord> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(PoolError::InvalidArgument(
                "endpoint must not be empty".to_string(),
            ));
        }
        self.repo
            .get(endpoint)
            .await?
            .ok_or_else(|| PoolError::NotFound(format!("{} is not stored", endpoint)))
    }

    pub async fn status(&self) -> Result<PoolStatus> {
        let counts = self.allocator.counts();
        Ok(PoolStatus {
            uptime_secs: self.started_at.elapsed().as_secs(),
            stored: self.repo.count().await?,
            available: counts.available,
            leased: counts.leased,
            shards: self.repo.list_all_shards().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::proxy::probe::fake::FakeProber;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn engine(healthy: &[&str]) -> (TempDir, PoolEngine) {
        let dir = TempDir::new().unwrap();
        let repo = ProxyRepository::new(Database::open_blocking(dir.path()).unwrap());
        let engine = PoolEngine::new(
            repo,
            Arc::new(AllocationMachine::new()),
            Arc::new(FakeProber::new(healthy)),
        );
        (dir, engine)
    }

    /// Page whose shard holds `endpoint`
    fn page_of(engine: &PoolEngine, endpoint: &str) -> i64 {
        let shard = Database::shard_index(endpoint);
        engine
            .repository()
            .list_all_shards()
            .iter()
            .position(|&s| s == shard)
            .unwrap() as i64
    }

    #[tokio::test]
    async fn test_add_then_list_contains_endpoint_once() {
        let (_dir, engine) = engine(&[]);

        assert_ok!(engine.add_endpoint("10.0.0.1:3128").await);
        assert_ok!(engine.add_endpoint(" 10.0.0.1:3128 ").await);

        let keys = engine
            .list_keys(page_of(&engine, "10.0.0.1:3128"))
            .await
            .unwrap();
        assert_eq!(keys.iter().filter(|k| *k == "10.0.0.1:3128").count(), 1);
        assert_eq!(engine.status().await.unwrap().stored, 1);
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_endpoints() {
        let (_dir, engine) = engine(&[]);

        assert!(matches!(
            engine.add_endpoint("").await,
            Err(PoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.add_endpoint("gopher://1.2.3.4:70").await,
            Err(PoolError::UnsupportedProtocol(_))
        ));
        assert_eq!(engine.status().await.unwrap().stored, 0);
    }

    #[tokio::test]
    async fn test_list_keys_page_bounds() {
        let (_dir, engine) = engine(&[]);
        engine.add_endpoint("10.0.0.1:3128").await.unwrap();

        assert!(engine.list_keys(-1).await.unwrap().is_empty());
        assert_eq!(
            engine.list_keys(10_000).await.unwrap(),
            engine.list_keys(31).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_check_once_reports_outcome() {
        let (_dir, engine) = engine(&["good:1"]);

        let ok = engine.check_once("good:1").await.unwrap();
        assert!(ok.starts_with("HTTP/1.1 200 OK  ms:"));

        let failed = engine.check_once("bad:1").await.unwrap_err();
        assert!(matches!(failed, PoolError::ProbeFailed(_)));

        assert_err!(engine.check_once("  ").await);
    }

    #[tokio::test]
    async fn test_allocate_and_release() {
        let (_dir, engine) = engine(&[]);
        assert!(engine.allocate().is_none());

        engine.allocator().mark_available("a:1");
        engine.allocator().mark_available("b:1");

        let first = engine.allocate().unwrap();
        let second = engine.allocate().unwrap();
        assert_eq!(
            HashSet::from([first.clone(), second]),
            HashSet::from(["a:1".to_string(), "b:1".to_string()])
        );
        assert!(engine.list_available().is_empty());
        assert_eq!(engine.list_leased().len(), 2);

        assert_ok!(engine.release(&first));
        assert!(matches!(engine.release(&first), Err(PoolError::NotFound(_))));
        assert_eq!(engine.list_leased().len(), 1);
    }

    #[tokio::test]
    async fn test_get_record_not_found() {
        let (_dir, engine) = engine(&[]);
        assert!(engine.get_record("10.9.9.9:80").await.unwrap_err().is_not_found());

        engine.add_endpoint("10.9.9.9:80").await.unwrap();
        let record = engine.get_record("10.9.9.9:80").await.unwrap();
        assert_eq!(record.check_count, 0);
    }
}
