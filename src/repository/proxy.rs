use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::database::{Database, Shard};
use crate::error::{PoolError, Result};
use crate::models::{ProxyProtocol, ProxyRecord};

const RECORD_COLUMNS: &str = "endpoint, kind, source, last_checked_at, last_latency_ms, \
                              check_count, fail_count";

/// Repository for proxy record operations across all shards
#[derive(Clone)]
pub struct ProxyRepository {
    db: Database,
}

impl ProxyRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Write a record, creating or overwriting it
    pub async fn upsert(&self, record: &ProxyRecord) -> Result<()> {
        let shard = self.shard_for(&record.endpoint)?;
        let record = record.clone();

        shard
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO proxies (endpoint, kind, source, last_checked_at,
                                         last_latency_ms, check_count, fail_count)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(endpoint) DO UPDATE SET
                        kind = excluded.kind,
                        source = excluded.source,
                        last_checked_at = excluded.last_checked_at,
                        last_latency_ms = excluded.last_latency_ms,
                        check_count = excluded.check_count,
                        fail_count = excluded.fail_count
                    "#,
                    params![
                        record.endpoint,
                        record.kind.map(|k| k.as_str()),
                        record.source,
                        record.last_checked_at,
                        record.last_latency_ms.map(|ms| ms as i64),
                        record.check_count as i64,
                        record.fail_count as i64,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(shard = shard.index(), "Upserted record");
        Ok(())
    }

    /// Point lookup; `None` when the endpoint is not stored
    pub async fn get(&self, endpoint: &str) -> Result<Option<ProxyRecord>> {
        let shard = self.shard_for(endpoint)?;
        let endpoint = endpoint.to_string();

        shard
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("SELECT {} FROM proxies WHERE endpoint = ?1", RECORD_COLUMNS),
                        params![endpoint],
                        row_to_record,
                    )
                    .optional()?;
                Ok(record)
            })
            .await
    }

    /// Remove a record; `NotFound` if it does not exist
    pub async fn delete(&self, endpoint: &str) -> Result<()> {
        let shard = self.shard_for(endpoint)?;
        let key = endpoint.to_string();

        let removed = shard
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM proxies WHERE endpoint = ?1", params![key])?)
            })
            .await?;

        if removed == 0 {
            return Err(PoolError::NotFound(format!("endpoint {} is not stored", endpoint)));
        }

        info!(endpoint = %endpoint, shard = shard.index(), "Deleted record");
        Ok(())
    }

    /// Insert a new endpoint or refresh its origin tags
    ///
    /// Check metadata of an existing record is left untouched.
    pub async fn add_endpoint(
        &self,
        endpoint: &str,
        kind: Option<ProxyProtocol>,
        source: Option<&str>,
    ) -> Result<()> {
        let shard = self.shard_for(endpoint)?;
        let endpoint = endpoint.to_string();
        let source = source.map(str::to_string);

        shard
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO proxies (endpoint, kind, source, check_count, fail_count)
                    VALUES (?1, ?2, ?3, 0, 0)
                    ON CONFLICT(endpoint) DO UPDATE SET
                        kind = COALESCE(excluded.kind, proxies.kind),
                        source = COALESCE(excluded.source, proxies.source)
                    "#,
                    params![endpoint, kind.map(|k| k.as_str()), source],
                )?;
                Ok(())
            })
            .await
    }

    /// Shard indices in listing order (descending)
    pub fn list_all_shards(&self) -> Vec<usize> {
        self.db.shard_ids()
    }

    /// Every endpoint key stored in one shard, without loading records
    pub async fn list_keys_for_shard(&self, shard: usize) -> Result<Vec<String>> {
        let shard = self.db.shard(shard).ok_or_else(|| {
            PoolError::InvalidArgument(format!("shard {} does not exist", shard))
        })?;

        shard.call(select_keys).await
    }

    /// Keys of the shard at position `page` in descending shard order
    ///
    /// Pages past the end clamp to the last shard; negative pages are empty.
    pub async fn list_page(&self, page: i64) -> Result<Vec<String>> {
        if page < 0 {
            return Ok(Vec::new());
        }

        let shards = self.list_all_shards();
        let Some(last) = shards.len().checked_sub(1) else {
            return Ok(Vec::new());
        };

        let position = usize::try_from(page).unwrap_or(usize::MAX).min(last);
        self.list_keys_for_shard(shards[position]).await
    }

    /// Total number of stored records
    pub async fn count(&self) -> Result<u64> {
        let mut total = 0u64;
        for index in self.list_all_shards() {
            let Some(shard) = self.db.shard(index) else {
                continue;
            };
            let count: i64 = shard
                .call(|conn| {
                    Ok(conn.query_row("SELECT COUNT(*) FROM proxies", [], |row| row.get(0))?)
                })
                .await?;
            total += count as u64;
        }
        Ok(total)
    }

    fn shard_for(&self, endpoint: &str) -> Result<&Shard> {
        if endpoint.is_empty() {
            return Err(PoolError::InvalidArgument(
                "endpoint must not be empty".to_string(),
            ));
        }
        Ok(self.db.shard_for(endpoint))
    }
}

fn select_keys(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT endpoint FROM proxies ORDER BY endpoint")?;
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(keys)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ProxyRecord> {
    let kind: Option<String> = row.get(1)?;
    let latency: Option<i64> = row.get(4)?;
    let check_count: i64 = row.get(5)?;
    let fail_count: i64 = row.get(6)?;

    Ok(ProxyRecord {
        endpoint: row.get(0)?,
        kind: kind.as_deref().and_then(ProxyProtocol::from_str),
        source: row.get(2)?,
        last_checked_at: row.get(3)?,
        last_latency_ms: latency.map(|ms| ms.max(0) as u64),
        check_count: check_count.max(0) as u64,
        fail_count: fail_count.clamp(0, u32::MAX as i64) as u32,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::config::StoreConfig;
    use crate::database::SHARD_COUNT;

    async fn test_repo() -> (ProxyRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&StoreConfig {
            data_dir: dir.path().to_path_buf(),
        })
        .await
        .unwrap();
        (ProxyRepository::new(db), dir)
    }

    fn page_of(endpoint: &str, repo: &ProxyRepository) -> i64 {
        let shard = Database::shard_index(endpoint);
        repo.list_all_shards()
            .iter()
            .position(|&s| s == shard)
            .unwrap() as i64
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let (repo, _dir) = test_repo().await;
        assert!(repo.get("1.2.3.4:8080").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_then_get_roundtrips_metadata() {
        let (repo, _dir) = test_repo().await;

        let mut record = ProxyRecord::new("1.2.3.4:8080")
            .with_source("zdopen")
            .with_kind(ProxyProtocol::Socks5);
        record.record_success(Duration::from_millis(42), Utc::now());
        record.record_failure();

        repo.upsert(&record).await.unwrap();
        let stored = repo.get("1.2.3.4:8080").await.unwrap().unwrap();

        assert_eq!(stored.endpoint, record.endpoint);
        assert_eq!(stored.kind, Some(ProxyProtocol::Socks5));
        assert_eq!(stored.source.as_deref(), Some("zdopen"));
        assert_eq!(stored.last_latency_ms, Some(42));
        assert_eq!(stored.check_count, 1);
        assert_eq!(stored.fail_count, 1);
        assert!(stored.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let (repo, _dir) = test_repo().await;

        let mut record = ProxyRecord::new("5.6.7.8:3128");
        repo.upsert(&record).await.unwrap();

        record.fail_count = 4;
        repo.upsert(&record).await.unwrap();

        let stored = repo.get("5.6.7.8:3128").await.unwrap().unwrap();
        assert_eq!(stored.fail_count, 4);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_endpoint_twice_preserves_counters() {
        let (repo, _dir) = test_repo().await;

        repo.add_endpoint("1.2.3.4:8080", None, None).await.unwrap();

        let mut record = repo.get("1.2.3.4:8080").await.unwrap().unwrap();
        record.check_count = 9;
        record.fail_count = 2;
        repo.upsert(&record).await.unwrap();

        repo.add_endpoint("1.2.3.4:8080", None, Some("api"))
            .await
            .unwrap();

        let stored = repo.get("1.2.3.4:8080").await.unwrap().unwrap();
        assert_eq!(stored.check_count, 9);
        assert_eq!(stored.fail_count, 2);
        assert_eq!(stored.source.as_deref(), Some("api"));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (repo, _dir) = test_repo().await;

        let err = repo.delete("9.9.9.9:1").await.unwrap_err();
        assert!(err.is_not_found());

        repo.add_endpoint("9.9.9.9:1", None, None).await.unwrap();
        assert_ok!(repo.delete("9.9.9.9:1").await);
        assert!(repo.get("9.9.9.9:1").await.unwrap().is_none());
        assert_err!(repo.delete("9.9.9.9:1").await);
    }

    #[tokio::test]
    async fn test_empty_key_is_invalid_argument() {
        let (repo, _dir) = test_repo().await;

        assert!(matches!(
            repo.get("").await,
            Err(PoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            repo.delete("").await,
            Err(PoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            repo.list_keys_for_shard(SHARD_COUNT).await,
            Err(PoolError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_list_page_finds_added_endpoint_once() {
        let (repo, _dir) = test_repo().await;

        repo.add_endpoint("10.0.0.1:3128", None, None).await.unwrap();
        repo.add_endpoint("10.0.0.1:3128", None, None).await.unwrap();

        let page = page_of("10.0.0.1:3128", &repo);
        let keys = repo.list_page(page).await.unwrap();
        assert_eq!(
            keys.iter().filter(|k| k.as_str() == "10.0.0.1:3128").count(),
            1
        );

        // the same endpoint is not visible on any other page
        for other in 0..SHARD_COUNT as i64 {
            if other != page {
                assert!(!repo
                    .list_page(other)
                    .await
                    .unwrap()
                    .contains(&"10.0.0.1:3128".to_string()));
            }
        }
    }

    #[tokio::test]
    async fn test_list_page_clamps_and_rejects_negative() {
        let (repo, _dir) = test_repo().await;

        for i in 0..64 {
            repo.add_endpoint(&format!("172.16.0.{}:8080", i), None, None)
                .await
                .unwrap();
        }

        let last = repo.list_page(SHARD_COUNT as i64 - 1).await.unwrap();
        assert_eq!(repo.list_page(SHARD_COUNT as i64).await.unwrap(), last);
        assert_eq!(repo.list_page(i64::MAX).await.unwrap(), last);
        assert!(repo.list_page(-1).await.unwrap().is_empty());

        let mut all = Vec::new();
        for page in 0..SHARD_COUNT as i64 {
            let keys = repo.list_page(page).await.unwrap();
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(keys, sorted);
            all.extend(keys);
        }
        assert_eq!(all.len(), 64);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            data_dir: dir.path().to_path_buf(),
        };

        {
            let db = Database::new(&config).await.unwrap();
            let repo = ProxyRepository::new(db.clone());
            let mut record = ProxyRecord::new("8.8.4.4:1080");
            record.record_failure();
            repo.upsert(&record).await.unwrap();
            db.close().await;
        }

        let repo = ProxyRepository::new(Database::new(&config).await.unwrap());
        let stored = repo.get("8.8.4.4:1080").await.unwrap().unwrap();
        assert_eq!(stored.fail_count, 1);
    }
}
