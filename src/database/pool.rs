use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::info;

use super::shard::Shard;
use crate::config::StoreConfig;
use crate::error::{PoolError, Result};

/// Number of shards the record store is partitioned into
pub const SHARD_COUNT: usize = 32;

/// Sharded record store: one long-lived SQLite handle per shard
#[derive(Clone)]
pub struct Database {
    root: PathBuf,
    shards: Arc<Vec<Shard>>,
}

impl Database {
    /// Open every shard under the configured data directory
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let root = config.data_dir.clone();

        info!(data_dir = %root.display(), shards = SHARD_COUNT, "Opening record store");

        let db = tokio::task::spawn_blocking(move || Self::open_blocking(&root)).await??;

        info!("Record store ready");
        Ok(db)
    }

    /// Open every shard synchronously
    pub fn open_blocking(root: &Path) -> Result<Self> {
        if root.as_os_str().is_empty() {
            return Err(PoolError::InvalidArgument(
                "data directory must not be empty".to_string(),
            ));
        }

        std::fs::create_dir_all(root).map_err(|e| {
            PoolError::StoreUnavailable(format!(
                "failed to create data directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let shards = (0..SHARD_COUNT)
            .map(|index| Shard::open(index, Self::shard_path(root, index)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            root: root.to_path_buf(),
            shards: Arc::new(shards),
        })
    }

    /// Deterministic on-disk location of a shard
    pub fn shard_path(root: &Path, index: usize) -> PathBuf {
        root.join(format!("shard-{:02}.db", index))
    }

    /// Stable shard index for an endpoint
    pub fn shard_index(endpoint: &str) -> usize {
        let digest = Sha256::digest(endpoint.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % SHARD_COUNT as u64) as usize
    }

    /// The shard an endpoint is routed to
    pub fn shard_for(&self, endpoint: &str) -> &Shard {
        &self.shards[Self::shard_index(endpoint)]
    }

    pub fn shard(&self, index: usize) -> Option<&Shard> {
        self.shards.get(index)
    }

    /// Shard indices, highest first
    pub fn shard_ids(&self) -> Vec<usize> {
        (0..self.shards.len()).rev().collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that every shard answers a trivial query
    pub async fn health_check(&self) -> Result<Duration> {
        let start = Instant::now();

        for shard in self.shards.iter() {
            shard
                .call(|conn| {
                    conn.query_row("SELECT 1", [], |_| Ok(()))?;
                    Ok(())
                })
                .await?;
        }

        Ok(start.elapsed())
    }

    /// Close every shard handle
    pub async fn close(&self) {
        info!("Closing record store");

        let shards = Arc::clone(&self.shards);
        let _ = tokio::task::spawn_blocking(move || {
            for shard in shards.iter() {
                shard.close();
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_index_is_stable_and_in_range() {
        let a = Database::shard_index("1.2.3.4:8080");
        assert_eq!(a, Database::shard_index("1.2.3.4:8080"));
        assert!(a < SHARD_COUNT);

        let spread: std::collections::HashSet<usize> = (0..500)
            .map(|i| Database::shard_index(&format!("10.0.{}.{}:3128", i / 256, i % 256)))
            .collect();
        assert!(spread.len() > SHARD_COUNT / 2);
    }

    #[test]
    fn test_shard_path_format() {
        let path = Database::shard_path(Path::new("/var/lib/freepool"), 7);
        assert_eq!(path, PathBuf::from("/var/lib/freepool/shard-07.db"));
    }

    #[tokio::test]
    async fn test_open_creates_every_shard() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            data_dir: dir.path().join("data"),
        };

        let db = Database::new(&config).await.unwrap();

        for index in 0..SHARD_COUNT {
            assert!(Database::shard_path(db.root(), index).exists());
        }
        assert_eq!(db.shard_ids().first(), Some(&(SHARD_COUNT - 1)));
        assert_eq!(db.shard_ids().last(), Some(&0));
        assert!(db.shard(SHARD_COUNT).is_none());

        db.health_check().await.unwrap();
        db.close().await;
        assert!(db.health_check().await.is_err());
    }

    #[test]
    fn test_empty_root_rejected() {
        let err = Database::open_blocking(Path::new("")).err().unwrap();
        assert!(matches!(err, PoolError::InvalidArgument(_)));
    }
}
