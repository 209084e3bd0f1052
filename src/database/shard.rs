//! A single durable shard of the record store
//!
//! Each shard owns one SQLite connection for the lifetime of the process.
//! Calls are serialized on the connection mutex and executed on the blocking
//! pool, so shards never contend with each other.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, warn};

use super::migrations;
use crate::error::{PoolError, Result};

/// Handle to one shard database
#[derive(Clone)]
pub struct Shard {
    index: usize,
    path: PathBuf,
    /// `None` once the shard has been closed
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Shard {
    /// Open (creating if needed) the shard database at `path`
    pub fn open(index: usize, path: PathBuf) -> Result<Self> {
        let conn = Connection::open(&path).map_err(|e| {
            PoolError::StoreUnavailable(format!(
                "failed to open shard {} at {}: {}",
                index,
                path.display(),
                e
            ))
        })?;

        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        migrations::run_migrations(&conn)?;

        debug!(shard = index, path = %path.display(), journal_mode = %mode, "Shard opened");

        Ok(Self {
            index,
            path,
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the shard connection on the blocking pool
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let index = self.index;

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            match guard.as_ref() {
                Some(conn) => f(conn),
                None => Err(PoolError::StoreUnavailable(format!(
                    "shard {} is closed",
                    index
                ))),
            }
        })
        .await?
    }

    /// Release the connection; later calls fail with `StoreUnavailable`
    pub fn close(&self) {
        let Some(conn) = self.conn.lock().take() else {
            return;
        };

        if let Err((_, e)) = conn.close() {
            warn!(shard = self.index, "Failed to close shard cleanly: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("index", &self.index)
            .field("path", &self.path)
            .finish()
    }
}
