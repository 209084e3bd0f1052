use crate::error::Result;
use rusqlite::{params, Connection};
use tracing::{debug, info};

/// Run all schema migrations against one shard
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Create migrations table if not exists
    create_migrations_table(conn)?;

    for (version, name, sql) in get_migrations() {
        if !is_migration_applied(conn, version)? {
            info!(version = version, name = name, "Applying migration");

            conn.execute_batch(sql)?;
            record_migration(conn, version, name)?;

            debug!(version = version, name = name, "Migration applied");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
fn create_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        [],
    )?;

    Ok(())
}

/// Check if a migration has been applied
fn is_migration_applied(conn: &Connection, version: i32) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
        params![version],
        |row| row.get(0),
    )?;

    Ok(count > 0)
}

/// Record that a migration has been applied
fn record_migration(conn: &Connection, version: i32, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
        params![version, name],
    )?;

    Ok(())
}

/// All migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![(
        1,
        "create_proxies",
        r#"
        CREATE TABLE IF NOT EXISTS proxies (
            endpoint TEXT PRIMARY KEY NOT NULL,
            kind TEXT,
            source TEXT,
            last_checked_at TEXT,
            last_latency_ms INTEGER,
            check_count INTEGER NOT NULL DEFAULT 0,
            fail_count INTEGER NOT NULL DEFAULT 0
        ) WITHOUT ROWID;
        "#,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, get_migrations().len() as i64);

        let proxies: i64 = conn
            .query_row("SELECT COUNT(*) FROM proxies", [], |row| row.get(0))
            .unwrap();
        assert_eq!(proxies, 0);
    }
}
