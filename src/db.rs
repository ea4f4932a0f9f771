//! SQLite connection management.
//!
//! The catalog lives in a single SQLite file opened in WAL mode, so the HTTP
//! server can answer listing queries while an upload is being recorded.
//! Recording a package is one write transaction over several tables; other
//! writers wait up to `[db].busy_timeout_secs` for it instead of failing
//! with `SQLITE_BUSY`. The file and its parent directories are created on
//! first use.

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::time::Duration;

use crate::config::{Config, DbConfig};

/// Connection options for the catalog database.
pub fn connect_options(db: &DbConfig) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(&db.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(db.busy_timeout_secs))
}

/// Create a connection pool to the configured SQLite database.
///
/// # Errors
///
/// Returns an error if the database cannot be created or connected to.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db = &config.db;

    if let Some(parent) = db.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(db.max_connections)
        .connect_with(connect_options(db))
        .await
        .with_context(|| format!("Failed to open database {}", db.path.display()))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_applies_pragmas() {
        let tmp = TempDir::new().unwrap();
        let db = DbConfig {
            path: tmp.path().join("nested/dir/mag.sqlite"),
            busy_timeout_secs: 7,
            max_connections: 2,
        };
        std::fs::create_dir_all(db.path.parent().unwrap()).unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(db.max_connections)
            .connect_with(connect_options(&db))
            .await
            .unwrap();

        let timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(timeout, 7000);

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(db.path.is_file());
    }
}
