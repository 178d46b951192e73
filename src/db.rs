//! SQLite connection setup for the segment cache.
//!
//! Every concurrent segment task of a run reads and writes the same cache
//! database. It is opened in WAL mode with a busy timeout, so a store that
//! hits a locked database waits instead of failing.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::config::Config;

/// Waiting time for a locked database before a cache write gives up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the cache database at `db.path`.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // A bare file name has an empty parent.
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create cache directory: {}", parent.display())
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open cache database: {}", db_path.display()))?;

    tracing::debug!(path = %db_path.display(), "cache database connected");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_creates_nested_dir_in_wal_mode() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = Config::minimal();
        cfg.db.path = tmp.path().join("nested/deeper/cache.sqlite");

        let pool = connect(&cfg).await.unwrap();
        assert!(cfg.db.path.exists());

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
