//! SQLite-backed [`CacheBackend`] implementation.
//!
//! Rows live in the `segment_cache` table created by
//! [`run_migrations`](crate::migrate::run_migrations). Values are opaque
//! to this layer; [`SegmentCache`](chapterloom_core::cache::SegmentCache)
//! owns their format.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use chapterloom_core::cache::CacheBackend;

/// Aggregate numbers for `cache stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: i64,
    pub total_bytes: i64,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

pub struct SqliteCacheBackend {
    pool: SqlitePool,
}

impl SqliteCacheBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM segment_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n, COALESCE(SUM(LENGTH(value)), 0) AS bytes, \
             MIN(created_at) AS oldest, MAX(created_at) AS newest FROM segment_cache",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            entries: row.get("n"),
            total_bytes: row.get("bytes"),
            oldest: row.get("oldest"),
            newest: row.get("newest"),
        })
    }

    /// Delete every entry. Returns the number of rows removed.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM segment_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheBackend for SqliteCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM segment_cache WHERE fingerprint = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO segment_cache (fingerprint, value, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM segment_cache WHERE fingerprint = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
