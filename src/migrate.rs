use anyhow::Result;

use crate::config::Config;
use crate::db;

/// Create the cache schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segment_cache (
            fingerprint TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_segment_cache_created_at ON segment_cache(created_at DESC)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    tracing::info!(path = %config.db.path.display(), "migrations applied");
    Ok(())
}
