//! `cache stats` and `cache clear`.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::migrate::run_migrations;
use crate::sqlite_cache::SqliteCacheBackend;

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

async fn open(cfg: &Config) -> Result<SqliteCacheBackend> {
    run_migrations(cfg).await?;
    Ok(SqliteCacheBackend::new(db::connect(cfg).await?))
}

pub async fn run_stats(cfg: &Config) -> Result<()> {
    let stats = open(cfg).await?.stats().await?;

    println!("Cache: {}", cfg.db.path.display());
    println!("  entries:  {}", stats.entries);
    println!("  bytes:    {}", stats.total_bytes);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!("  oldest:   {}", format_ts_iso(oldest));
        println!("  newest:   {}", format_ts_iso(newest));
    }
    Ok(())
}

pub async fn run_clear(cfg: &Config) -> Result<()> {
    let removed = open(cfg).await?.clear().await?;
    tracing::info!(removed, "cache cleared");
    println!("Removed {} cache entries.", removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_ts_iso(1_700_000_000), "2023-11-14T22:13:20Z");
    }
}
