//! Segment cache: fingerprint → previously transformed text.
//!
//! [`SegmentCache`] implements the pipeline's cache discipline on top of a
//! pluggable [`CacheBackend`] that only needs get/set/delete. Entries are
//! stored as JSON [`CacheEntry`] records so the backend never has to know
//! their shape.
//!
//! # Guarantees
//!
//! - `store` is idempotent: writing the value already stored is skipped.
//! - After `invalidate(fp)`, `lookup(fp)` misses until the next `store`.
//! - Unreadable entries and backend failures during lookup are a miss, never
//!   a pipeline error. Corrupt entries are deleted.
//! - Racing stores for one fingerprint are last-write-wins.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable key-value storage behind the segment cache.
///
/// Implementations must be `Send + Sync`; the dispatcher calls them from
/// concurrent tasks. No ordering guarantees are required.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](CacheBackend::get) | Read the raw value for a key |
/// | [`set`](CacheBackend::set) | Insert or overwrite a key |
/// | [`delete`](CacheBackend::delete) | Remove a key (no-op when absent) |
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// One cached transformation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result_text: String,
    pub created_at: DateTime<Utc>,
}

/// Cache of transformed segment text keyed by content fingerprint.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct SegmentCache {
    backend: Arc<dyn CacheBackend>,
}

impl SegmentCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Cached result text for `fingerprint`, or `None` on a miss.
    pub async fn lookup(&self, fingerprint: &str) -> Option<String> {
        self.entry(fingerprint).await.map(|e| e.result_text)
    }

    /// Full cached entry for `fingerprint`.
    pub async fn entry(&self, fingerprint: &str) -> Option<CacheEntry> {
        let raw = match self.backend.get(fingerprint).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(fingerprint, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(fingerprint, error = %e, "discarding unreadable cache entry");
                if let Err(e) = self.backend.delete(fingerprint).await {
                    tracing::warn!(fingerprint, error = %e, "failed to delete corrupt cache entry");
                }
                None
            }
        }
    }

    /// Remember `result_text` for `fingerprint`.
    pub async fn store(&self, fingerprint: &str, result_text: &str) -> Result<()> {
        if self.lookup(fingerprint).await.as_deref() == Some(result_text) {
            return Ok(());
        }
        let entry = CacheEntry {
            result_text: result_text.to_string(),
            created_at: Utc::now(),
        };
        let raw = serde_json::to_string(&entry)?;
        self.backend.set(fingerprint, &raw).await
    }

    /// Forget whatever is stored for `fingerprint`.
    pub async fn invalidate(&self, fingerprint: &str) -> Result<()> {
        self.backend.delete(fingerprint).await
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryCacheBackend;
    use super::*;

    fn cache() -> (Arc<InMemoryCacheBackend>, SegmentCache) {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = SegmentCache::new(backend.clone());
        (backend, cache)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (_, cache) = cache();
        assert_eq!(cache.lookup("fp").await, None);
        cache.store("fp", "polished").await.unwrap();
        assert_eq!(cache.lookup("fp").await.as_deref(), Some("polished"));
    }

    #[tokio::test]
    async fn test_store_same_value_is_noop() {
        let (backend, cache) = cache();
        cache.store("fp", "polished").await.unwrap();
        let first = cache.entry("fp").await.unwrap();
        cache.store("fp", "polished").await.unwrap();
        let second = cache.entry("fp").await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_new_value_overwrites() {
        let (_, cache) = cache();
        cache.store("fp", "first").await.unwrap();
        cache.store("fp", "second").await.unwrap();
        assert_eq!(cache.lookup("fp").await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let (_, cache) = cache();
        cache.store("fp", "polished").await.unwrap();
        cache.invalidate("fp").await.unwrap();
        assert_eq!(cache.lookup("fp").await, None);
        // Invalidating a missing key is fine.
        cache.invalidate("fp").await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss_and_removed() {
        let (backend, cache) = cache();
        backend.set("fp", "{not json").await.unwrap();
        assert_eq!(cache.lookup("fp").await, None);
        assert_eq!(backend.get("fp").await.unwrap(), None);
    }
}
