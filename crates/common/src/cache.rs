//! Key-value cache backends.
//!
//! The relationship cache and the unread-count cache sit on top of
//! [`CacheBackend`]. Two backends are provided:
//!
//! - [`RedisCache`]: shared across replicas, backed by a `fred` client
//! - [`InMemoryCache`]: process-local, used when Redis is not configured and in tests
//!
//! Cache errors never fail a request. Callers log them and fall back to the
//! authoritative store.

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use fred::types::Expiration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Cache error type.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A string key-value store with per-entry expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), CacheError>;
}

/// Shared cache handle.
pub type SharedCache = Arc<dyn CacheBackend>;

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisCache {
    redis: Arc<RedisClient>,
    prefix: String,
}

impl RedisCache {
    /// Create a new Redis cache. All keys are namespaced under `prefix`.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.redis
            .get::<Option<String>, _>(self.key(key))
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let secs = ttl.as_secs().max(1) as i64;
        self.redis
            .set::<(), _, _>(self.key(key), value, Some(Expiration::EX(secs)), None, false)
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.redis
            .del::<(), _>(self.key(key))
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))
    }
}

/// Writes between sweeps of expired in-memory entries.
const SWEEP_EVERY_WRITES: u32 = 256;

#[derive(Default)]
struct Entries {
    map: HashMap<String, (String, Instant)>,
    writes_since_sweep: u32,
}

/// Process-local cache.
///
/// Expired entries are invisible to reads and dropped every
/// `SWEEP_EVERY_WRITES` writes.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<Entries>>,
}

impl InMemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .map
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    /// Whether the cache holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .map
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        entries.writes_since_sweep += 1;
        if entries.writes_since_sweep >= SWEEP_EVERY_WRITES {
            entries.map.retain(|_, (_, expires_at)| *expires_at > now);
            entries.writes_since_sweep = 0;
        }

        entries.map.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_entries_expire() {
        let cache = InMemoryCache::new();
        cache
            .set_ex("k", "v".to_string(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_in_memory_delete() {
        let cache = InMemoryCache::new();
        cache
            .set_ex("k", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.del("k").await.unwrap();
        cache.del("missing").await.unwrap();

        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_sweeps_expired_entries_periodically() {
        let cache = InMemoryCache::new();
        for i in 1..SWEEP_EVERY_WRITES {
            cache
                .set_ex(&format!("k{i}"), "v".to_string(), Duration::from_secs(1))
                .await
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.is_empty().await);
        assert_eq!(
            cache.entries.read().await.map.len(),
            SWEEP_EVERY_WRITES as usize - 1
        );

        cache
            .set_ex("fresh", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let entries = cache.entries.read().await;
        assert_eq!(entries.map.len(), 1);
        assert!(entries.map.contains_key("fresh"));
    }
}
