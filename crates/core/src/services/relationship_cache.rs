//! Cache-aside layer for relationships, follow counters and unread counts.
//!
//! Reads fall through to the authoritative store on a miss. Every write path
//! invalidates the affected keys before returning, so a stale entry can only
//! outlive a write by the time it takes to reach the invalidation. Cache
//! failures are logged and treated as misses.

use std::time::Duration;

use habitgraph_common::SharedCache;
use habitgraph_common::config::CacheConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::services::counter::FollowCounts;

/// How a viewer relates to a target user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    /// The viewer actively follows the target.
    Following,
    /// The target actively follows the viewer, but not the other way round.
    FollowedBy,
    /// The viewer has a pending request to the target.
    Pending,
    None,
}

#[derive(Clone)]
pub struct RelationshipCache {
    backend: Option<SharedCache>,
    relationship_ttl: Duration,
    counter_ttl: Duration,
    unread_ttl: Duration,
}

impl RelationshipCache {
    /// Create a cache over `backend`.
    #[must_use]
    pub fn new(backend: SharedCache, config: &CacheConfig) -> Self {
        Self {
            backend: Some(backend),
            relationship_ttl: Duration::from_secs(config.relationship_ttl_secs),
            counter_ttl: Duration::from_secs(config.counter_ttl_secs),
            unread_ttl: Duration::from_secs(config.unread_ttl_secs),
        }
    }

    /// A cache that never hits. Every read goes to the store.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            backend: None,
            relationship_ttl: Duration::ZERO,
            counter_ttl: Duration::ZERO,
            unread_ttl: Duration::ZERO,
        }
    }

    fn relationship_key(viewer_id: &str, target_id: &str) -> String {
        format!("rel:{viewer_id}:{target_id}")
    }

    fn counters_key(user_id: &str) -> String {
        format!("counters:{user_id}")
    }

    fn unread_key(user_id: &str) -> String {
        format!("unread:{user_id}")
    }

    pub async fn get_relationship(&self, viewer_id: &str, target_id: &str) -> Option<Relationship> {
        self.read(&Self::relationship_key(viewer_id, target_id))
            .await
    }

    pub async fn put_relationship(&self, viewer_id: &str, target_id: &str, value: Relationship) {
        self.write(
            &Self::relationship_key(viewer_id, target_id),
            &value,
            self.relationship_ttl,
        )
        .await;
    }

    /// Drop both directions of a pair.
    pub async fn invalidate_pair(&self, a: &str, b: &str) {
        self.remove(&Self::relationship_key(a, b)).await;
        self.remove(&Self::relationship_key(b, a)).await;
    }

    pub async fn get_counters(&self, user_id: &str) -> Option<FollowCounts> {
        self.read(&Self::counters_key(user_id)).await
    }

    pub async fn put_counters(&self, user_id: &str, counts: &FollowCounts) {
        self.write(&Self::counters_key(user_id), counts, self.counter_ttl)
            .await;
    }

    pub async fn invalidate_counters(&self, user_id: &str) {
        self.remove(&Self::counters_key(user_id)).await;
    }

    pub async fn get_unread(&self, user_id: &str) -> Option<u64> {
        self.read(&Self::unread_key(user_id)).await
    }

    pub async fn put_unread(&self, user_id: &str, count: u64) {
        self.write(&Self::unread_key(user_id), &count, self.unread_ttl)
            .await;
    }

    pub async fn invalidate_unread(&self, user_id: &str) {
        self.remove(&Self::unread_key(user_id)).await;
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;

        let raw = match backend.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, key = %key, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, key = %key, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, key = %key, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = backend.set_ex(key, raw, ttl).await {
            warn!(error = %e, key = %key, "Cache write failed");
        }
    }

    async fn remove(&self, key: &str) {
        if let Some(backend) = self.backend.as_ref()
            && let Err(e) = backend.del(key).await
        {
            warn!(error = %e, key = %key, "Cache invalidation failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use habitgraph_common::{CacheBackend, CacheError, InMemoryCache};
    use std::sync::Arc;

    fn cache() -> RelationshipCache {
        RelationshipCache::new(Arc::new(InMemoryCache::new()), &CacheConfig::default())
    }

    #[tokio::test]
    async fn test_relationship_roundtrip_and_pair_invalidation() {
        let cache = cache();

        cache
            .put_relationship("a", "b", Relationship::Following)
            .await;
        cache
            .put_relationship("b", "a", Relationship::FollowedBy)
            .await;
        assert_eq!(
            cache.get_relationship("a", "b").await,
            Some(Relationship::Following)
        );

        cache.invalidate_pair("b", "a").await;

        assert_eq!(cache.get_relationship("a", "b").await, None);
        assert_eq!(cache.get_relationship("b", "a").await, None);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = RelationshipCache::disabled();
        cache.put_unread("a", 3).await;
        assert_eq!(cache.get_unread("a").await, None);
    }

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Redis("connection refused".to_string()))
        }

        async fn set_ex(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Redis("connection refused".to_string()))
        }

        async fn del(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Redis("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_errors_read_as_misses() {
        let cache = RelationshipCache::new(Arc::new(BrokenBackend), &CacheConfig::default());

        cache.put_unread("a", 1).await;
        cache.invalidate_unread("a").await;
        assert_eq!(cache.get_unread("a").await, None);
    }
}
