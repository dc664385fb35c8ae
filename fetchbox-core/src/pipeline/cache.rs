//! Entity caches attached to pipeline stages.
//!
//! A cache stores the entity a stage produced so a freshly created resource
//! can show something before the network answers. Caches are consulted off
//! the coordination context and their failures never fail a request: the
//! pipeline logs them and carries on.

use std::error::Error as StdError;

use async_trait::async_trait;
use dashmap::DashMap;
use smol_str::SmolStr;
use thiserror::Error;
use url::Url;

use crate::entity::Entity;

/// Result of an entity cache operation.
pub type CacheResult<T> = Result<T, CacheError>;

/// Error type for entity cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache's own state or storage failed.
    #[error(transparent)]
    InternalError(Box<dyn StdError + Send + Sync>),

    /// The stored entity could not be encoded or decoded.
    #[error("cannot encode cached entity: {0}")]
    FormatError(String),
}

/// Persistent or in-memory store for entities, keyed per resource.
#[async_trait]
pub trait EntityCache: Send + Sync {
    /// Cache key for the resource at `url`, or `None` to skip caching it.
    fn key(&self, url: &Url) -> Option<SmolStr>;

    /// Returns the stored entity, if any.
    async fn read_entity(&self, key: &str) -> CacheResult<Option<Entity>>;

    /// Stores `entity`, replacing what was there.
    async fn write_entity(&self, entity: &Entity, key: &str) -> CacheResult<()>;

    /// Removes the stored entity; missing entries are not an error.
    async fn remove_entity(&self, key: &str) -> CacheResult<()>;

    /// Name used in log fields.
    fn name(&self) -> &str {
        "entity_cache"
    }
}

/// [`EntityCache`] kept in process memory.
///
/// Entities are stored as-is, so any content type survives a round trip.
/// Keys are the resource URL.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<SmolStr, Entity>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl EntityCache for MemoryCache {
    fn key(&self, url: &Url) -> Option<SmolStr> {
        Some(SmolStr::new(url.as_str()))
    }

    async fn read_entity(&self, key: &str) -> CacheResult<Option<Entity>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn write_entity(&self, entity: &Entity, key: &str) -> CacheResult<()> {
        self.entries.insert(SmolStr::new(key), entity.clone());
        Ok(())
    }

    async fn remove_entity(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn memory_cache_round_trip() {
        let cache = MemoryCache::new();
        let url = Url::parse("https://api.example.com/users/1").unwrap();
        let key = cache.key(&url).unwrap();
        assert_eq!(cache.read_entity(&key).await.unwrap().map(|_| ()), None);

        let entity = Entity::with_content_type("ann".to_owned(), "text/plain", Utc::now());
        cache.write_entity(&entity, &key).await.unwrap();
        let stored = cache.read_entity(&key).await.unwrap().unwrap();
        assert!(stored.same_content(&entity));
        assert_eq!(cache.len(), 1);

        cache.remove_entity(&key).await.unwrap();
        cache.remove_entity(&key).await.unwrap();
        assert!(cache.is_empty());
    }
}
