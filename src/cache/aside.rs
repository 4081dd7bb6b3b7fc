//! Cache-aside access to a state store.
//!
//! Reads try the cache first and fall back to the durable store on a miss,
//! repopulating the cache. Writes go to the durable store first and are then
//! written through to the cache. The cache is never a consistency
//! dependency: any cache error, timeout or undecodable record degrades to a
//! store read, and a failed cache write after a durable write is only logged.

use super::CacheBackend;
use crate::error::{CacheError, CityError, StoreError};
use crate::model::Record;
use crate::store::StateStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// TTL and timeout policy for one cache-aside instance.
#[derive(Clone, Debug)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub cache_timeout: Duration,
    pub store_timeout: Duration,
    /// Populate per-id cache records when listing.
    pub warm_on_list: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            cache_timeout: Duration::from_millis(250),
            store_timeout: Duration::from_secs(5),
            warm_on_list: false,
        }
    }
}

/// `"<collection>:<id>"`
pub fn cache_key<E: Record>(id: &str) -> String {
    format!("{}:{}", E::COLLECTION, id)
}

pub struct CacheAside<E: Record> {
    store: Arc<dyn StateStore<E>>,
    cache: Arc<dyn CacheBackend>,
    policy: CachePolicy,
}

impl<E: Record> CacheAside<E> {
    pub fn new(
        store: Arc<dyn StateStore<E>>,
        cache: Arc<dyn CacheBackend>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            store,
            cache,
            policy,
        }
    }

    /// Cache hit returns without touching the store. On a miss the store is
    /// authoritative; absence is reported as `NotFound` and never cached.
    pub async fn get(&self, id: &str) -> Result<E, CityError> {
        let key = cache_key::<E>(id);

        if let Some(entity) = self.read_cache(&key).await {
            debug!(key = %key, "Cache hit");
            return Ok(entity);
        }

        debug!(key = %key, "Cache miss, reading state store");
        let found = self
            .with_store_timeout(self.store.find_by_id(id))
            .await?
            .ok_or_else(|| CityError::NotFound(key.clone()))?;

        self.write_cache(&key, &found).await;
        Ok(found)
    }

    /// Bulk listing always comes from the durable store.
    pub async fn get_all(&self) -> Result<Vec<E>, CityError> {
        let all = self.with_store_timeout(self.store.find_all()).await?;

        if self.policy.warm_on_list {
            for entity in &all {
                self.write_cache(&cache_key::<E>(entity.id()), entity).await;
            }
        }

        Ok(all)
    }

    /// Durable write, then write-through to the cache.
    pub async fn put(&self, entity: &E) -> Result<(), CityError> {
        self.with_store_timeout(self.store.save(entity)).await?;
        self.write_cache(&cache_key::<E>(entity.id()), entity).await;
        Ok(())
    }

    /// Durable delete, then eviction. Returns `NotFound` if nothing was removed.
    pub async fn delete(&self, id: &str) -> Result<(), CityError> {
        let key = cache_key::<E>(id);
        let removed = self.with_store_timeout(self.store.delete(id)).await?;

        // Evict even when the store had nothing, in case a stale record lingers.
        self.evict(&key).await;

        if removed {
            Ok(())
        } else {
            Err(CityError::NotFound(key))
        }
    }

    async fn with_store_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, CityError> {
        match tokio::time::timeout(self.policy.store_timeout, call).await {
            Ok(result) => result.map_err(CityError::from),
            Err(_) => Err(StoreError::Timeout.into()),
        }
    }

    async fn with_cache_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.policy.cache_timeout, call)
            .await
            .unwrap_or(Err(CacheError::Timeout))
    }

    async fn read_cache(&self, key: &str) -> Option<E> {
        let bytes = match self.with_cache_timeout(self.cache.get(key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, falling back to state store");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable cache record, treating as miss");
                self.evict(key).await;
                None
            }
        }
    }

    async fn write_cache(&self, key: &str, entity: &E) {
        let bytes = match serde_json::to_vec(entity) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize record for cache");
                return;
            }
        };

        if let Err(e) = self
            .with_cache_timeout(self.cache.set(key, &bytes, self.policy.ttl))
            .await
        {
            warn!(key = %key, error = %e, "Cache write failed, continuing");
        }
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.with_cache_timeout(self.cache.delete(key)).await {
            warn!(key = %key, error = %e, "Cache eviction failed");
        }
    }
}

#[cfg(test)]
mod tests;
