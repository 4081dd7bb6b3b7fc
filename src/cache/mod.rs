// Cache-aside read path and the key-value cache backends it sits on

mod aside;
mod memory;
mod redis;

pub use self::redis::RedisCache;
pub use aside::{cache_key, CacheAside, CachePolicy};
pub use memory::MemoryCache;

use crate::error::CacheError;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Keys matching a glob pattern (`*` wildcard). Only used for bulk listing.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}
