use crate::cache::CachePolicy;
use crate::consumer::ConsumerSettings;
use crate::dispatch::DispatchTimeouts;
use serde::Deserialize;
use std::time::Duration;

pub use crate::nats::NatsConfig;

/// Complete control-service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CityConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

/// Durable state store
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    std::env::var("CITYGRID_DB").unwrap_or_else(|_| "citygrid.db".to_string())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

/// Read-path cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Populate per-id entries when listing a collection
    #[serde(default)]
    pub warm_on_list: bool,
}

fn default_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn default_ttl_seconds() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            url: default_redis_url(),
            ttl_seconds: default_ttl_seconds(),
            warm_on_list: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Memory,
    Nats,
}

/// Command queue selection; broker details live in `[nats]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
}

/// Command consumers
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Delivery attempts before a failed command is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Consumer tasks per collection. Workers share one channel, so with
    /// more than one, two commands for the same entity may be applied
    /// concurrently and per-entity order is no longer guaranteed.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_actuation_timeout_ms")]
    pub actuation_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_workers() -> usize {
    1
}

fn default_actuation_timeout_ms() -> u64 {
    10_000
}

impl ConsumerConfig {
    /// Effective worker count (at least one).
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// Whether commands for one entity are applied in publish order.
    pub fn preserves_key_order(&self) -> bool {
        self.worker_count() == 1
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            workers: default_workers(),
            actuation_timeout_ms: default_actuation_timeout_ms(),
        }
    }
}

/// Bounds on every store, cache and broker call
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_cache_ms")]
    pub cache_ms: u64,
    #[serde(default = "default_store_ms")]
    pub store_ms: u64,
    #[serde(default = "default_publish_ms")]
    pub publish_ms: u64,
}

fn default_cache_ms() -> u64 {
    250
}

fn default_store_ms() -> u64 {
    5000
}

fn default_publish_ms() -> u64 {
    5000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cache_ms: default_cache_ms(),
            store_ms: default_store_ms(),
            publish_ms: default_publish_ms(),
        }
    }
}

impl CityConfig {
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: Duration::from_secs(self.cache.ttl_seconds),
            cache_timeout: Duration::from_millis(self.timeouts.cache_ms),
            store_timeout: Duration::from_millis(self.timeouts.store_ms),
            warm_on_list: self.cache.warm_on_list,
        }
    }

    pub fn dispatch_timeouts(&self) -> DispatchTimeouts {
        DispatchTimeouts {
            store: Duration::from_millis(self.timeouts.store_ms),
            publish: Duration::from_millis(self.timeouts.publish_ms),
        }
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            max_attempts: self.consumer.max_attempts.max(1),
            actuation_timeout: Duration::from_millis(self.consumer.actuation_timeout_ms),
            store_timeout: Duration::from_millis(self.timeouts.store_ms),
            ..ConsumerSettings::default()
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<CityConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: CityConfig = toml::from_str(&contents)?;
    Ok(config)
}
