use super::*;
use crate::cache::MemoryCache;
use crate::model::fixtures::house;
use crate::model::House;
use crate::store::MemoryStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Store wrapper that counts calls so tests can assert on store traffic.
struct CountingStore {
    inner: MemoryStore<House>,
    reads: AtomicUsize,
    lists: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            reads: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore<House> for CountingStore {
    async fn find_all(&self) -> Result<Vec<House>, StoreError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.find_all().await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<House>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_id(id).await
    }

    async fn save(&self, entity: &House) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save(entity).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
}

/// Cache whose every call fails.
struct BrokenCache;

#[async_trait]
impl CacheBackend for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Connection("refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Connection("refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::Connection("refused".to_string()))
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CacheError> {
        Err(CacheError::Connection("refused".to_string()))
    }
}

/// Cache that never answers within any reasonable timeout.
struct HangingCache;

#[async_trait]
impl CacheBackend for HangingCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CacheError> {
        Ok(vec![])
    }
}

/// Store whose reads never complete.
struct HangingStore;

#[async_trait]
impl StateStore<House> for HangingStore {
    async fn find_all(&self) -> Result<Vec<House>, StoreError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![])
    }

    async fn find_by_id(&self, _id: &str) -> Result<Option<House>, StoreError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn save(&self, _entity: &House) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _id: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}

fn fast_policy() -> CachePolicy {
    CachePolicy {
        cache_timeout: Duration::from_millis(50),
        store_timeout: Duration::from_millis(100),
        ..CachePolicy::default()
    }
}

fn setup() -> (Arc<CountingStore>, Arc<MemoryCache>, CacheAside<House>) {
    let store = Arc::new(CountingStore::new());
    let cache = Arc::new(MemoryCache::new());
    let aside = CacheAside::new(store.clone(), cache.clone(), fast_policy());
    (store, cache, aside)
}

#[test]
fn test_cache_key_format() {
    assert_eq!(cache_key::<House>("h1"), "house:h1");
}

#[test]
fn test_default_ttl_is_one_hour() {
    assert_eq!(CachePolicy::default().ttl, Duration::from_secs(3600));
}

#[tokio::test]
async fn test_get_after_put_served_from_cache() {
    let (store, _cache, aside) = setup();
    let h = house("h1", &["d1"]);

    aside.put(&h).await.unwrap();
    let loaded = aside.get("h1").await.unwrap();

    assert_eq!(loaded, h);
    assert_eq!(store.reads(), 0);
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_miss_populates_cache_then_hits() {
    let (store, cache, aside) = setup();
    let h = house("h1", &["d1"]);
    store.inner.save(&h).await.unwrap();

    assert_eq!(aside.get("h1").await.unwrap(), h);
    assert_eq!(store.reads(), 1);

    let raw = cache.get("house:h1").await.unwrap().expect("cache populated");
    let cached: House = serde_json::from_slice(&raw).unwrap();
    assert_eq!(cached, h);

    assert_eq!(aside.get("h1").await.unwrap(), h);
    assert_eq!(store.reads(), 1);
}

#[tokio::test]
async fn test_not_found_is_not_cached() {
    let (store, cache, aside) = setup();

    let err = aside.get("ghost").await.unwrap_err();
    assert!(matches!(err, CityError::NotFound(ref k) if k == "house:ghost"));
    assert!(cache.is_empty());

    // Absence is re-checked against the store every time
    let _ = aside.get("ghost").await;
    assert_eq!(store.reads(), 2);
}

#[tokio::test]
async fn test_put_overwrites_cached_record() {
    let (store, _cache, aside) = setup();
    aside.put(&house("h1", &[])).await.unwrap();
    aside.put(&house("h1", &["d1", "d2"])).await.unwrap();

    let loaded = aside.get("h1").await.unwrap();
    assert_eq!(loaded.devices.len(), 2);
    assert_eq!(store.reads(), 0);
}

#[tokio::test]
async fn test_broken_cache_falls_back_to_store() {
    let store = Arc::new(CountingStore::new());
    let aside = CacheAside::new(store.clone(), Arc::new(BrokenCache), fast_policy());

    // Writes still succeed because the durable write succeeded
    aside.put(&house("h1", &["d1"])).await.unwrap();
    aside.put(&house("h2", &[])).await.unwrap();

    assert_eq!(aside.get("h1").await.unwrap().devices[0].id, "d1");
    assert_eq!(aside.get_all().await.unwrap().len(), 2);
    assert!(matches!(
        aside.get("missing").await,
        Err(CityError::NotFound(_))
    ));
    assert_eq!(store.reads(), 2);
}

#[tokio::test]
async fn test_hanging_cache_times_out_to_store() {
    let store = Arc::new(CountingStore::new());
    store.inner.save(&house("h1", &[])).await.unwrap();
    let aside = CacheAside::new(store.clone(), Arc::new(HangingCache), fast_policy());

    let started = std::time::Instant::now();
    assert_eq!(aside.get("h1").await.unwrap().id, "h1");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(store.reads(), 1);
}

#[tokio::test]
async fn test_store_timeout_is_upstream_unavailable() {
    let aside = CacheAside::new(
        Arc::new(HangingStore),
        Arc::new(MemoryCache::new()),
        fast_policy(),
    );

    let err = aside.get("h1").await.unwrap_err();
    assert!(matches!(err, CityError::UpstreamUnavailable(_)));

    let err = aside.get_all().await.unwrap_err();
    assert!(matches!(err, CityError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_corrupt_cache_record_treated_as_miss() {
    let (store, cache, aside) = setup();
    store.inner.save(&house("h1", &[])).await.unwrap();
    cache
        .set("house:h1", b"not json", Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(aside.get("h1").await.unwrap().id, "h1");
    assert_eq!(store.reads(), 1);

    // Record was repaired on the way through
    assert_eq!(aside.get("h1").await.unwrap().id, "h1");
    assert_eq!(store.reads(), 1);
}

#[tokio::test]
async fn test_get_all_reads_store_and_optionally_warms() {
    let store = Arc::new(CountingStore::new());
    let cache = Arc::new(MemoryCache::new());
    store.inner.save(&house("h1", &[])).await.unwrap();
    store.inner.save(&house("h2", &[])).await.unwrap();

    let cold = CacheAside::new(store.clone(), cache.clone(), fast_policy());
    assert_eq!(cold.get_all().await.unwrap().len(), 2);
    assert!(cache.is_empty());

    let warming = CacheAside::new(
        store.clone(),
        cache.clone(),
        CachePolicy {
            warm_on_list: true,
            ..fast_policy()
        },
    );
    warming.get_all().await.unwrap();
    assert_eq!(cache.keys("house:*").await.unwrap().len(), 2);
    assert_eq!(store.lists.load(Ordering::SeqCst), 2);

    warming.get("h2").await.unwrap();
    assert_eq!(store.reads(), 0);
}

#[tokio::test]
async fn test_delete_evicts() {
    let (_store, cache, aside) = setup();
    aside.put(&house("h1", &[])).await.unwrap();
    assert!(cache.get("house:h1").await.unwrap().is_some());

    aside.delete("h1").await.unwrap();

    assert!(cache.get("house:h1").await.unwrap().is_none());
    assert!(matches!(aside.get("h1").await, Err(CityError::NotFound(_))));
    assert!(matches!(aside.delete("h1").await, Err(CityError::NotFound(_))));
}
