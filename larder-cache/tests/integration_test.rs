//! Integration tests for larder-cache

use larder_cache::*;
use larder_redis::{RedisConfig, RedisPool};
use larder_store::Store;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn shared_embedded(dir: &TempDir) -> (EmbeddedCache, EmbeddedCache) {
    let store = Store::open(dir.path()).unwrap();
    (
        EmbeddedCache::new(store.clone(), CacheConfig::new().with_key_prefix("alpha").unwrap()),
        EmbeddedCache::new(store, CacheConfig::new().with_key_prefix("beta").unwrap()),
    )
}

async fn stress<C: Cache + Clone + 'static>(cache: C) {
    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                let key = format!("stress:{}", i);
                let value = format!("value-{}", i);
                cache.set(&key, value.as_bytes(), 0).await.unwrap();
                let read = cache.get(&key).await.unwrap();
                assert_eq!(read, value.as_bytes(), "cross-contamination on {}", key);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(cache.keys("stress:*").await.unwrap().len(), 100);
}

#[tokio::test]
async fn test_namespace_isolation_embedded() {
    let dir = TempDir::new().unwrap();
    let (alpha, beta) = shared_embedded(&dir);

    alpha.set("user:1", b"a", 0).await.unwrap();
    beta.set("user:1", b"b", 0).await.unwrap();
    beta.set("user:2", b"b", 0).await.unwrap();

    assert_eq!(alpha.get("user:1").await.unwrap(), b"a");
    assert_eq!(alpha.keys("*").await.unwrap(), vec!["user:1"]);

    alpha.empty_by_match("user:*").await.unwrap();
    assert!(!alpha.has("user:1").await.unwrap());
    assert_eq!(beta.keys("*").await.unwrap(), vec!["user:1", "user:2"]);

    alpha.set("post:1", b"a", 0).await.unwrap();
    beta.empty().await.unwrap();
    assert!(beta.keys("*").await.unwrap().is_empty());
    assert!(alpha.has("post:1").await.unwrap());
}

#[tokio::test]
async fn test_nested_prefixes_stay_isolated() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        CacheConfig::new().with_key_prefix("app:x"),
        Err(CacheError::Config(_))
    ));
    let nested = CacheConfig {
        key_prefix: Some("app:x".to_string()),
    };
    assert!(matches!(
        EmbeddedCache::open(dir.path().join("nested"), nested),
        Err(CacheError::Config(_))
    ));

    let store = Store::open(dir.path().join("shared")).unwrap();
    let outer = EmbeddedCache::new(store.clone(), CacheConfig::new().with_key_prefix("app").unwrap());
    let inner = EmbeddedCache::new(store, CacheConfig::new().with_key_prefix("app_x").unwrap());

    inner.set("k", b"inner", 0).await.unwrap();
    outer.set("x:k", b"outer", 0).await.unwrap();
    assert_eq!(outer.keys("*").await.unwrap(), vec!["x:k"]);
    assert_eq!(inner.keys("*").await.unwrap(), vec!["k"]);

    outer.empty().await.unwrap();
    assert!(!outer.has("x:k").await.unwrap());
    assert_eq!(inner.get("k").await.unwrap(), b"inner");
}

#[tokio::test]
async fn test_prefix_is_not_a_pattern() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let odd = EmbeddedCache::new(store.clone(), CacheConfig::new().with_key_prefix("a*").unwrap());
    let plain = EmbeddedCache::new(store, CacheConfig::new().with_key_prefix("ab").unwrap());

    plain.set("k", b"1", 0).await.unwrap();
    odd.empty().await.unwrap();
    assert!(plain.has("k").await.unwrap());
}

#[tokio::test]
async fn test_embedded_stress() {
    let dir = TempDir::new().unwrap();
    let cache = EmbeddedCache::open(dir.path(), CacheConfig::new().with_key_prefix("app").unwrap()).unwrap();
    stress(cache).await;
}

#[tokio::test]
async fn test_handle_dispatches_to_embedded() {
    let dir = TempDir::new().unwrap();
    let cache = EmbeddedCache::open(dir.path(), CacheConfig::new()).unwrap();
    let handle = CacheHandle::from(cache);
    assert_eq!(handle.backend_kind(), BackendKind::Embedded);

    handle.set("x", b"A", 0).await.unwrap();
    handle.set("x", b"B", 0).await.unwrap();
    assert_eq!(handle.get("x").await.unwrap(), b"B");

    let values = handle.get_many(&["x", "missing"]).await.unwrap();
    assert_eq!(values, vec![Some(b"B".to_vec()), None]);

    handle.forget_many(&["x", "missing"]).await.unwrap();
    assert!(!handle.has("x").await.unwrap());
}

#[tokio::test]
async fn test_remember_calls_factory_once() {
    let dir = TempDir::new().unwrap();
    let cache = EmbeddedCache::open(dir.path(), CacheConfig::new()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let calls = calls.clone();
        let value: Vec<String> = cache
            .remember("tags", 0, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec!["rust".to_string(), "cache".to_string()])
            })
            .await
            .unwrap();
        assert_eq!(value, vec!["rust", "cache"]);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_corrupt_json_is_deserialization_error() {
    let dir = TempDir::new().unwrap();
    let cache = EmbeddedCache::open(dir.path(), CacheConfig::new()).unwrap();

    cache.set("config", b"{not json", 0).await.unwrap();
    let result: CacheResult<Vec<u32>> = cache.get_json("config").await;
    assert!(matches!(result, Err(CacheError::Deserialization(_))));
}

#[tokio::test]
async fn test_gc_after_overwrites_keeps_values() {
    let dir = TempDir::new().unwrap();
    let cache = EmbeddedCache::open(dir.path(), CacheConfig::new().with_key_prefix("app").unwrap()).unwrap();

    for i in 0..1000 {
        cache.set(&format!("k{}", i), b"first", 0).await.unwrap();
    }
    for i in 0..500 {
        cache.set(&format!("k{}", i), b"second", 0).await.unwrap();
    }

    let before = cache.store().disk_usage().unwrap();
    let report = cache.collect_garbage(0.3, 16).await.unwrap();
    assert!(report.reclaimed_bytes > 0);
    assert!(cache.store().disk_usage().unwrap() < before);

    for i in 0..500 {
        assert_eq!(cache.get(&format!("k{}", i)).await.unwrap(), b"second");
    }
    for i in 500..1000 {
        assert_eq!(cache.get(&format!("k{}", i)).await.unwrap(), b"first");
    }
}

// Note: These tests require a Redis server on localhost:6379.
// Run them with: cargo test -- --ignored

async fn redis_cache(prefix: &str) -> RedisCache {
    let pool = RedisPool::new(RedisConfig::new("localhost:6379")).await.unwrap();
    RedisCache::new(pool, CacheConfig::new().with_key_prefix(prefix).unwrap())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_set_get_forget() {
    let cache = redis_cache("larder-test-basic").await;
    cache.empty().await.unwrap();

    cache.set("x", b"A", 0).await.unwrap();
    cache.set("x", b"B", 0).await.unwrap();
    assert_eq!(cache.get("x").await.unwrap(), b"B");

    cache.forget("x").await.unwrap();
    cache.forget("x").await.unwrap();
    assert!(cache.get("x").await.unwrap_err().is_not_found());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_ttl() {
    let cache = redis_cache("larder-test-ttl").await;
    cache.set("short", b"v", 1).await.unwrap();
    assert!(cache.has("short").await.unwrap());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!cache.has("short").await.unwrap());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_namespace_isolation() {
    let alpha = redis_cache("larder-test-alpha").await;
    let beta = redis_cache("larder-test-beta").await;
    alpha.empty().await.unwrap();
    beta.empty().await.unwrap();

    alpha.set("user:1", b"a", 0).await.unwrap();
    beta.set("user:1", b"b", 0).await.unwrap();

    alpha.empty_by_match("user:*").await.unwrap();
    assert!(!alpha.has("user:1").await.unwrap());
    assert_eq!(beta.get("user:1").await.unwrap(), b"b");

    beta.empty().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_stress() {
    let cache = redis_cache("larder-test-stress").await;
    cache.empty().await.unwrap();
    stress(cache.clone()).await;
    cache.empty().await.unwrap();
}
