//! Read strategies of the cache client against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bazaar_cache::{CacheClient, CacheConfig, CacheError, LogicalExpiry};
use bazaar_core::{Clock, KeySpace, ManualClock, SharedClock};
use bazaar_store::{InMemoryStore, KeyValueStore};
use bazaar_sync::DistributedLock;
use serde::{Deserialize, Serialize};
use time::macros::datetime;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Shop {
    id: u64,
    name: String,
}

fn shop(id: u64) -> Shop {
    Shop {
        id,
        name: format!("shop-{id}"),
    }
}

struct Harness {
    store: InMemoryStore,
    clock: Arc<ManualClock>,
    cache: CacheClient,
}

fn harness(config: CacheConfig) -> Harness {
    let store = InMemoryStore::new();
    let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 12:00:00 UTC)));
    let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
    let cache = CacheClient::new(
        shared.clone(),
        DistributedLock::new(shared),
        clock.clone() as SharedClock,
        config,
    );
    Harness {
        store,
        clock,
        cache,
    }
}

async fn eventually(mut check: impl AsyncFnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_pass_through_caches_absent_record() {
    let h = harness(CacheConfig::default());
    let shops = KeySpace::new("shop");
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let calls = calls.clone();
        let found: Option<Shop> = h
            .cache
            .query_with_pass_through(&shops, 404u64, |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.get("cache:shop:404").await.unwrap(), Some(Vec::new()));
}

#[tokio::test]
async fn test_pass_through_serves_cached_value() {
    let h = harness(CacheConfig::default());
    let shops = KeySpace::new("shop");
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let calls = calls.clone();
        let found = h
            .cache
            .query_with_pass_through(&shops, 1u64, |id| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(shop(id)))
            }, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(found, Some(shop(1)));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_loader_error_is_not_cached() {
    let h = harness(CacheConfig::default());
    let shops = KeySpace::new("shop");

    let err = h
        .cache
        .query_with_pass_through::<Shop, _, _, _>(&shops, 5u64, |_| async {
            Err(anyhow::anyhow!("database down"))
        }, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Loader(_)));
    assert!(h.store.get("cache:shop:5").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutex_rebuild_loads_once_under_concurrency() {
    let h = harness(CacheConfig {
        retry_delay_ms: 10,
        ..CacheConfig::default()
    });
    let calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let cache = h.cache.clone();
        let calls = calls.clone();
        tasks.push(tokio::spawn(async move {
            let shops = KeySpace::new("shop");
            cache
                .query_with_mutex(&shops, 7u64, |id| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Some(shop(id)))
                }, Duration::from_secs(60))
                .await
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), Some(shop(7)));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.store.get("lock:shop:7").await.unwrap().is_none());
}

#[tokio::test]
async fn test_mutex_waiter_times_out_after_attempts() {
    let h = harness(CacheConfig {
        retry_delay_ms: 5,
        max_attempts: 3,
        ..CacheConfig::default()
    });
    let shops = KeySpace::new("shop");
    let other = DistributedLock::new(Arc::new(h.store.clone()));
    let _held = other
        .try_lock(&shops.lock_name(9), Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let err = h
        .cache
        .query_with_mutex::<Shop, _, _, _>(&shops, 9u64, |id| async move { Ok(Some(shop(id))) }, Duration::from_secs(60))
        .await
        .unwrap_err();
    match err {
        CacheError::LockTimeout { key, attempts } => {
            assert_eq!(key, "cache:shop:9");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_logical_expire_missing_key_is_none() {
    let h = harness(CacheConfig::default());
    let shops = KeySpace::new("shop");
    let found = h
        .cache
        .query_with_logical_expire::<Shop, _, _, _>(&shops, 3u64, |id| async move { Ok(Some(shop(id))) }, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logical_expire_serves_stale_and_rebuilds_once() {
    let h = harness(CacheConfig::default());
    let shops = KeySpace::new("shop");
    let stale = Shop {
        id: 1,
        name: "old name".into(),
    };
    h.cache
        .set_with_logical_expire("cache:shop:1", &stale, Duration::from_secs(10))
        .await
        .unwrap();
    h.clock.advance(Duration::from_secs(11));

    let calls = Arc::new(AtomicUsize::new(0));
    // Holds the rebuild until every reader has been answered.
    let release_loader = Arc::new(Notify::new());
    let mut tasks = Vec::new();
    for _ in 0..50 {
        let cache = h.cache.clone();
        let calls = calls.clone();
        let release_loader = release_loader.clone();
        let shops = shops.clone();
        tasks.push(tokio::spawn(async move {
            cache
                .query_with_logical_expire(&shops, 1u64, move |id| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    release_loader.notified().await;
                    Ok(Some(shop(id)))
                }, Duration::from_secs(10))
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), Some(stale.clone()));
    }
    release_loader.notify_one();

    let store = h.store.clone();
    let rebuilt = eventually(async || {
        let Some(bytes) = store.get("cache:shop:1").await.unwrap() else {
            return false;
        };
        let envelope: LogicalExpiry<Shop> = rmp_decode(&bytes);
        envelope.data == shop(1)
    })
    .await;
    assert!(rebuilt, "entry was not rebuilt");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(
        eventually(async || h.store.get("lock:shop:1").await.unwrap().is_none()).await,
        "rebuild lock was not released"
    );

    let fresh = h
        .cache
        .query_with_logical_expire::<Shop, _, _, _>(&shops, 1u64, |_| async { Ok(None) }, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(fresh, Some(shop(1)));
}

#[tokio::test]
async fn test_logical_expire_saturates_unbounded_ttl() {
    let h = harness(CacheConfig::default());
    let shops = KeySpace::new("shop");
    h.cache
        .set_with_logical_expire("cache:shop:5", &shop(5), Duration::MAX)
        .await
        .unwrap();

    let bytes = h.store.get("cache:shop:5").await.unwrap().unwrap();
    let envelope: LogicalExpiry<Shop> = rmp_decode(&bytes);
    assert_eq!(envelope.expire_at, i64::MAX);
    assert!(!envelope.is_expired(h.clock.now_millis()));

    let calls = Arc::new(AtomicUsize::new(0));
    let loader_calls = calls.clone();
    let served = h
        .cache
        .query_with_logical_expire::<Shop, _, _, _>(&shops, 5u64, move |_| async move {
            loader_calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(served, Some(shop(5)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(h.store.get("lock:shop:5").await.unwrap().is_none());
}

#[tokio::test]
async fn test_logical_expire_rebuild_of_deleted_record_removes_key() {
    let h = harness(CacheConfig::default());
    let shops = KeySpace::new("shop");
    h.cache
        .set_with_logical_expire("cache:shop:2", &shop(2), Duration::from_secs(1))
        .await
        .unwrap();
    h.clock.advance(Duration::from_secs(2));

    let served = h
        .cache
        .query_with_logical_expire::<Shop, _, _, _>(&shops, 2u64, |_| async { Ok(None) }, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(served, Some(shop(2)));

    let store = h.store.clone();
    assert!(eventually(async || store.get("cache:shop:2").await.unwrap().is_none()).await);
}

#[tokio::test]
async fn test_failed_rebuild_releases_lock_and_keeps_stale_value() {
    let h = harness(CacheConfig::default());
    let shops = KeySpace::new("shop");
    h.cache
        .set_with_logical_expire("cache:shop:3", &shop(3), Duration::from_secs(1))
        .await
        .unwrap();
    h.clock.advance(Duration::from_secs(2));

    h.cache
        .query_with_logical_expire::<Shop, _, _, _>(&shops, 3u64, |_| async {
            Err(anyhow::anyhow!("upstream timeout"))
        }, Duration::from_secs(10))
        .await
        .unwrap();

    let store = h.store.clone();
    assert!(eventually(async || store.get("lock:shop:3").await.unwrap().is_none()).await);
    assert!(h.store.get("cache:shop:3").await.unwrap().is_some());
}

#[tokio::test]
async fn test_update_then_invalidate_deletes_only_after_write() {
    let h = harness(CacheConfig::default());
    h.cache.set("cache:shop:8", &shop(8), Duration::from_secs(60)).await.unwrap();

    let failed = h
        .cache
        .update_then_invalidate("cache:shop:8", || async { Err::<(), _>(anyhow::anyhow!("constraint")) })
        .await;
    assert!(failed.is_err());
    assert!(h.store.get("cache:shop:8").await.unwrap().is_some());

    let rows = h
        .cache
        .update_then_invalidate("cache:shop:8", || async { Ok(1u64) })
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert!(h.store.get("cache:shop:8").await.unwrap().is_none());
}

fn rmp_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> T {
    rmp_serde::from_slice(bytes).unwrap()
}
