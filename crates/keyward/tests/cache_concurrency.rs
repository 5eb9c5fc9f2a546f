//! Concurrent access to the shared TTL cache

use keyward::cache::{Cache, MemoryCache, StatsCache};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_set_and_get_on_distinct_keys() {
    let cache: Arc<MemoryCache<String>> = Arc::new(MemoryCache::new(Duration::from_secs(60)));

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let key = format!("key-{i}");
                cache.set(&key, format!("value-{i}"), None);
                cache.get(&key)
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let value = handle.await.unwrap();
        assert_eq!(value, Some(format!("value-{i}")));
    }

    assert_eq!(cache.size(), 100);
    for i in 0..100 {
        assert_eq!(cache.get(&format!("key-{i}")), Some(format!("value-{i}")));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_on_one_key_leave_a_written_value() {
    let cache: Arc<MemoryCache<String>> = Arc::new(MemoryCache::new(Duration::from_secs(60)));

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.set("shared", format!("writer-{i}"), None) })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let value = cache.get("shared").unwrap();
    assert!(value.starts_with("writer-"));
    assert_eq!(cache.size(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stats_count_every_lookup_under_contention() {
    let cache = Arc::new(StatsCache::new(MemoryCache::<String>::new(
        Duration::from_secs(60),
    )));
    for i in 0..10 {
        cache.set(&format!("present-{i}"), "x".to_string(), None);
    }

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                // Even tasks hit, odd tasks miss
                let key = if i % 2 == 0 {
                    format!("present-{}", i % 10)
                } else {
                    format!("absent-{i}")
                };
                cache.get(&key).is_some()
            })
        })
        .collect();

    let mut hits = 0;
    for handle in handles {
        if handle.await.unwrap() {
            hits += 1;
        }
    }

    let stats = cache.stats();
    assert_eq!(hits, 50);
    assert_eq!(stats.hits, 50);
    assert_eq!(stats.misses, 50);
    assert_eq!(stats.lookups(), 100);
}

#[tokio::test]
async fn test_entries_expire_while_readers_are_active() {
    let cache: Arc<MemoryCache<String>> = Arc::new(MemoryCache::new(Duration::from_secs(60)));
    cache.set("short", "v".to_string(), Some(Duration::from_millis(50)));
    cache.set("long", "v".to_string(), None);

    assert!(cache.get("short").is_some());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(cache.get("short").is_none());
    assert!(cache.get("long").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_background_sweep_purges_expired_entries() {
    let cache: MemoryCache<String> =
        MemoryCache::with_sweeper(Duration::from_secs(60), Duration::from_secs(30));
    assert!(cache.has_sweeper());

    cache.set("short", "v".to_string(), Some(Duration::from_millis(1)));
    cache.set("long", "v".to_string(), None);
    std::thread::sleep(Duration::from_millis(5));

    // Paused clock: the sleep auto-advances past one sweep period
    tokio::time::sleep(Duration::from_secs(31)).await;

    // Swept without any read touching the key
    assert_eq!(cache.size(), 1);
}
