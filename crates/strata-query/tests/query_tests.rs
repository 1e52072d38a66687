//! Timer-driven cache and observer behavior, run on a paused tokio clock.

use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_query::*;
use tokio::time::sleep;

fn counting_fetch(calls: &Arc<AtomicUsize>) -> QueryFn<usize> {
    let calls = Arc::clone(calls);
    query_fn(move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            sleep(Duration::from_millis(10)).await;
            Ok(n)
        }
    })
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pending_then_settled() {
    let cache = QueryCache::new();
    cache.set_future("user", async {
        sleep(Duration::from_millis(50)).await;
        Ok("Ada".to_string())
    });

    let entry = cache.get("user").unwrap();
    assert!(entry.in_flight);
    assert_eq!(entry.value, None);

    assert_eq!(cache.settled("user").await, Some(Ok("Ada".to_string())));

    let entry = cache.get("user").unwrap();
    assert!(!entry.in_flight);
    assert_eq!(entry.value.as_deref(), Some("Ada"));
    assert_eq!(cache.stats().fetches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_cache_time_evicts_on_settle() {
    let cache = QueryCache::new();
    cache.set_future_for("k", async { Ok(1) }, Some(Duration::ZERO));

    assert_eq!(cache.settled("k").await, Some(Ok(1)));
    assert!(!cache.has("k"));
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_waits_for_last_subscriber() {
    let cache = QueryCache::with_config(CacheConfig {
        cache_time: Some(Duration::from_secs(60)),
        stale_time: DEFAULT_STALE_TIME,
    });
    let subscription = cache.subscribe("k", || {});
    cache.set_value("k", 1);

    sleep(Duration::from_secs(120)).await;
    assert!(cache.has("k"));

    drop(subscription);
    sleep(Duration::from_secs(59)).await;
    assert!(cache.has("k"));

    sleep(Duration::from_secs(2)).await;
    assert!(!cache.has("k"));
}

#[tokio::test(start_paused = true)]
async fn test_new_subscriber_cancels_eviction() {
    let cache = QueryCache::with_config(CacheConfig {
        cache_time: Some(Duration::from_secs(10)),
        stale_time: DEFAULT_STALE_TIME,
    });
    cache.set_value("k", 1);

    sleep(Duration::from_secs(5)).await;
    let _subscription = cache.subscribe("k", || {});
    sleep(Duration::from_secs(30)).await;
    assert!(cache.has("k"));
}

#[tokio::test]
async fn test_clear_and_remove_notify_subscribers() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _subscription = cache.subscribe("k", move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    cache.set_value("k", 1);
    let after_write = calls.load(Ordering::SeqCst);

    cache.clear();
    assert_eq!(calls.load(Ordering::SeqCst), after_write + 1);
    assert!(!cache.has("k"));

    cache.set_value("k", 2);
    let after_write = calls.load(Ordering::SeqCst);
    assert!(cache.remove("k"));
    assert_eq!(calls.load(Ordering::SeqCst), after_write + 1);
}

#[tokio::test(start_paused = true)]
async fn test_infinite_cache_time_never_evicts() {
    let cache = QueryCache::new();
    cache.set_value_for("k", 1, None);
    sleep(Duration::from_secs(24 * 60 * 60)).await;
    assert_eq!(cache.get_query_data("k"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_later_write_supersedes_fetch() {
    let cache = QueryCache::new();
    cache.set_future("k", async {
        sleep(Duration::from_millis(10)).await;
        Ok(1)
    });
    cache.set_value("k", 2);

    sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.get_query_data("k"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_stored_as_error() {
    let cache: QueryCache<u32> = QueryCache::new();
    cache.set_future("k", async { Err(QueryError::new("boom")) });

    let outcome = cache.settled("k").await.unwrap();
    assert_eq!(outcome, Err(QueryError::new("boom")));

    let entry = cache.get("k").unwrap();
    assert_eq!(entry.value, None);
    assert_eq!(entry.error.unwrap().message(), "boom");
}

#[tokio::test(start_paused = true)]
async fn test_refetch_keeps_previous_value() {
    let cache = QueryCache::new();
    cache.set_value("k", 1);
    cache.set_future("k", async {
        sleep(Duration::from_millis(10)).await;
        Ok(2)
    });

    let entry = cache.get("k").unwrap();
    assert!(entry.in_flight);
    assert_eq!(entry.value, Some(1));
    assert_eq!(cache.settled("k").await, Some(Ok(2)));
}

// ============================================================================
// Observer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_mount_fetches_missing_entry() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let observer = QueryObserver::mount(
        &cache,
        "k",
        counting_fetch(&calls),
        QueryOptions::default(),
        || {},
    );

    assert!(observer.read().is_pending());
    let result = observer.resolve().await.unwrap();
    assert_eq!(result.data, 1);
    assert!(!result.is_refetching);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mount_skips_fresh_entry() {
    let cache = QueryCache::new();
    cache.set_value("k", 7);
    let calls = Arc::new(AtomicUsize::new(0));
    let observer = QueryObserver::mount(
        &cache,
        "k",
        counting_fetch(&calls),
        QueryOptions::default(),
        || {},
    );

    assert_eq!(observer.read().data(), Some(&7));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mount_refetches_stale_entry() {
    let cache = QueryCache::new();
    cache.set_value("k", 7);
    sleep(Duration::from_millis(200)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let observer = QueryObserver::mount(
        &cache,
        "k",
        counting_fetch(&calls),
        QueryOptions::default(),
        || {},
    );

    match observer.read() {
        QueryState::Ready(result) => {
            assert_eq!(result.data, 7);
            assert!(result.is_refetching);
        }
        other => panic!("expected stale data while refetching, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hydrated_entry_skips_first_refetch() {
    let cache = QueryCache::new();
    cache.hydrate([("k".to_string(), 7)]);
    sleep(Duration::from_secs(1)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let first = QueryObserver::mount(
        &cache,
        "k",
        counting_fetch(&calls),
        QueryOptions::default(),
        || {},
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!cache.peek("k").unwrap().hydrated);

    let _second = QueryObserver::mount(
        &cache,
        "k",
        counting_fetch(&calls),
        QueryOptions::default(),
        || {},
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    drop(first);
}

#[tokio::test(start_paused = true)]
async fn test_mount_never_policy() {
    let cache = QueryCache::new();
    cache.set_value("k", 7);
    sleep(Duration::from_secs(1)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::default().with_refetch_on_mount(Refetch::Never);
    let _observer = QueryObserver::mount(&cache, "k", counting_fetch(&calls), options, || {});
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_query_surfaces_error() {
    let cache: QueryCache<u32> = QueryCache::new();
    let fetch = query_fn(|| async { Err(QueryError::new("offline")) });
    let observer = QueryObserver::mount(&cache, "k", fetch, QueryOptions::default(), || {});

    let error = observer.resolve().await.unwrap_err();
    assert_eq!(error.message(), "offline");
    assert!(matches!(observer.read(), QueryState::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_window_focus_respects_staleness() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::default().with_refetch_on_window_focus(Refetch::IfStale);
    let observer = QueryObserver::mount(&cache, "k", counting_fetch(&calls), options, || {});
    observer.resolve().await.unwrap();

    assert!(!observer.on_window_focus());
    sleep(Duration::from_millis(200)).await;
    assert!(observer.on_window_focus());
    cache.settled("k").await;
    assert_eq!(observer.read().data(), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_always_refetches() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::default().with_refetch_on_reconnect(Refetch::Always);
    let observer = QueryObserver::mount(&cache, "k", counting_fetch(&calls), options, || {});
    observer.resolve().await.unwrap();

    assert!(observer.on_reconnect());
    assert!(!observer.on_reconnect(), "second trigger joins the in-flight fetch");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_interval_refetch_and_visibility() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::default().with_refetch_interval(Duration::from_secs(1), false);
    let observer = QueryObserver::mount(&cache, "k", counting_fetch(&calls), options, || {});

    sleep(Duration::from_millis(3500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    observer.set_visibility(false);
    sleep(Duration::from_secs(3)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    drop(observer);
    sleep(Duration::from_secs(3)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_observer_notified_on_settle() {
    let cache = QueryCache::new();
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let observer = QueryObserver::mount(
        &cache,
        "k",
        query_fn(|| async { Ok(1) }),
        QueryOptions::default(),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );

    observer.resolve().await.unwrap();
    // one for the fetch starting, one for it settling
    assert_eq!(notified.load(Ordering::SeqCst), 2);
}
