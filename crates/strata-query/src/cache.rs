//! Keyed query cache shared by server preloading and client observers

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::QueryError;
use crate::stats::CacheStats;

/// How long an unobserved entry survives.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

/// Age after which an entry is refetched by observers.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_millis(100);

/// An in-flight fetch. Every clone resolves to the same outcome.
pub type Fetch<V> = Shared<BoxFuture<'static, Result<V, QueryError>>>;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Cache-wide defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// `None` never evicts; zero evicts as soon as nothing observes the entry.
    pub cache_time: Option<Duration>,
    pub stale_time: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_time: Some(DEFAULT_CACHE_TIME),
            stale_time: DEFAULT_STALE_TIME,
        }
    }
}

/// Point-in-time view of one entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: Option<V>,
    pub error: Option<QueryError>,
    pub in_flight: bool,
    pub hydrated: bool,
    pub updated_at: DateTime<Utc>,
    pub fetched_at: Instant,
}

impl<V: Clone> CacheEntry<V> {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_stale(&self, stale_time: Duration) -> bool {
        self.age() >= stale_time
    }

    /// Settled outcome, if the entry holds one.
    pub fn outcome(&self) -> Option<Result<V, QueryError>> {
        match (&self.value, &self.error) {
            (_, Some(error)) => Some(Err(error.clone())),
            (Some(value), None) => Some(Ok(value.clone())),
            (None, None) => None,
        }
    }
}

struct Slot<V> {
    value: Option<V>,
    error: Option<QueryError>,
    in_flight: Option<Fetch<V>>,
    epoch: u64,
    fetched_at: Instant,
    updated_at: DateTime<Utc>,
    hydrated: bool,
    cache_time: Option<Duration>,
    eviction: Option<JoinHandle<()>>,
}

impl<V: Clone> Slot<V> {
    fn snapshot(&self) -> CacheEntry<V> {
        CacheEntry {
            value: self.value.clone(),
            error: self.error.clone(),
            in_flight: self.in_flight.is_some(),
            hydrated: self.hydrated,
            updated_at: self.updated_at,
            fetched_at: self.fetched_at,
        }
    }
}

impl<V> Slot<V> {
    fn cancel_eviction(&mut self) {
        if let Some(timer) = self.eviction.take() {
            timer.abort();
        }
    }
}

impl<V> Drop for Slot<V> {
    fn drop(&mut self) {
        self.cancel_eviction();
    }
}

struct State<V> {
    slots: HashMap<String, Slot<V>>,
    subscribers: HashMap<String, HashMap<u64, Callback>>,
    stats: CacheStats,
}

impl<V> State<V> {
    fn observed(&self, key: &str) -> bool {
        self.subscribers.get(key).is_some_and(|subs| !subs.is_empty())
    }

    fn callbacks(&self, key: &str) -> Vec<Callback> {
        self.subscribers
            .get(key)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }
}

struct Inner<V> {
    state: Mutex<State<V>>,
    next_id: AtomicU64,
    epoch: AtomicU64,
    config: CacheConfig,
}

/// Shared handle to a keyed cache of values, errors and in-flight fetches.
///
/// Cloning is cheap and every clone sees the same entries. Writes to the same
/// key are last-writer-wins; a fetch superseded by a later write never lands.
///
/// ```
/// use strata_query::QueryCache;
///
/// let cache = QueryCache::new();
/// cache.set_value("user:1", "Ada".to_string());
/// assert_eq!(cache.get_query_data("user:1").as_deref(), Some("Ada"));
/// ```
pub struct QueryCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("QueryCache")
            .field("entries", &state.slots.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<V> Default for QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

struct WeakCache<V>(Weak<Inner<V>>);

impl<V> WeakCache<V> {
    fn upgrade(&self) -> Option<QueryCache<V>> {
        self.0.upgrade().map(|inner| QueryCache { inner })
    }
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    slots: HashMap::new(),
                    subscribers: HashMap::new(),
                    stats: CacheStats::default(),
                }),
                next_id: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, State<V>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn downgrade(&self) -> WeakCache<V> {
        WeakCache(Arc::downgrade(&self.inner))
    }

    fn next_epoch(&self) -> u64 {
        self.inner.epoch.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Snapshot of `key`, counted in [`stats`](Self::stats).
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let mut state = self.state();
        let entry = state.slots.get(key).map(Slot::snapshot);
        if entry.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        entry
    }

    /// Snapshot of `key` without touching the counters.
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.state().slots.get(key).map(Slot::snapshot)
    }

    pub fn has(&self, key: &str) -> bool {
        self.state().slots.contains_key(key)
    }

    pub fn get_query_data(&self, key: &str) -> Option<V> {
        self.peek(key).and_then(|entry| entry.value)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().slots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.state().stats.clone()
    }

    /// Current values for `keys`, skipping keys without one.
    pub fn collect_values<I, S>(&self, keys: I) -> Vec<(String, V)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let state = self.state();
        keys.into_iter()
            .filter_map(|key| {
                let key = key.as_ref();
                let value = state.slots.get(key)?.value.clone()?;
                Some((key.to_string(), value))
            })
            .collect()
    }

    /// Wait for the in-flight fetch of `key`, if any, and return the
    /// entry's settled outcome.
    pub async fn settled(&self, key: &str) -> Option<Result<V, QueryError>> {
        let (fetch, epoch) = {
            let state = self.state();
            let slot = state.slots.get(key)?;
            match &slot.in_flight {
                Some(fetch) => (fetch.clone(), slot.epoch),
                None => return slot.snapshot().outcome(),
            }
        };

        let outcome = fetch.await;
        self.complete(key, epoch, outcome.clone());
        Some(outcome)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn set_value(&self, key: impl Into<String>, value: V) {
        self.set_value_for(key, value, self.inner.config.cache_time);
    }

    pub fn set_value_for(&self, key: impl Into<String>, value: V, cache_time: Option<Duration>) {
        let epoch = self.next_epoch();
        self.store(key.into(), cache_time, Some(value), None, false, epoch);
    }

    pub fn set_query_data(&self, key: impl Into<String>, value: V) {
        self.set_value(key, value);
    }

    /// Store an in-flight fetch for `key`.
    ///
    /// A previous value stays readable while the fetch runs. The fetch is
    /// driven on the current tokio runtime; without one it is driven by
    /// whoever awaits [`settled`](Self::settled) or the returned handle.
    pub fn set_future<F>(&self, key: impl Into<String>, fetch: F) -> Fetch<V>
    where
        F: Future<Output = Result<V, QueryError>> + Send + 'static,
    {
        self.set_future_for(key, fetch, self.inner.config.cache_time)
    }

    pub fn set_future_for<F>(
        &self,
        key: impl Into<String>,
        fetch: F,
        cache_time: Option<Duration>,
    ) -> Fetch<V>
    where
        F: Future<Output = Result<V, QueryError>> + Send + 'static,
    {
        let key = key.into();
        let shared = fetch.boxed().shared();
        let epoch = self.next_epoch();
        self.store(key.clone(), cache_time, None, Some(shared.clone()), false, epoch);

        if let Ok(handle) = Handle::try_current() {
            let cache = self.downgrade();
            let task = shared.clone();
            handle.spawn(async move {
                let outcome = task.await;
                if let Some(cache) = cache.upgrade() {
                    cache.complete(&key, epoch, outcome);
                }
            });
        }

        shared
    }

    /// Install server-rendered values, flagged as hydrated.
    pub fn hydrate<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, V)>,
    {
        for (key, value) in entries {
            let epoch = self.next_epoch();
            self.store(key, self.inner.config.cache_time, Some(value), None, true, epoch);
        }
    }

    /// Return and clear the hydrated flag of `key`.
    pub fn take_hydrated(&self, key: &str) -> bool {
        self.state()
            .slots
            .get_mut(key)
            .map(|slot| std::mem::take(&mut slot.hydrated))
            .unwrap_or(false)
    }

    pub fn remove(&self, key: &str) -> bool {
        let callbacks = {
            let mut state = self.state();
            if state.slots.remove(key).is_none() {
                return false;
            }
            state.callbacks(key)
        };
        callbacks.iter().for_each(|notify| notify());
        true
    }

    /// Drop every entry and reset statistics. Subscribers of dropped keys are notified.
    pub fn clear(&self) {
        let callbacks: Vec<Callback> = {
            let mut state = self.state();
            let keys: Vec<String> = state.slots.drain().map(|(key, _)| key).collect();
            state.stats = CacheStats::default();
            keys.iter().flat_map(|key| state.callbacks(key)).collect()
        };
        callbacks.iter().for_each(|notify| notify());
    }

    fn store(
        &self,
        key: String,
        cache_time: Option<Duration>,
        value: Option<V>,
        in_flight: Option<Fetch<V>>,
        hydrated: bool,
        epoch: u64,
    ) {
        let callbacks = {
            let mut state = self.state();
            let refetching = in_flight.is_some();
            let previous = state.slots.remove(&key);

            let (value, fetched_at, updated_at) = match (value, previous) {
                (Some(value), _) => (Some(value), Instant::now(), Utc::now()),
                (None, Some(mut prev)) if refetching => {
                    (prev.value.take(), prev.fetched_at, prev.updated_at)
                }
                _ => (None, Instant::now(), Utc::now()),
            };

            if refetching {
                state.stats.fetches += 1;
            }

            state.slots.insert(
                key.clone(),
                Slot {
                    value,
                    error: None,
                    in_flight,
                    epoch,
                    fetched_at,
                    updated_at,
                    hydrated,
                    cache_time,
                    eviction: None,
                },
            );

            if !refetching {
                self.release(&mut state, &key, false);
            }
            state.callbacks(&key)
        };

        callbacks.iter().for_each(|notify| notify());
    }

    fn complete(&self, key: &str, epoch: u64, outcome: Result<V, QueryError>) {
        let callbacks = {
            let mut state = self.state();
            let Some(slot) = state.slots.get_mut(key) else {
                return;
            };
            if slot.epoch != epoch || slot.in_flight.is_none() {
                return;
            }

            slot.in_flight = None;
            slot.fetched_at = Instant::now();
            slot.updated_at = Utc::now();
            match outcome {
                Ok(value) => {
                    slot.value = Some(value);
                    slot.error = None;
                }
                Err(error) => {
                    debug!(key, error = %error, "query failed");
                    slot.value = None;
                    slot.error = Some(error);
                }
            }

            self.release(&mut state, key, true);
            state.callbacks(key)
        };

        callbacks.iter().for_each(|notify| notify());
    }

    // ========================================================================
    // Subscriptions and eviction
    // ========================================================================

    /// Register `callback` for changes to `key`.
    ///
    /// While at least one subscription exists the entry is never evicted.
    /// Dropping the returned guard unsubscribes.
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Subscription<V>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state();
        state
            .subscribers
            .entry(key.clone())
            .or_default()
            .insert(id, Arc::new(callback));
        if let Some(slot) = state.slots.get_mut(&key) {
            slot.cancel_eviction();
        }
        drop(state);

        Subscription {
            cache: self.clone(),
            key,
            id,
        }
    }

    fn unsubscribe(&self, key: &str, id: u64) {
        let mut state = self.state();
        if let Some(subs) = state.subscribers.get_mut(key) {
            subs.remove(&id);
            if subs.is_empty() {
                state.subscribers.remove(key);
            }
        }
        self.release(&mut state, key, true);
    }

    /// Start the eviction countdown for an unobserved, settled entry.
    ///
    /// With `settling` set, a zero cache time removes the entry right away;
    /// otherwise it is removed once the runtime gets to the timer.
    fn release(&self, state: &mut State<V>, key: &str, settling: bool) {
        if state.observed(key) {
            return;
        }
        let Some(slot) = state.slots.get_mut(key) else {
            return;
        };
        if slot.in_flight.is_some() {
            return;
        }
        slot.cancel_eviction();
        let (cache_time, epoch) = (slot.cache_time, slot.epoch);

        match cache_time {
            None => {}
            Some(delay) if delay.is_zero() && settling => {
                state.slots.remove(key);
                state.stats.evictions += 1;
                debug!(key, "query evicted");
            }
            Some(delay) => match Handle::try_current() {
                Ok(handle) => {
                    let cache = self.downgrade();
                    let owned = key.to_string();
                    let timer = handle.spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(cache) = cache.upgrade() {
                            cache.evict_if_current(&owned, epoch);
                        }
                    });
                    if let Some(slot) = state.slots.get_mut(key) {
                        slot.eviction = Some(timer);
                    }
                }
                Err(_) => debug!(key, "no runtime, eviction timer skipped"),
            },
        }
    }

    fn evict_if_current(&self, key: &str, epoch: u64) {
        let mut state = self.state();
        let observed = state.observed(key);
        let Some(slot) = state.slots.get_mut(key) else {
            return;
        };
        if slot.epoch != epoch || slot.in_flight.is_some() || observed {
            return;
        }
        // The timer is this task; detach instead of aborting it.
        drop(slot.eviction.take());
        state.slots.remove(key);
        state.stats.evictions += 1;
        debug!(key, "query evicted");
    }
}

/// Guard returned by [`QueryCache::subscribe`].
pub struct Subscription<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: QueryCache<V>,
    key: String,
    id: u64,
}

impl<V> Subscription<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<V> fmt::Debug for Subscription<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl<V> Drop for Subscription<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cache.unsubscribe(&self.key, self.id);
    }
}
