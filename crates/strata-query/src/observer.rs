//! Data-fetching observer: the consumer side of [`QueryCache`]
//!
//! An observer ties one key and one fetch function to the cache. On mount it
//! fetches when the entry is missing or stale, unless a fetch is already in
//! flight or the entry came from the server-rendered payload. Reads return an
//! explicit three-way [`QueryState`]; callers decide how to wait.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::{CacheConfig, QueryCache, Subscription, DEFAULT_CACHE_TIME, DEFAULT_STALE_TIME};
use crate::error::QueryError;

/// Fetch function for one query key.
pub type QueryFn<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync>;

/// Box an async closure as a [`QueryFn`].
pub fn query_fn<V, F, Fut>(f: F) -> QueryFn<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, QueryError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// When a trigger (mount, focus, reconnect) refetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Refetch {
    Never,
    #[default]
    IfStale,
    Always,
}

impl Refetch {
    pub fn allows(self, stale: bool) -> bool {
        match self {
            Refetch::Never => false,
            Refetch::IfStale => stale,
            Refetch::Always => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// `None` keeps the entry forever once unobserved.
    pub cache_time: Option<Duration>,
    pub stale_time: Duration,
    pub refetch_on_mount: Refetch,
    pub refetch_on_window_focus: Refetch,
    pub refetch_on_reconnect: Refetch,
    pub refetch_interval: Option<Duration>,
    pub refetch_interval_in_background: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            cache_time: Some(DEFAULT_CACHE_TIME),
            stale_time: DEFAULT_STALE_TIME,
            refetch_on_mount: Refetch::IfStale,
            refetch_on_window_focus: Refetch::Never,
            refetch_on_reconnect: Refetch::Never,
            refetch_interval: None,
            refetch_interval_in_background: false,
        }
    }
}

impl QueryOptions {
    /// Defaults taking cache and stale times from the cache configuration.
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            cache_time: config.cache_time,
            stale_time: config.stale_time,
            ..Self::default()
        }
    }

    pub fn with_cache_time(mut self, cache_time: Option<Duration>) -> Self {
        self.cache_time = cache_time;
        self
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_refetch_on_mount(mut self, policy: Refetch) -> Self {
        self.refetch_on_mount = policy;
        self
    }

    pub fn with_refetch_on_window_focus(mut self, policy: Refetch) -> Self {
        self.refetch_on_window_focus = policy;
        self
    }

    pub fn with_refetch_on_reconnect(mut self, policy: Refetch) -> Self {
        self.refetch_on_reconnect = policy;
        self
    }

    pub fn with_refetch_interval(mut self, every: Duration, in_background: bool) -> Self {
        self.refetch_interval = Some(every);
        self.refetch_interval_in_background = in_background;
        self
    }
}

/// Data of a settled query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<V> {
    pub data: V,
    /// A newer fetch is running; `data` is the previous value.
    pub is_refetching: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<V> {
    /// No value yet, a fetch is in flight.
    Pending,
    Ready(QueryResult<V>),
    /// The last fetch failed. Surface this, do not treat it as data.
    Failed(QueryError),
}

impl<V> QueryState<V> {
    pub fn is_pending(&self) -> bool {
        matches!(self, QueryState::Pending)
    }

    pub fn data(&self) -> Option<&V> {
        match self {
            QueryState::Ready(result) => Some(&result.data),
            _ => None,
        }
    }
}

/// One mounted consumer of a query key.
///
/// Dropping the observer unsubscribes it and stops its interval task.
pub struct QueryObserver<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: QueryCache<V>,
    key: String,
    fetch: QueryFn<V>,
    options: QueryOptions,
    visible: Arc<AtomicBool>,
    interval: Option<JoinHandle<()>>,
    _subscription: Subscription<V>,
}

impl<V> QueryObserver<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Subscribe to `key` and fetch if the entry needs it.
    pub fn mount<F>(
        cache: &QueryCache<V>,
        key: impl Into<String>,
        fetch: QueryFn<V>,
        options: QueryOptions,
        on_change: F,
    ) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = key.into();
        let subscription = cache.subscribe(key.clone(), on_change);
        let mut observer = Self {
            cache: cache.clone(),
            key,
            fetch,
            options,
            visible: Arc::new(AtomicBool::new(true)),
            interval: None,
            _subscription: subscription,
        };

        match cache.peek(&observer.key) {
            Some(entry) => {
                let stale = entry.is_stale(observer.options.stale_time);
                if observer.options.refetch_on_mount.allows(stale)
                    && !entry.in_flight
                    && !entry.hydrated
                {
                    observer.start_fetch();
                }
                cache.take_hydrated(&observer.key);
            }
            None => observer.start_fetch(),
        }

        observer.interval = observer.spawn_interval();
        observer
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Current state. A missing entry (e.g. evicted) starts a new fetch.
    pub fn read(&self) -> QueryState<V> {
        let Some(entry) = self.cache.get(&self.key) else {
            self.start_fetch();
            return QueryState::Pending;
        };

        match (entry.error, entry.value) {
            (Some(error), _) => QueryState::Failed(error),
            (None, Some(data)) => QueryState::Ready(QueryResult {
                data,
                is_refetching: entry.in_flight,
                updated_at: entry.updated_at,
            }),
            (None, None) => QueryState::Pending,
        }
    }

    /// Wait until the query is ready or failed.
    pub async fn resolve(&self) -> Result<QueryResult<V>, QueryError> {
        loop {
            match self.read() {
                QueryState::Ready(result) => return Ok(result),
                QueryState::Failed(error) => return Err(error),
                QueryState::Pending => {
                    self.cache.settled(&self.key).await;
                }
            }
        }
    }

    /// Start a fetch unless one is already in flight.
    pub fn refetch(&self) -> bool {
        fetch_if_idle(&self.cache, &self.key, &self.fetch, self.options.cache_time)
    }

    /// The window regained focus.
    pub fn on_window_focus(&self) -> bool {
        self.visible.store(true, Ordering::Relaxed);
        self.trigger(self.options.refetch_on_window_focus)
    }

    /// Page visibility changed. Becoming visible counts as a focus.
    pub fn set_visibility(&self, visible: bool) -> bool {
        self.visible.store(visible, Ordering::Relaxed);
        visible && self.trigger(self.options.refetch_on_window_focus)
    }

    /// The network connection came back.
    pub fn on_reconnect(&self) -> bool {
        self.trigger(self.options.refetch_on_reconnect)
    }

    fn trigger(&self, policy: Refetch) -> bool {
        let stale = self
            .cache
            .peek(&self.key)
            .map_or(true, |entry| entry.is_stale(self.options.stale_time));
        policy.allows(stale) && self.refetch()
    }

    fn start_fetch(&self) {
        self.cache
            .set_future_for(self.key.clone(), (self.fetch)(), self.options.cache_time);
    }

    fn spawn_interval(&self) -> Option<JoinHandle<()>> {
        let period = self.options.refetch_interval.filter(|p| !p.is_zero())?;
        let handle = Handle::try_current().ok()?;

        let cache = self.cache.clone();
        let key = self.key.clone();
        let fetch = Arc::clone(&self.fetch);
        let cache_time = self.options.cache_time;
        let in_background = self.options.refetch_interval_in_background;
        let visible = Arc::clone(&self.visible);

        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if in_background || visible.load(Ordering::Relaxed) {
                    fetch_if_idle(&cache, &key, &fetch, cache_time);
                }
            }
        }))
    }
}

impl<V> Drop for QueryObserver<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(interval) = self.interval.take() {
            interval.abort();
        }
    }
}

fn fetch_if_idle<V>(
    cache: &QueryCache<V>,
    key: &str,
    fetch: &QueryFn<V>,
    cache_time: Option<Duration>,
) -> bool
where
    V: Clone + Send + Sync + 'static,
{
    if cache.peek(key).is_some_and(|entry| entry.in_flight) {
        return false;
    }
    cache.set_future_for(key.to_string(), fetch(), cache_time);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refetch_policy() {
        assert!(!Refetch::Never.allows(true));
        assert!(Refetch::IfStale.allows(true));
        assert!(!Refetch::IfStale.allows(false));
        assert!(Refetch::Always.allows(false));
    }

    #[test]
    fn test_options_from_config() {
        let options = QueryOptions::from_config(CacheConfig {
            cache_time: None,
            stale_time: Duration::from_secs(1),
        });
        assert_eq!(options.cache_time, None);
        assert_eq!(options.stale_time, Duration::from_secs(1));
        assert_eq!(options.refetch_on_mount, Refetch::IfStale);
    }
}
