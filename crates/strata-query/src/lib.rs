//! # Strata Query
//!
//! A keyed cache of fetched values, failures and in-flight fetches, shared by
//! server-side preloading and client-side data observers.
//!
//! - **Synchronous reads**: a stored value is visible to the next `get`
//! - **In-flight sharing**: concurrent readers of a key await one fetch
//! - **Eviction**: unobserved entries are dropped after their cache time
//! - **Hydration**: server-rendered values skip the first client refetch
//! - **Refetch triggers**: mount, window focus, reconnect and intervals
//!
//! ## Example
//!
//! ```rust
//! use strata_query::{query_fn, QueryCache, QueryObserver, QueryOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = QueryCache::new();
//!     let fetch = query_fn(|| async { Ok(42) });
//!
//!     let observer = QueryObserver::mount(&cache, "answer", fetch, QueryOptions::default(), || {});
//!     let result = observer.resolve().await.unwrap();
//!     assert_eq!(result.data, 42);
//! }
//! ```

pub mod cache;
pub mod error;
pub mod observer;
pub mod stats;

pub use cache::{
    CacheConfig, CacheEntry, Fetch, QueryCache, Subscription, DEFAULT_CACHE_TIME,
    DEFAULT_STALE_TIME,
};
pub use error::QueryError;
pub use observer::{query_fn, QueryFn, QueryObserver, QueryOptions, QueryResult, QueryState, Refetch};
pub use stats::CacheStats;
