// File: src/navigation/mod.rs
// Purpose: Client-side navigation
//
// A [`NavigationController`] owns the client location. Navigating pushes (or
// replaces) a history entry, runs the preloads of the target page stack and
// only then commits the new location.
//
// Every resolution carries a generation number. Only the latest generation
// may commit; a superseded resolution still runs to completion (its cache
// writes stay) but never becomes current. All pending `navigate` calls
// resolve together once the latest generation settles.

mod host;
mod link;

pub use host::{HistoryState, MemoryHost, NavigationHost, ScrollPosition};
pub use link::{should_intercept, AnchorInfo, ClickEvent, Link, StyledLink};

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use strata_query::QueryCache;
use strata_router::Params;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::app::App;
use crate::error::NavigationError;
use crate::hydration::HydrationPayload;
use crate::page::{run_preloads, Meta, PreloadQueries, PreloadScope};
use crate::response::ResponseControl;

/// Preload redirects followed within one navigation.
pub const MAX_REDIRECTS: usize = 10;

const SCROLL_KEY_PREFIX: &str = "strata:";

#[derive(Debug, Clone, PartialEq)]
pub struct NavigateOptions {
    /// Replace the current history entry instead of pushing one
    pub replace: bool,
    /// Restore or reset the scroll position after commit
    pub scroll: bool,
    /// Stored with the history entry
    pub data: Option<Value>,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            replace: false,
            scroll: true,
            data: None,
        }
    }
}

impl NavigateOptions {
    pub fn replace() -> Self {
        Self {
            replace: true,
            ..Self::default()
        }
    }

    pub fn with_scroll(mut self, scroll: bool) -> Self {
        self.scroll = scroll;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationSnapshot {
    pub current: Url,
    /// Target of a navigation still resolving
    pub pending: Option<Url>,
}

/// The page a committed navigation resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub url: Url,
    pub pattern: String,
    pub params: Params,
    pub meta: Meta,
    pub title: Option<String>,
    pub not_found: bool,
}

type Listener = Arc<dyn Fn(&LocationSnapshot) + Send + Sync>;

#[derive(Debug, Clone)]
struct Settled {
    generation: u64,
    outcome: Result<Url, NavigationError>,
}

struct NavState {
    current: Url,
    pending: Option<Url>,
    last_rendered_id: String,
    next_index: u64,
    generation: u64,
    rendered: Option<RenderedPage>,
}

struct Inner {
    app: Arc<App>,
    cache: QueryCache<Value>,
    host: Arc<dyn NavigationHost>,
    state: Mutex<NavState>,
    settled: watch::Sender<Settled>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener: AtomicU64,
}

#[derive(Clone)]
pub struct NavigationController {
    inner: Arc<Inner>,
}

impl fmt::Debug for NavigationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationController")
            .field("location", &self.location())
            .finish()
    }
}

impl NavigationController {
    /// Take over the host's current entry as history index 0.
    pub fn new(app: Arc<App>, cache: QueryCache<Value>, host: Arc<dyn NavigationHost>) -> Self {
        let current = host.location();
        let id = new_entry_id();
        host.replace_state(
            HistoryState {
                id: id.clone(),
                index: 0,
                data: None,
            },
            &current,
        );

        let (settled, _) = watch::channel(Settled {
            generation: 0,
            outcome: Ok(current.clone()),
        });

        Self {
            inner: Arc::new(Inner {
                app,
                cache,
                host,
                state: Mutex::new(NavState {
                    current,
                    pending: None,
                    last_rendered_id: id,
                    next_index: 0,
                    generation: 0,
                    rendered: None,
                }),
                settled,
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, NavState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn host(&self) -> &Arc<dyn NavigationHost> {
        &self.inner.host
    }

    pub fn cache(&self) -> &QueryCache<Value> {
        &self.inner.cache
    }

    pub fn location(&self) -> LocationSnapshot {
        let state = self.state();
        LocationSnapshot {
            current: state.current.clone(),
            pending: state.pending.clone(),
        }
    }

    /// Page of the last committed navigation (or of the hydrated first render).
    pub fn rendered(&self) -> Option<RenderedPage> {
        self.state().rendered.clone()
    }

    /// Start from a server-rendered page: install its data and context.
    pub fn hydrate(&self, payload: HydrationPayload) {
        let context = payload.install(&self.inner.cache);
        let mut state = self.state();
        let url = Url::parse(&context.url).unwrap_or_else(|_| state.current.clone());
        state.rendered = Some(RenderedPage {
            url,
            pattern: context.pattern,
            params: context.params.into_iter().collect(),
            meta: context.meta,
            title: context.title,
            not_found: context.not_found,
        });
    }

    /// Call `listener` whenever `current` or `pending` changes.
    pub fn subscribe<F>(&self, listener: F) -> LocationSubscription
    where
        F: Fn(&LocationSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        LocationSubscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    fn notify(&self) {
        let snapshot = self.location();
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Navigate to `target`, resolved against the current location.
    ///
    /// Resolves to whether the committed location is `target`. A cross-origin
    /// target hands off to the host and never resolves.
    pub async fn navigate(&self, target: &str, options: NavigateOptions) -> Result<bool, NavigationError> {
        let base = self.inner.host.location();
        let url = base.join(target).map_err(|err| NavigationError::InvalidUrl {
            target: target.to_string(),
            reason: err.to_string(),
        })?;

        if url.origin() != base.origin() {
            debug!("Leaving app for {}", url);
            self.inner.host.assign(&url);
            return std::future::pending().await;
        }

        self.push_entry(&url, options.replace, options.data);
        self.resolve(url, options.scroll).await
    }

    /// The host moved through history (back/forward).
    pub async fn handle_popstate(&self, state: Option<HistoryState>) -> Result<bool, NavigationError> {
        if let Some(entry) = &state {
            let mut nav = self.state();
            nav.next_index = nav.next_index.max(entry.index);
        }
        let url = self.inner.host.location();
        self.resolve(url, true).await
    }

    fn push_entry(&self, url: &Url, replace: bool, data: Option<Value>) {
        let host = &self.inner.host;
        let id = new_entry_id();
        if replace {
            let index = host.history_state().map_or(0, |s| s.index);
            host.replace_state(HistoryState { id, index, data }, url);
        } else {
            let index = {
                let mut state = self.state();
                state.next_index += 1;
                state.next_index
            };
            host.push_state(HistoryState { id, index, data }, url);
        }
    }

    async fn resolve(&self, target: Url, scroll: bool) -> Result<bool, NavigationError> {
        let generation = {
            let mut state = self.state();
            self.save_scroll(&state.last_rendered_id);
            state.generation += 1;
            state.pending = Some(target.clone());
            state.generation
        };
        self.notify();

        let mut settled = self.inner.settled.subscribe();
        let outcome = self.load(target.clone(), generation).await;
        self.commit(generation, outcome, scroll);

        let latest = settled
            .wait_for(|s| s.generation >= generation)
            .await
            .map(|s| s.clone())
            .map_err(|_| NavigationError::Closed)?;

        latest.outcome.map(|committed| committed == target)
    }

    fn is_latest(&self, generation: u64) -> bool {
        self.state().generation == generation
    }

    /// Run the preloads for `url`, following same-origin redirects.
    async fn load(&self, mut url: Url, generation: u64) -> Result<RenderedPage, NavigationError> {
        for _ in 0..=MAX_REDIRECTS {
            let found = self.inner.app.resolve_page(url.path());
            let scope = PreloadScope {
                url: url.clone(),
                params: found.params.clone(),
                control: ResponseControl::default(),
                queries: PreloadQueries::new(self.inner.cache.clone()),
                request: None,
            };

            let preloaded = run_preloads(found.route.stack(), &scope)
                .await
                .map_err(|err| NavigationError::Preload {
                    url: url.to_string(),
                    message: err.to_string(),
                })?;

            let Some(redirect) = preloaded.redirect else {
                return Ok(RenderedPage {
                    url,
                    pattern: found.route.pattern.clone(),
                    params: found.params,
                    meta: preloaded.meta,
                    title: preloaded.title,
                    not_found: found.not_found,
                });
            };

            let next = url.join(&redirect.location).map_err(|err| NavigationError::InvalidUrl {
                target: redirect.location.clone(),
                reason: err.to_string(),
            })?;
            if next.origin() != url.origin() {
                debug!("Preload redirected off-origin to {}", next);
                self.inner.host.assign(&next);
                return std::future::pending().await;
            }

            debug!("Preload redirected {} to {}", url, next);
            if self.is_latest(generation) {
                self.push_entry(&next, true, None);
                self.state().pending = Some(next.clone());
                self.notify();
            }
            url = next;
        }

        Err(NavigationError::TooManyRedirects(url.to_string()))
    }

    fn commit(&self, generation: u64, outcome: Result<RenderedPage, NavigationError>, scroll: bool) {
        let settled = {
            let mut state = self.state();
            if state.generation != generation {
                debug!("Navigation {} superseded by {}", generation, state.generation);
                return;
            }
            state.pending = None;
            match outcome {
                Ok(page) => {
                    debug!("Committed navigation to {}", page.url);
                    let url = page.url.clone();
                    state.current = url.clone();
                    state.last_rendered_id = self
                        .inner
                        .host
                        .history_state()
                        .map(|s| s.id)
                        .unwrap_or_default();
                    state.rendered = Some(page);
                    Ok(url)
                }
                Err(err) => {
                    warn!("Navigation failed: {}", err);
                    Err(err)
                }
            }
        };

        self.notify();
        if scroll && settled.is_ok() {
            self.restore_scroll();
        }
        self.inner.settled.send_replace(Settled {
            generation,
            outcome: settled,
        });
    }

    // ========================================================================
    // Scroll
    // ========================================================================

    fn save_scroll(&self, entry_id: &str) {
        if entry_id.is_empty() {
            return;
        }
        let host = &self.inner.host;
        if let Ok(raw) = serde_json::to_string(&host.scroll_position()) {
            host.session_set(&scroll_key(entry_id), raw);
        }
    }

    /// Saved position of the entry, else its `#anchor`, else the top.
    fn restore_scroll(&self) {
        let host = &self.inner.host;

        let saved = host
            .history_state()
            .and_then(|entry| host.session_get(&scroll_key(&entry.id)))
            .and_then(|raw| serde_json::from_str::<ScrollPosition>(&raw).ok());
        if let Some(position) = saved {
            host.scroll_to(position);
            return;
        }

        let location = host.location();
        if let Some(anchor) = location.fragment().filter(|f| !f.is_empty()) {
            if host.scroll_to_anchor(anchor) {
                return;
            }
        }

        host.scroll_to(ScrollPosition::default());
    }
}

fn scroll_key(entry_id: &str) -> String {
    format!("{SCROLL_KEY_PREFIX}{entry_id}")
}

fn new_entry_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// Keeps a location listener registered until dropped.
pub struct LocationSubscription {
    inner: Weak<Inner>,
    id: u64,
}

impl fmt::Debug for LocationSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationSubscription").field("id", &self.id).finish()
    }
}

impl Drop for LocationSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}
