// File: src/page.rs
// Purpose: Page and layout modules: preload, header hook and view
//
// Preloads run outermost layout first. Each sees the `meta` accumulated by
// the layouts above it; inner results overwrite outer keys. A redirect stops
// the chain before any deeper preload runs.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use strata_query::{QueryCache, QueryError};
use strata_router::Params;
use url::Url;

use crate::error::{panic_message, BoxError, RenderError};
use crate::request::RequestContext;
use crate::response::{Redirect, ResponseControl};
use crate::template::Template;

/// Page metadata accumulated by preloads.
pub type Meta = serde_json::Map<String, Value>;

pub type ViewFn = Arc<dyn Fn(ViewProps) -> Result<Template, BoxError> + Send + Sync>;
pub type PreloadFn =
    Arc<dyn Fn(PreloadContext) -> BoxFuture<'static, Result<PreloadResult, BoxError>> + Send + Sync>;
pub type HeadersFn = Arc<dyn Fn(&RequestContext, &Meta, &ResponseControl) + Send + Sync>;

/// A page or layout: a view plus optional preload and header hooks.
#[derive(Clone)]
pub struct ViewModule {
    view: ViewFn,
    preload: Option<PreloadFn>,
    headers: Option<HeadersFn>,
}

pub type PageModule = ViewModule;
pub type LayoutModule = ViewModule;

impl fmt::Debug for ViewModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModule")
            .field("preload", &self.preload.is_some())
            .field("headers", &self.headers.is_some())
            .finish()
    }
}

impl ViewModule {
    pub fn new<F>(view: F) -> Self
    where
        F: Fn(ViewProps) -> Result<Template, BoxError> + Send + Sync + 'static,
    {
        Self {
            view: Arc::new(view),
            preload: None,
            headers: None,
        }
    }

    pub fn with_preload<F, Fut>(mut self, preload: F) -> Self
    where
        F: Fn(PreloadContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PreloadResult, BoxError>> + Send + 'static,
    {
        self.preload = Some(Arc::new(move |ctx| preload(ctx).boxed()));
        self
    }

    /// Hook run on the server after preloading, before the view renders.
    pub fn with_headers<F>(mut self, headers: F) -> Self
    where
        F: Fn(&RequestContext, &Meta, &ResponseControl) + Send + Sync + 'static,
    {
        self.headers = Some(Arc::new(headers));
        self
    }

    pub fn has_preload(&self) -> bool {
        self.preload.is_some()
    }

    pub(crate) fn render(&self, props: ViewProps) -> Result<Template, RenderError> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| (self.view)(props))) {
            Ok(result) => result.map_err(RenderError::View),
            Err(payload) => Err(RenderError::Panic(panic_message(payload.as_ref()))),
        }
    }

    pub(crate) fn apply_headers(
        &self,
        ctx: &RequestContext,
        meta: &Meta,
        control: &ResponseControl,
    ) -> Result<(), RenderError> {
        let Some(hook) = &self.headers else {
            return Ok(());
        };
        std::panic::catch_unwind(AssertUnwindSafe(|| hook(ctx, meta, control)))
            .map_err(|payload| RenderError::Panic(panic_message(payload.as_ref())))
    }
}

/// What a view receives.
#[derive(Debug, Clone)]
pub struct ViewProps {
    pub url: Url,
    pub params: Params,
    pub meta: Meta,
    pub title: Option<String>,
    pub control: ResponseControl,
}

impl ViewProps {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

// ============================================================================
// Preload
// ============================================================================

#[derive(Debug, Clone)]
pub struct PreloadContext {
    pub url: Url,
    pub params: Params,
    /// Metadata from the enclosing layouts
    pub meta: Meta,
    pub control: ResponseControl,
    pub queries: PreloadQueries,
    /// The incoming request, on the server only
    pub request: Option<RequestContext>,
}

impl PreloadContext {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadResult {
    pub meta: Meta,
    pub title: Option<String>,
    pub redirect: Option<Redirect>,
}

impl PreloadResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn redirect(redirect: Redirect) -> Self {
        Self {
            redirect: Some(redirect),
            ..Self::default()
        }
    }
}

/// Query cache access during preload; every key touched is recorded for hydration.
#[derive(Clone)]
pub struct PreloadQueries {
    cache: QueryCache<Value>,
    touched: Arc<Mutex<HashSet<String>>>,
}

impl fmt::Debug for PreloadQueries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadQueries")
            .field("touched", &self.touched())
            .finish()
    }
}

impl PreloadQueries {
    pub fn new(cache: QueryCache<Value>) -> Self {
        Self {
            cache,
            touched: Arc::default(),
        }
    }

    fn touch(&self, key: &str) {
        self.touched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    pub fn cache(&self) -> &QueryCache<Value> {
        &self.cache
    }

    pub fn get_query_data(&self, key: &str) -> Option<Value> {
        self.touch(key);
        self.cache.get_query_data(key)
    }

    pub fn set_query_data(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.touch(&key);
        self.cache.set_query_data(key, value);
    }

    /// Settled value of `key`, fetching it when the cache has none.
    pub async fn fetch_query<F, Fut>(&self, key: impl Into<String>, fetch: F) -> Result<Value, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
    {
        let key = key.into();
        self.touch(&key);

        if let Some(entry) = self.cache.get(&key) {
            let settled = if entry.in_flight {
                self.cache.settled(&key).await
            } else {
                entry.outcome()
            };
            if let Some(outcome) = settled {
                return outcome;
            }
        }

        self.cache.set_future(key.clone(), fetch());
        match self.cache.settled(&key).await {
            Some(outcome) => outcome,
            None => Err(QueryError::new(format!("query `{key}` was removed while fetching"))),
        }
    }

    /// Keys read or written so far, sorted.
    pub fn touched(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .touched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

/// Merged outcome of one preload chain.
#[derive(Debug, Default)]
pub(crate) struct Preloaded {
    pub meta: Meta,
    pub title: Option<String>,
    pub redirect: Option<Redirect>,
}

/// Inputs shared by every preload in a chain.
pub(crate) struct PreloadScope {
    pub url: Url,
    pub params: Params,
    pub control: ResponseControl,
    pub queries: PreloadQueries,
    pub request: Option<RequestContext>,
}

/// Run preloads outermost first, stopping at the first redirect.
pub(crate) async fn run_preloads<'a, I>(stack: I, scope: &PreloadScope) -> Result<Preloaded, RenderError>
where
    I: IntoIterator<Item = (&'a str, &'a ViewModule)>,
{
    let mut out = Preloaded::default();

    for (route, module) in stack {
        let Some(preload) = module.preload.clone() else {
            continue;
        };
        let ctx = PreloadContext {
            url: scope.url.clone(),
            params: scope.params.clone(),
            meta: out.meta.clone(),
            control: scope.control.clone(),
            queries: scope.queries.clone(),
            request: scope.request.clone(),
        };

        let result = match AssertUnwindSafe(async move { preload(ctx).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(source)) => {
                return Err(RenderError::Preload {
                    route: route.to_string(),
                    source,
                })
            }
            Err(payload) => return Err(RenderError::Panic(panic_message(payload.as_ref()))),
        };

        out.meta.extend(result.meta);
        if result.title.is_some() {
            out.title = result.title;
        }
        if let Some(redirect) = result.redirect {
            scope.control.redirect(redirect);
        }
        if scope.control.redirect_target().is_some() {
            break;
        }
    }

    out.redirect = scope.control.redirect_target();
    Ok(out)
}
