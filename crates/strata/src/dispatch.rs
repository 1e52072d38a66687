// File: src/dispatch.rs
// Purpose: Request dispatch: endpoints first, then pages rendered as a streamed document
//
// Page responses move through three phases:
//
// 1. Preload: layouts then page, top-down. Errors become a 500 document,
//    a redirect becomes a redirect response.
// 2. Hold: deferred chunks are buffered for a bounded time (or until
//    complete for crawlers). Status, headers and redirects may still change.
// 3. Stream: the head is flushed, followed by the buffered and remaining
//    chunks in document order. The closing tags are always written.

use axum::body::Bytes;
use axum::http::{Method, StatusCode};
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use strata_query::QueryCache;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use crate::app::App;
use crate::config::Config;
use crate::document::{self, DOCUMENT_CLOSE};
use crate::endpoint::Next;
use crate::error::{panic_message, HandlerError, RenderError};
use crate::hydration::{HydrationContext, HydrationPayload};
use crate::page::{run_preloads, PreloadQueries, PreloadScope, ViewProps};
use crate::request::{Request, RequestContext};
use crate::response::{Body, Hold, Redirect, Response, ResponseControl};
use crate::template::{self, nest};

static CRAWLER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)bot|crawl|spider|slurp|bingpreview|facebookexternalhit|embedly|quora link preview|outbrain|pinterest|vkshare|w3c_validator|lighthouse",
    )
    .unwrap()
});

/// Whether `user_agent` belongs to a known crawler.
pub fn is_crawler(user_agent: &str) -> bool {
    CRAWLER_REGEX.is_match(user_agent)
}

type ChunkReceiver = mpsc::Receiver<Result<String, RenderError>>;

/// Turns requests into responses for one [`App`].
#[derive(Clone)]
pub struct Dispatcher {
    app: Arc<App>,
    config: Arc<Config>,
    queries: Option<QueryCache<Value>>,
}

impl Dispatcher {
    pub fn new(app: impl Into<Arc<App>>, config: impl Into<Arc<Config>>) -> Self {
        Self {
            app: app.into(),
            config: config.into(),
            queries: None,
        }
    }

    /// Share one query cache across requests instead of one per request.
    pub fn with_query_cache(mut self, cache: QueryCache<Value>) -> Self {
        self.queries = Some(cache);
        self
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn handle(&self, request: Request) -> Response {
        debug!("{} {}", request.method, request.uri);

        if let Some(found) = self.app.find_endpoint(request.path()) {
            let route = found.extra();
            match route.module.resolve(&request.method) {
                Some(handler) => {
                    let next = Next::new(Arc::clone(&route.middleware), Arc::clone(handler));
                    let ctx = RequestContext::new(request, found.params);
                    return self.run_endpoint(&route.pattern, next, ctx).await;
                }
                None if request.method != Method::GET => {
                    debug!("No {} handler for endpoint {}", request.method, route.pattern);
                    return Response::not_found();
                }
                None => {
                    debug!("No GET handler for endpoint {}, trying pages", route.pattern);
                }
            }
        }

        self.render_page(request).await
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    async fn run_endpoint(&self, pattern: &str, next: Next, ctx: RequestContext) -> Response {
        let outcome = AssertUnwindSafe(async move { next.run(ctx).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(HandlerError::Panic(panic_message(payload.as_ref()))));

        match outcome {
            Ok(response) => response,
            Err(err) => {
                error!("Endpoint {} failed: {}", pattern, err);
                self.error_response(&err.to_string())
            }
        }
    }

    fn error_response(&self, message: &str) -> Response {
        let shown = self.config.render.expose_errors.then_some(message);
        Response::html(document::server_error(shown)).with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    // ========================================================================
    // Pages
    // ========================================================================

    async fn render_page(&self, request: Request) -> Response {
        let url = match request_url(&request) {
            Ok(url) => url,
            Err(err) => {
                warn!("Unusable request url {}: {}", request.uri, err);
                return Response::text("Bad Request").with_status(StatusCode::BAD_REQUEST);
            }
        };
        let crawler =
            self.config.render.crawler_wait && request.user_agent().is_some_and(is_crawler);

        let found = self.app.resolve_page(request.path());
        let route = found.route;
        let status = if found.not_found {
            self.config.render.not_found_status()
        } else {
            StatusCode::OK
        };

        let control = ResponseControl::new(status);
        control.set_header("content-type", "text/html; charset=utf-8");

        let cache = self
            .queries
            .clone()
            .unwrap_or_else(|| QueryCache::with_config(self.config.query.cache_config()));
        let ctx = RequestContext::new(request, found.params.clone());
        let scope = PreloadScope {
            url,
            params: found.params,
            control: control.clone(),
            queries: PreloadQueries::new(cache),
            request: Some(ctx.clone()),
        };

        // Preload
        let preloaded = match run_preloads(route.stack(), &scope).await {
            Ok(preloaded) => preloaded,
            Err(err) => return self.render_failed(&route.pattern, &control, err),
        };
        if let Some(redirect) = &preloaded.redirect {
            return redirect_response(redirect, &control);
        }

        for (_, module) in route.stack() {
            if let Err(err) = module.apply_headers(&ctx, &preloaded.meta, &control) {
                return self.render_failed(&route.pattern, &control, err);
            }
        }

        // Render views, outermost first
        let props = ViewProps {
            url: scope.url.clone(),
            params: scope.params.clone(),
            meta: preloaded.meta.clone(),
            title: preloaded.title.clone(),
            control: control.clone(),
        };
        let mut templates = Vec::new();
        for (_, module) in route.stack() {
            match module.render(props.clone()) {
                Ok(template) => templates.push(template),
                Err(err) => return self.render_failed(&route.pattern, &control, err),
            }
        }
        if let Some(redirect) = control.redirect_target() {
            return redirect_response(&redirect, &control);
        }

        let (tx, mut rx) = mpsc::channel(16);
        let producer = tokio::spawn(template::produce(nest(templates), tx));

        // Hold
        let hold = if crawler {
            Hold::All
        } else {
            control.hold_setting().unwrap_or_else(|| self.default_hold())
        };
        let (buffered, finished) = match hold_chunks(&mut rx, hold).await {
            Ok(held) => held,
            Err(err) => {
                producer.abort();
                return self.render_failed(&route.pattern, &control, err);
            }
        };
        if let Some(redirect) = control.redirect_target() {
            producer.abort();
            return redirect_response(&redirect, &control);
        }

        // Stream
        let payload = HydrationPayload {
            data: scope
                .queries
                .cache()
                .collect_values(scope.queries.touched())
                .into_iter()
                .collect(),
            context: HydrationContext {
                url: scope.url.to_string(),
                pattern: route.pattern.clone(),
                params: scope.params.clone().into_iter().collect(),
                meta: preloaded.meta,
                title: preloaded.title.clone(),
                not_found: found.not_found,
            },
        };
        let scripts = payload.to_scripts().unwrap_or_else(|err| {
            warn!("Skipping hydration payload for {}: {}", route.pattern, err);
            String::new()
        });

        let (status, headers) = control.flush();
        let mut prefix = document::open(preloaded.title.as_deref(), &scripts);
        prefix.push_str(&buffered.concat());

        let body = if finished {
            prefix.push_str(DOCUMENT_CLOSE);
            Body::Text(prefix)
        } else {
            let tail = Tail {
                rx,
                control,
                route: route.pattern.clone(),
                producer,
            };
            Body::Stream(
                stream::once(async move { Bytes::from(prefix) })
                    .chain(stream_tail(tail))
                    .boxed(),
            )
        };

        Response {
            status,
            headers,
            body,
        }
    }

    fn default_hold(&self) -> Hold {
        let hold = self.config.render.stream_hold();
        if hold.is_zero() {
            Hold::Flush
        } else {
            Hold::For(hold)
        }
    }

    fn render_failed(&self, route: &str, control: &ResponseControl, err: RenderError) -> Response {
        error!("Rendering {} failed: {}", route, err);
        match control.redirect_target() {
            Some(redirect) => redirect_response(&redirect, control),
            None => self.error_response(&err.to_string()),
        }
    }
}

fn redirect_response(redirect: &Redirect, control: &ResponseControl) -> Response {
    debug!("Redirecting to {} ({})", redirect.location, redirect.status);
    let (_, mut headers) = control.flush();
    headers.set("location", &redirect.location);
    headers.set("content-type", "text/html; charset=utf-8");
    Response {
        status: redirect.status,
        headers,
        body: Body::Text(document::redirect_page(&redirect.location)),
    }
}

/// Absolute url of the request, from the `host` header when present.
fn request_url(request: &Request) -> Result<Url, url::ParseError> {
    let host = request
        .headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let scheme = request.uri.scheme_str().unwrap_or("http");
    let path = request.uri.path_and_query().map_or("/", |pq| pq.as_str());
    Url::parse(&format!("{scheme}://{host}{path}"))
}

/// Buffer chunks for the hold. Returns the chunks and whether rendering finished.
async fn hold_chunks(rx: &mut ChunkReceiver, hold: Hold) -> Result<(Vec<String>, bool), RenderError> {
    let mut buffered = Vec::new();

    match hold {
        Hold::All => {
            while let Some(chunk) = rx.recv().await {
                buffered.push(chunk?);
            }
            Ok((buffered, true))
        }
        Hold::For(duration) => {
            let deadline = Instant::now() + duration;
            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(chunk)) => buffered.push(chunk?),
                    Ok(None) => return Ok((buffered, true)),
                    Err(_) => return Ok((buffered, false)),
                }
            }
        }
        Hold::Flush => loop {
            match rx.try_recv() {
                Ok(chunk) => buffered.push(chunk?),
                Err(TryRecvError::Empty) => return Ok((buffered, false)),
                Err(TryRecvError::Disconnected) => return Ok((buffered, true)),
            }
        },
    }
}

struct Tail {
    rx: ChunkReceiver,
    control: ResponseControl,
    route: String,
    producer: JoinHandle<()>,
}

/// Remaining chunks after the flush, always ending with the closing tags.
fn stream_tail(tail: Tail) -> impl futures::Stream<Item = Bytes> + Send {
    stream::unfold(Some(tail), |state| async move {
        let mut tail = state?;
        let received = tail.rx.recv().await;

        if let Some(redirect) = tail.control.redirect_target() {
            debug!("Redirect to {} after flush, refreshing client", redirect.location);
            tail.producer.abort();
            let html = format!("{}{}", document::refresh_tag(&redirect.location), DOCUMENT_CLOSE);
            return Some((Bytes::from(html), None));
        }

        match received {
            Some(Ok(html)) => Some((Bytes::from(html), Some(tail))),
            Some(Err(err)) => {
                error!("Rendering {} failed after flush: {}", tail.route, err);
                Some((Bytes::from_static(DOCUMENT_CLOSE.as_bytes()), None))
            }
            None => Some((Bytes::from_static(DOCUMENT_CLOSE.as_bytes()), None)),
        }
    })
}
