mod demo;
mod hot_reload;

use anyhow::{Context, Result};
use axum::{
    body::to_bytes,
    extract::{Request as AxumRequest, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use strata::query::QueryCache;
use strata::{Config, Dispatcher, Request};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tower_livereload::LiveReloadLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::hot_reload::{spawn_reload_loop, DevWatcher};

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("strata=info,strata_server=info,tower_http=info")),
        )
        .init();

    let config = Config::load_default().unwrap_or_else(|e| {
        warn!("Failed to load config: {:#}, using defaults", e);
        Config::default()
    });

    info!(
        "{} v{} starting on {}:{}",
        config.project.name, config.project.version, config.server.host, config.server.port
    );

    let app = demo::build_app(config.routing.case_insensitive).context("Failed to build routes")?;
    info!(
        "{} pages, {} endpoints",
        app.pages().len(),
        app.endpoints().len()
    );

    // One cache for the whole process so preloaded queries are reused
    let queries = QueryCache::with_config(config.query.cache_config());
    let dispatcher = Dispatcher::new(app, config.clone()).with_query_cache(queries);

    let router = Router::new()
        .fallback(dispatch)
        .with_state(dispatcher)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let router = if config.dev.hot_reload {
        let livereload = LiveReloadLayer::new();
        match DevWatcher::new(&config.dev.watch_paths) {
            Ok(watcher) => {
                spawn_reload_loop(watcher, livereload.reloader());
                info!("Hot reload: enabled (page sources need a rebuild)");
            }
            Err(e) => warn!("Failed to create file watcher: {:#}", e),
        }
        router.layer(livereload)
    } else {
        router
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, router).await.context("Server error")?;
    Ok(())
}

/// Hand every request to the dispatcher.
async fn dispatch(State(dispatcher): State<Dispatcher>, request: AxumRequest) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Rejected request body for {}: {}", parts.uri, e);
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let request = Request {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };
    dispatcher.handle(request).await.into_response()
}
