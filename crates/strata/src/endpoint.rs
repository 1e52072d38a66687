// File: src/endpoint.rs
// Purpose: Endpoint handlers, middleware chain and per-method endpoint modules

use axum::http::Method;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::request::RequestContext;
use crate::response::Response;

pub type HandlerResult = Result<Response, HandlerError>;
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// Request handler of an endpoint.
pub type Handler = Arc<dyn Fn(RequestContext) -> HandlerFuture + Send + Sync>;

/// Middleware wrapping the endpoint handlers below its directory.
pub type Middleware = Arc<dyn Fn(RequestContext, Next) -> HandlerFuture + Send + Sync>;

/// Box an async function as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Box an async function as a [`Middleware`].
pub fn middleware<F, Fut>(f: F) -> Middleware
where
    F: Fn(RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx, next| f(ctx, next).boxed())
}

// ============================================================================
// Middleware chain
// ============================================================================

/// The remainder of a middleware chain.
#[derive(Clone)]
pub struct Next {
    chain: Arc<[Middleware]>,
    index: usize,
    endpoint: Handler,
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &(self.chain.len() - self.index))
            .finish()
    }
}

impl Next {
    pub(crate) fn new(chain: Arc<[Middleware]>, endpoint: Handler) -> Self {
        Self {
            chain,
            index: 0,
            endpoint,
        }
    }

    /// Run the next middleware, or the endpoint handler once the chain is exhausted.
    pub fn run(self, ctx: RequestContext) -> HandlerFuture {
        match self.chain.get(self.index).cloned() {
            Some(current) => {
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                    endpoint: self.endpoint,
                };
                current(ctx, next)
            }
            None => (self.endpoint)(ctx),
        }
    }
}

// ============================================================================
// EndpointModule
// ============================================================================

/// Handlers of one endpoint route, keyed by method.
#[derive(Clone, Default)]
pub struct EndpointModule {
    handlers: Vec<(Method, Handler)>,
    fallback: Option<Handler>,
}

impl fmt::Debug for EndpointModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<&str> = self.handlers.iter().map(|(m, _)| m.as_str()).collect();
        f.debug_struct("EndpointModule")
            .field("methods", &methods)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl EndpointModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing an earlier one.
    pub fn on(mut self, method: Method, handler: Handler) -> Self {
        self.handlers.retain(|(m, _)| *m != method);
        self.handlers.push((method, handler));
        self
    }

    pub fn get(self, handler: Handler) -> Self {
        self.on(Method::GET, handler)
    }

    pub fn post(self, handler: Handler) -> Self {
        self.on(Method::POST, handler)
    }

    pub fn put(self, handler: Handler) -> Self {
        self.on(Method::PUT, handler)
    }

    pub fn patch(self, handler: Handler) -> Self {
        self.on(Method::PATCH, handler)
    }

    pub fn delete(self, handler: Handler) -> Self {
        self.on(Method::DELETE, handler)
    }

    /// Handler for every method without its own.
    pub fn any(mut self, handler: Handler) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn resolve(&self, method: &Method) -> Option<&Handler> {
        self.handlers
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, h)| h)
            .or(self.fallback.as_ref())
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.handlers.iter().map(|(m, _)| m)
    }
}
