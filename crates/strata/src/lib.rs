// Strata - file-system routed full-stack framework core
// Request dispatch, streamed page rendering, hydration and client navigation

pub mod app;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod endpoint;
pub mod error;
pub mod hydration;
pub mod navigation;
pub mod page;
pub mod request;
pub mod response;
pub mod template;

// Re-export Maud for views
pub use maud::{html as maud, Markup, PreEscaped};

// Re-export framework types
pub use app::{App, AppBuilder, EndpointRoute, PageMatch, PageRoute};
pub use config::Config;
pub use dispatch::{is_crawler, Dispatcher};
pub use endpoint::{handler, middleware, EndpointModule, Handler, HandlerResult, Middleware, Next};
pub use error::{BoxError, HandlerError, HydrationError, NavigationError, RegistryError, RenderError};
pub use hydration::{HydrationContext, HydrationPayload};
pub use navigation::{
    LocationSnapshot, LocationSubscription, NavigateOptions, NavigationController, RenderedPage,
};
pub use page::{
    LayoutModule, Meta, PageModule, PreloadContext, PreloadQueries, PreloadResult, ViewModule,
    ViewProps,
};
pub use request::{QueryParams, Request, RequestContext};
pub use response::{Body, Hold, Redirect, Response, ResponseControl, ResponseHeaders};
pub use template::{Chunk, Template};

// Re-export the routing and query crates
pub use strata_query as query;
pub use strata_router as router;

// Re-export commonly used types from dependencies
pub use axum;
pub use axum::http::{Method, StatusCode};
