// File: src/error.rs
// Purpose: Error types for app building, handlers, rendering and navigation

use std::any::Any;
use strata_router::{PatternError, RouteTableError};
use thiserror::Error;

/// Boxed error returned by user code (handlers, preloads, views).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure while assembling an [`App`](crate::App).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("page routes: {0}")]
    Pages(#[source] RouteTableError),

    #[error("not-found routes: {0}")]
    NotFound(#[source] RouteTableError),

    #[error("endpoint routes: {0}")]
    Endpoints(#[source] RouteTableError),

    #[error("{kind} directory `{dir}`: {source}")]
    Directory {
        kind: &'static str,
        dir: String,
        #[source]
        source: PatternError,
    },
}

/// Failure of an endpoint handler or middleware.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Failed(#[from] BoxError),

    #[error("handler panicked: {0}")]
    Panic(String),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::Failed(err.into())
    }
}

/// Failure while preloading or rendering a page.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("preload failed for `{route}`: {source}")]
    Preload {
        route: String,
        #[source]
        source: BoxError,
    },

    #[error("view failed: {0}")]
    View(#[source] BoxError),

    #[error("render panicked: {0}")]
    Panic(String),
}

/// Client-side navigation failure, shared by every waiter of one navigation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("invalid navigation target `{target}`: {reason}")]
    InvalidUrl { target: String, reason: String },

    #[error("preload failed for {url}: {message}")]
    Preload { url: String, message: String },

    #[error("too many redirects while navigating to {0}")]
    TooManyRedirects(String),

    #[error("navigation controller shut down")]
    Closed,
}

/// Malformed server-rendered hydration payload.
#[derive(Debug, Error)]
pub enum HydrationError {
    #[error("missing `{0}` script in document")]
    Missing(&'static str),

    #[error("invalid hydration json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");

        let caught = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "formatted 1");
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(HandlerError::msg("nope").to_string(), "nope");
        let boxed: BoxError = "io broke".into();
        assert_eq!(HandlerError::from(boxed).to_string(), "io broke");
    }
}
