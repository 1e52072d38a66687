// File: src/response.rs
// Purpose: Response model, header merge rules and the page response control handle

use axum::body::{Body as AxumBody, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Header names whose values accumulate instead of replacing each other.
pub const APPEND_ONLY_HEADERS: &[&str] = &["set-cookie", "link", "vary", "server-timing"];

// ============================================================================
// ResponseHeaders
// ============================================================================

/// Response headers with last-writer-wins semantics, except for append-only names.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    map: HeaderMap,
    extra_append_only: HashSet<HeaderName>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `name` as append-only for this response.
    pub fn append_only(&mut self, name: &str) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            self.extra_append_only.insert(name);
        }
    }

    pub fn is_append_only(&self, name: &HeaderName) -> bool {
        APPEND_ONLY_HEADERS.contains(&name.as_str()) || self.extra_append_only.contains(name)
    }

    /// Write a header. Returns false for an invalid name or value.
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            return false;
        };

        if self.is_append_only(&name) {
            self.map.append(name, value);
        } else {
            self.map.insert(name, value);
        }
        true
    }

    /// Always add another value, whatever the name.
    pub fn append(&mut self, name: &str, value: &str) -> bool {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            return false;
        };
        self.map.append(name, value);
        true
    }

    pub fn remove(&mut self, name: &str) {
        self.map.remove(name);
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.map
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Apply every header of `other` with the same merge rules.
    pub fn merge(&mut self, other: &ResponseHeaders) {
        self.extra_append_only
            .extend(other.extra_append_only.iter().cloned());
        let mut replaced = HashSet::new();
        for (name, value) in other.map.iter() {
            if self.is_append_only(name) {
                self.map.append(name.clone(), value.clone());
            } else if replaced.insert(name.clone()) {
                self.map.insert(name.clone(), value.clone());
            } else {
                self.map.append(name.clone(), value.clone());
            }
        }
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.map
    }

    pub fn into_map(self) -> HeaderMap {
        self.map
    }
}

// ============================================================================
// Body and Response
// ============================================================================

pub enum Body {
    Empty,
    Text(String),
    Bytes(Bytes),
    Stream(BoxStream<'static, Bytes>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl Body {
    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// Collect the whole body, draining a stream.
    pub async fn into_bytes(self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Text(text) => Bytes::from(text),
            Body::Bytes(bytes) => bytes,
            Body::Stream(stream) => {
                let parts: Vec<Bytes> = stream.collect().await;
                Bytes::from(parts.concat())
            }
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: ResponseHeaders,
    pub body: Body,
}

impl Response {
    pub fn new(status: StatusCode, body: Body) -> Self {
        Self {
            status,
            headers: ResponseHeaders::new(),
            body,
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, Body::Empty)
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, Body::Text(body.into()))
            .with_header("content-type", "text/plain; charset=utf-8")
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, Body::Text(body.into()))
            .with_header("content-type", "text/html; charset=utf-8")
    }

    /// JSON response; serialization failures become a 500
    pub fn json<T: serde::Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => Self::new(StatusCode::OK, Body::Bytes(Bytes::from(bytes)))
                .with_header("content-type", "application/json"),
            Err(err) => Self::text(format!("failed to serialize response: {err}"))
                .with_status(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    pub fn not_found() -> Self {
        Self::text("Not Found").with_status(StatusCode::NOT_FOUND)
    }

    pub fn redirect(redirect: &Redirect) -> Self {
        Self::html(crate::document::redirect_page(&redirect.location))
            .with_status(redirect.status)
            .with_header("location", &redirect.location)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set a header; invalid names or values are ignored
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub async fn into_bytes(self) -> Bytes {
        self.body.into_bytes().await
    }

    /// Whole body as (lossy) UTF-8 text
    pub async fn text_body(self) -> String {
        String::from_utf8_lossy(&self.into_bytes().await).into_owned()
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let body = match self.body {
            Body::Empty => AxumBody::empty(),
            Body::Text(text) => AxumBody::from(text),
            Body::Bytes(bytes) => AxumBody::from(bytes),
            Body::Stream(stream) => {
                AxumBody::from_stream(stream.map(Ok::<_, std::convert::Infallible>))
            }
        };

        let mut response = axum::response::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.into_map();
        response
    }
}

// ============================================================================
// Redirect
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
    pub status: StatusCode,
}

impl Redirect {
    /// 302 Found
    pub fn temporary(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            status: StatusCode::FOUND,
        }
    }

    /// 301 Moved Permanently
    pub fn permanent(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            status: StatusCode::MOVED_PERMANENTLY,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

// ============================================================================
// ResponseControl
// ============================================================================

/// How long a page response waits for deferred content before flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
    /// Flush as soon as the head is ready.
    Flush,
    For(Duration),
    /// Wait for the complete document.
    All,
}

#[derive(Debug)]
struct ControlState {
    status: StatusCode,
    headers: ResponseHeaders,
    redirect: Option<Redirect>,
    hold: Option<Hold>,
    flushed: bool,
}

/// Shared handle through which preloads, header hooks and views shape a page response.
///
/// Status and header writes made after the response head was sent are dropped.
#[derive(Debug, Clone)]
pub struct ResponseControl {
    state: Arc<Mutex<ControlState>>,
}

impl Default for ResponseControl {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl ResponseControl {
    pub fn new(status: StatusCode) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControlState {
                status,
                headers: ResponseHeaders::new(),
                redirect: None,
                hold: None,
                flushed: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> StatusCode {
        self.lock().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.update_status(|_| status);
    }

    /// Compute the new status from the current one.
    pub fn update_status(&self, f: impl FnOnce(StatusCode) -> StatusCode) {
        let mut state = self.lock();
        if state.flushed {
            debug!("Ignoring status change after flush");
            return;
        }
        state.status = f(state.status);
    }

    pub fn set_header(&self, name: &str, value: &str) -> bool {
        let mut state = self.lock();
        if state.flushed {
            debug!("Ignoring header {} after flush", name);
            return false;
        }
        state.headers.set(name, value)
    }

    pub fn append_header(&self, name: &str, value: &str) -> bool {
        let mut state = self.lock();
        if state.flushed {
            debug!("Ignoring header {} after flush", name);
            return false;
        }
        state.headers.append(name, value)
    }

    pub fn append_only(&self, name: &str) {
        self.lock().headers.append_only(name);
    }

    pub fn headers(&self) -> ResponseHeaders {
        self.lock().headers.clone()
    }

    /// Request a redirect. The first one wins.
    pub fn redirect(&self, redirect: Redirect) {
        let mut state = self.lock();
        if state.redirect.is_none() {
            debug!("Redirect requested to {}", redirect.location);
            state.redirect = Some(redirect);
        }
    }

    pub fn redirect_target(&self) -> Option<Redirect> {
        self.lock().redirect.clone()
    }

    pub fn hold(&self, hold: Hold) {
        self.lock().hold = Some(hold);
    }

    pub fn hold_setting(&self) -> Option<Hold> {
        self.lock().hold
    }

    pub fn is_flushed(&self) -> bool {
        self.lock().flushed
    }

    /// Freeze status and headers for sending.
    pub(crate) fn flush(&self) -> (StatusCode, ResponseHeaders) {
        let mut state = self.lock();
        state.flushed = true;
        (state.status, state.headers.clone())
    }
}
