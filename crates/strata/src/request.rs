// File: src/request.rs
// Purpose: Incoming request and the per-request context handed to handlers

use axum::body::Bytes;
use axum::http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use std::collections::HashMap;
use strata_router::Params;

/// An HTTP request as seen by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// `GET` request for `uri`. An unparsable uri falls back to `/`.
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri.parse().unwrap_or_default())
    }

    /// `POST` request for `uri`. An unparsable uri falls back to `/`.
    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri.parse().unwrap_or_default())
    }

    /// Add a header; invalid names or values are ignored
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get("user-agent").and_then(|v| v.to_str().ok())
    }
}

/// Request context passed to endpoint handlers, middleware and page hooks
#[derive(Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,

    /// Decoded route parameters
    pub params: Params,

    /// Parsed cookies
    pub cookies: HashMap<String, String>,

    /// Query parameters from URL (?key=value)
    pub query: QueryParams,

    /// Request-scoped values shared between middleware and handlers
    pub locals: Extensions,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("params", &self.params)
            .finish()
    }
}

impl RequestContext {
    pub fn new(request: Request, params: Params) -> Self {
        let cookies = Self::parse_cookies(&request.headers);
        let query = QueryParams::parse(request.uri.query().unwrap_or_default());

        Self {
            method: request.method,
            uri: request.uri,
            headers: request.headers,
            body: request.body,
            params,
            cookies,
            query,
            locals: Extensions::new(),
        }
    }

    /// Parse cookies from Cookie header
    fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
        let mut cookies = HashMap::new();

        for header in headers.get_all("cookie") {
            let Ok(cookie_str) = header.to_str() else {
                continue;
            };
            for cookie in cookie_str.split(';') {
                if let Some((key, value)) = cookie.trim().split_once('=') {
                    cookies.insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }

        cookies
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Check if the client prefers JSON
    pub fn accepts_json(&self) -> bool {
        self.get_header("accept")
            .map(|accept| accept.contains("application/json"))
            .unwrap_or(false)
    }

    /// Body as UTF-8 text
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Deserialize the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Query parameters wrapper
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    params: HashMap<String, String>,
}

impl QueryParams {
    pub fn new(params: HashMap<String, String>) -> Self {
        Self { params }
    }

    /// Parse a raw query string; later duplicates win
    pub fn parse(query: &str) -> Self {
        let params = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.params.get(key)
    }

    /// Get query parameter as specific type
    pub fn get_as<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.params.get(key).and_then(|v| v.parse().ok())
    }

    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.params.keys()
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.params
    }
}
