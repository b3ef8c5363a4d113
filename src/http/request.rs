//! Request context.
//!
//! # Responsibilities
//! - Carry method, URL, headers and the buffered body of one request
//! - Track the mount-relative path while mounted routers run
//! - Hold path parameters of the entry currently handling the request
//! - Hold handler-defined state (`Extensions`) and the abort signal
//!
//! # Design Decisions
//! - `path()` stays percent-encoded; only parameters are decoded
//! - The request ID comes from `x-request-id` when the boundary set one

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::{request::Parts, Extensions, HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Unique identifier for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh UUID v4 identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared flag marking a request whose connection went away.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Marks the signal aborted when dropped while still armed.
///
/// The boundary holds one across the dispatch future; if the connection
/// closes, the future is dropped before `disarm` runs.
#[derive(Debug)]
pub struct AbortGuard {
    signal: AbortSignal,
    armed: bool,
}

impl AbortGuard {
    pub fn new(signal: AbortSignal) -> Self {
        Self { signal, armed: true }
    }

    /// The request completed; dropping the guard no longer aborts it.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Connection closed before the response was sent");
            self.signal.abort();
        }
    }
}

/// Saved routing position, restored after a prefix entry returns.
#[derive(Debug)]
pub(crate) struct MountState {
    path: String,
    base_url: String,
}

/// Per-request context handed to every handler.
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    method: Method,
    original_url: String,
    path: String,
    base_url: String,
    query: HashMap<String, String>,
    params: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
    extensions: Extensions,
    remote_addr: Option<SocketAddr>,
    abort: AbortSignal,
}

impl Request {
    /// Create a request for `method` and `url` (path plus optional query).
    pub fn new(method: Method, url: &str) -> Self {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        let path = if path.is_empty() { "/" } else { path };

        Self {
            id: RequestId::generate(),
            method,
            original_url: url.to_string(),
            path: path.to_string(),
            base_url: String::new(),
            query: query.map(parse_query).unwrap_or_default(),
            params: HashMap::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            extensions: Extensions::new(),
            remote_addr: None,
            abort: AbortSignal::new(),
        }
    }

    /// Build from the parts delivered by the HTTP boundary.
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let mut request = Self::new(parts.method, url);

        if let Some(id) = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
        {
            request.id = RequestId(id.to_string());
        }
        request.headers = parts.headers;
        request.extensions = parts.extensions;
        request.body = body;
        request
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL as received, before any mount stripped a prefix.
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    /// Path relative to the router currently walking the request.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Prefix stripped by the mounts entered so far.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Path parameter captured by the entry currently running.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Replace the parameters, returning the previous set.
    pub(crate) fn swap_params(&mut self, params: HashMap<String, String>) -> HashMap<String, String> {
        std::mem::replace(&mut self.params, params)
    }

    /// Strip the first `matched_len` bytes of the path for a prefix entry.
    pub(crate) fn enter_mount(&mut self, matched_len: usize) -> MountState {
        let saved = MountState {
            path: self.path.clone(),
            base_url: self.base_url.clone(),
        };
        let (prefix, rest) = self.path.split_at(matched_len.min(self.path.len()));
        self.base_url.push_str(prefix.trim_end_matches('/'));
        self.path = if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{rest}")
        };
        saved
    }

    pub(crate) fn leave_mount(&mut self, saved: MountState) {
        self.path = saved.path;
        self.base_url = saved.base_url;
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}
