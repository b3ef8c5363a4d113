//! Response context.
//!
//! # Responsibilities
//! - Accumulate status, headers and body for one request
//! - Enforce write-once: the first send wins, later writes are recorded
//!   as usage errors and dropped
//! - Refuse writes once the request is aborted
//! - Convert into an `http::Response` for the boundary
//!
//! # Design Decisions
//! - Bodies are buffered (`Bytes`) unless a handler hands over a ready
//!   `Body` with `send_stream`, which the boundary passes through untouched
//! - Writers return a `Step`, so `return res.send(..)` ends a handler

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::http::request::AbortSignal;
use crate::http::views::{RenderError, Renderer};
use crate::routing::{HandlerError, Step, UsageError};

const TEXT_HTML: &str = "text/html; charset=utf-8";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Per-request response handed to every handler.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    stream: Option<Body>,
    sent: bool,
    abort: AbortSignal,
    renderer: Option<Arc<dyn Renderer>>,
    violations: Vec<UsageError>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("streamed", &self.stream.is_some())
            .field("sent", &self.sent)
            .field("violations", &self.violations)
            .finish()
    }
}

impl Response {
    pub fn new(abort: AbortSignal, renderer: Option<Arc<dyn Renderer>>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            stream: None,
            sent: false,
            abort,
            renderer,
            violations: Vec::new(),
        }
    }

    /// Set the status for the eventual send.
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        if self.writable(UsageError::ModifiedAfterSend) {
            self.status = status;
        }
        self
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        if self.writable(UsageError::ModifiedAfterSend) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Send `body`, defaulting the content type to HTML.
    pub fn send(&mut self, body: impl Into<Bytes>) -> Step {
        self.finish(TEXT_HTML, body.into())
    }

    /// Send a streaming body as is. `body()` stays empty for such responses.
    pub fn send_stream(&mut self, body: Body) -> Step {
        if self.writable(UsageError::DoubleSend) {
            self.stream = Some(body);
            self.sent = true;
        }
        Step::done()
    }

    /// Send the canonical reason phrase of `status` as plain text.
    pub fn send_status(&mut self, status: StatusCode) -> Step {
        self.status(status);
        let reason = status.canonical_reason().unwrap_or("Unknown");
        self.finish(TEXT_PLAIN, Bytes::from(reason))
    }

    /// Serialize `value` as JSON and send it.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Step {
        match serde_json::to_vec(value) {
            Ok(body) => self.finish(APPLICATION_JSON, Bytes::from(body)),
            Err(e) => Step::fail(HandlerError::new(e)),
        }
    }

    /// Render `view` with `locals` through the installed renderer.
    ///
    /// Failures become a `HandlerError` so the error walk sees them.
    pub fn render(&mut self, view: &str, locals: &Value) -> Step {
        match self.render_to_string(view, locals) {
            Ok(html) => self.finish(TEXT_HTML, Bytes::from(html)),
            Err(e) => {
                tracing::debug!(view, error = %e, "View rendering failed");
                Step::fail(HandlerError::new(e))
            }
        }
    }

    /// Render `view` without sending, so the handler can post-process
    /// the text before `send`.
    pub fn render_to_string(&self, view: &str, locals: &Value) -> Result<String, RenderError> {
        match &self.renderer {
            Some(renderer) => renderer.render(view, locals),
            None => Err(RenderError::NoEngine(view.to_string())),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
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

    /// Usage errors recorded so far.
    pub fn violations(&self) -> &[UsageError] {
        &self.violations
    }

    pub(crate) fn record(&mut self, violation: UsageError) {
        tracing::trace!(kind = violation.kind(), "Usage error recorded");
        self.violations.push(violation);
    }

    pub(crate) fn take_violations(&mut self) -> Vec<UsageError> {
        std::mem::take(&mut self.violations)
    }

    /// Boundary-generated response; replaces anything a handler staged.
    pub(crate) fn fallback(&mut self, status: StatusCode, body: impl Into<Bytes>) {
        if self.abort.is_aborted() || self.sent {
            return;
        }
        self.headers.clear();
        self.status = status;
        let _ = self.finish(TEXT_PLAIN, body.into());
    }

    /// Convert into the boundary's response type.
    pub fn into_http(self) -> axum::http::Response<Body> {
        let body = match self.stream {
            Some(stream) => stream,
            None => Body::from(self.body),
        };
        let mut response = axum::http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    fn writable(&mut self, violation: UsageError) -> bool {
        if self.abort.is_aborted() {
            self.record(UsageError::WriteAfterAbort);
            return false;
        }
        if self.sent {
            self.record(violation);
            return false;
        }
        true
    }

    fn finish(&mut self, default_type: &'static str, body: Bytes) -> Step {
        if self.writable(UsageError::DoubleSend) {
            self.headers
                .entry(header::CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(default_type));
            self.body = body;
            self.sent = true;
        }
        Step::done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response() -> Response {
        Response::new(AbortSignal::new(), None)
    }

    #[test]
    fn test_send_defaults() {
        let mut res = response();
        assert!(res.send("Hello World!").is_done());
        assert!(res.is_sent());
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"Hello World!");
        assert_eq!(res.header("content-type"), Some(TEXT_HTML));
    }

    #[test]
    fn test_second_send_is_recorded_not_applied() {
        let mut res = response();
        let _ = res.send("first");
        let _ = res.status(StatusCode::CREATED);
        assert!(res.send("second").is_done());

        assert_eq!(res.body().as_ref(), b"first");
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(
            res.violations(),
            &[UsageError::ModifiedAfterSend, UsageError::DoubleSend]
        );
    }

    #[test]
    fn test_json() {
        let mut res = response();
        let _ = res.status(StatusCode::CREATED).json(&json!({"userId": "34"}));
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.header("content-type"), Some(APPLICATION_JSON));
        assert_eq!(res.body().as_ref(), br#"{"userId":"34"}"#);
    }

    #[test]
    fn test_explicit_content_type_is_kept() {
        let mut res = response();
        res.set_header(header::CONTENT_TYPE, HeaderValue::from_static("text/css"));
        let _ = res.send("body {}");
        assert_eq!(res.header("content-type"), Some("text/css"));
    }

    #[test]
    fn test_send_status() {
        let mut res = response();
        let _ = res.send_status(StatusCode::NOT_FOUND);
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.body().as_ref(), b"Not Found");
    }

    #[test]
    fn test_render_without_engine_fails() {
        let mut res = response();
        let step = res.render("index", &json!({}));
        assert!(step.is_fail());
        assert!(!res.is_sent());
    }

    #[test]
    fn test_render_with_engine() {
        let renderer: Arc<dyn Renderer> = Arc::new(|view: &str, locals: &Value| {
            Ok::<_, RenderError>(format!(
                "<h1>{view}: {}</h1>",
                locals["name"].as_str().unwrap_or("")
            ))
        });
        let mut res = Response::new(AbortSignal::new(), Some(renderer));
        assert!(res.render("user", &json!({"name": "Tobi"})).is_done());
        assert_eq!(res.body().as_ref(), b"<h1>user: Tobi</h1>");
    }

    #[test]
    fn test_render_to_string_leaves_response_unsent() {
        let renderer: Arc<dyn Renderer> = Arc::new(|view: &str, _locals: &Value| {
            Ok::<_, RenderError>(format!("<p>{view}</p>"))
        });
        let mut res = Response::new(AbortSignal::new(), Some(renderer));

        let html = res.render_to_string("note", &json!({})).unwrap();
        assert!(!res.is_sent());
        let _ = res.send(html.replace("<p>", "<p class=\"note\">"));
        assert_eq!(res.body().as_ref(), br#"<p class="note">note</p>"#);

        let err = response().render_to_string("note", &json!({})).unwrap_err();
        assert!(matches!(err, RenderError::NoEngine(view) if view == "note"));
    }

    #[test]
    fn test_write_after_abort_is_noop() {
        let signal = AbortSignal::new();
        let mut res = Response::new(signal.clone(), None);
        signal.abort();
        let _ = res.send("late");
        assert!(!res.is_sent());
        assert!(res.body().is_empty());
        assert_eq!(res.violations(), &[UsageError::WriteAfterAbort]);
    }

    #[tokio::test]
    async fn test_stream_is_passed_through() {
        let mut res = response();
        assert!(res.send_stream(Body::from("chunked")).is_done());
        assert!(res.is_sent());
        assert!(res.body().is_empty());

        let _ = res.send("second");
        assert_eq!(res.violations(), &[UsageError::DoubleSend]);

        let bytes = axum::body::to_bytes(res.into_http().into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"chunked");
    }

    #[test]
    fn test_fallback_clears_staged_headers() {
        let mut res = response();
        res.set_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        res.fallback(StatusCode::NOT_FOUND, "Cannot GET /missing");
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.header("content-type"), Some(TEXT_PLAIN));
        assert!(res.violations().is_empty());
    }
}
