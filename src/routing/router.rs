//! Route registration and dispatch.
//!
//! # Responsibilities
//! - Keep routes, middleware and error handlers in one ordered sequence
//! - Walk the sequence for a request, honouring each handler's `Step`
//! - Switch to the error walk on failure and back on recovery
//! - Run mounted routers against the mount-relative path
//!
//! # Design Decisions
//! - Immutable after construction; shared via `Arc` without locks
//! - Registration order is traversal order; a match never excludes later
//!   entries, it only decides who runs first
//! - The walk is a loop over an index, so long chains do not grow the stack
//! - Pattern errors are collected and surfaced when the `App` is built

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use futures_util::future::BoxFuture;

use crate::http::{Request, Response};
use crate::routing::error::{HandlerError, UsageError};
use crate::routing::handler::{ErrorHandler, Handler, Next, Step, StepKind};
use crate::routing::pattern::{Anchor, MatchOptions, PathMatch, PathPattern, PathSpec, PatternError};

/// Verb filter of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    Any,
    Only(Method),
}

impl MethodFilter {
    /// GET registrations also answer HEAD.
    pub fn allows(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(expected) => {
                expected == method || (*expected == Method::GET && *method == Method::HEAD)
            }
        }
    }
}

enum Entry {
    Handler(Arc<dyn Handler>),
    ErrorHandler(Arc<dyn ErrorHandler>),
}

/// One registration in the ordered sequence.
struct Layer {
    method: MethodFilter,
    pattern: PathPattern,
    entry: Entry,
}

impl Layer {
    fn is_error_handler(&self) -> bool {
        matches!(self.entry, Entry::ErrorHandler(_))
    }

    fn matches(&self, req: &Request) -> Option<PathMatch> {
        if !self.method.allows(req.method()) {
            return None;
        }
        self.pattern.matches(req.path())
    }
}

/// How a walk over one router ended.
#[derive(Debug)]
pub(crate) enum WalkEnd {
    /// A handler wrote the response (or tried to, after abort).
    Responded,
    /// Every entry was visited; carries the error if the error walk ran dry.
    Exhausted(Option<HandlerError>),
    /// The connection went away mid-walk.
    Aborted,
}

/// Ordered sequence of routes, middleware and error handlers.
#[derive(Default)]
pub struct Router {
    layers: Vec<Layer>,
    options: MatchOptions,
    errors: Vec<PatternError>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router whose patterns use `options`. Set before registering.
    pub fn with_options(options: MatchOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Register `handler` for `method` on a full-path pattern.
    pub fn route(self, method: Method, path: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.push(
            MethodFilter::Only(method),
            path.into(),
            Anchor::Full,
            Entry::Handler(Arc::new(handler)),
        )
    }

    pub fn get(self, path: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.route(Method::GET, path, handler)
    }

    pub fn post(self, path: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.route(Method::POST, path, handler)
    }

    pub fn put(self, path: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.route(Method::PUT, path, handler)
    }

    pub fn delete(self, path: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.route(Method::DELETE, path, handler)
    }

    pub fn patch(self, path: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.route(Method::PATCH, path, handler)
    }

    pub fn options(self, path: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.route(Method::OPTIONS, path, handler)
    }

    pub fn head(self, path: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.route(Method::HEAD, path, handler)
    }

    /// Full-path route answering every verb.
    pub fn all(self, path: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.push(
            MethodFilter::Any,
            path.into(),
            Anchor::Full,
            Entry::Handler(Arc::new(handler)),
        )
    }

    /// Middleware for every request.
    pub fn middleware(self, handler: impl Handler) -> Self {
        self.middleware_at("/", handler)
    }

    /// Middleware for requests under `prefix`.
    ///
    /// While it runs, `req.path()` is relative to the prefix.
    pub fn middleware_at(self, prefix: impl Into<PathSpec>, handler: impl Handler) -> Self {
        self.push(
            MethodFilter::Any,
            prefix.into(),
            Anchor::Prefix,
            Entry::Handler(Arc::new(handler)),
        )
    }

    /// Middleware for requests under `prefix` with a given verb.
    pub fn middleware_for(
        self,
        method: Method,
        prefix: impl Into<PathSpec>,
        handler: impl Handler,
    ) -> Self {
        self.push(
            MethodFilter::Only(method),
            prefix.into(),
            Anchor::Prefix,
            Entry::Handler(Arc::new(handler)),
        )
    }

    /// Error handler for every request.
    pub fn error_handler(self, handler: impl ErrorHandler) -> Self {
        self.error_handler_at("/", handler)
    }

    /// Error handler for requests under `prefix`.
    pub fn error_handler_at(self, prefix: impl Into<PathSpec>, handler: impl ErrorHandler) -> Self {
        self.push(
            MethodFilter::Any,
            prefix.into(),
            Anchor::Prefix,
            Entry::ErrorHandler(Arc::new(handler)),
        )
    }

    /// Mount `router` under `prefix`.
    pub fn nest(mut self, prefix: impl Into<PathSpec>, mut router: Router) -> Self {
        self.errors.append(&mut router.errors);
        self.middleware_at(prefix, router)
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub(crate) fn take_errors(&mut self) -> Vec<PatternError> {
        std::mem::take(&mut self.errors)
    }

    fn push(mut self, method: MethodFilter, path: PathSpec, anchor: Anchor, entry: Entry) -> Self {
        match PathPattern::compile(path, anchor, self.options) {
            Ok(pattern) => {
                tracing::trace!(
                    position = self.layers.len(),
                    method = ?method,
                    pattern = pattern.source(),
                    "Registered entry"
                );
                self.layers.push(Layer {
                    method,
                    pattern,
                    entry,
                });
            }
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Walk the sequence for one request.
    pub(crate) async fn walk(&self, req: &mut Request, res: &mut Response) -> WalkEnd {
        let mut error: Option<HandlerError> = None;
        let mut index = 0;

        while index < self.layers.len() {
            let position = index;
            let layer = &self.layers[index];
            index += 1;

            if req.is_aborted() {
                return WalkEnd::Aborted;
            }
            if layer.is_error_handler() != error.is_some() {
                continue;
            }
            let Some(found) = layer.matches(req) else {
                continue;
            };
            let params = match found.decode() {
                Ok(params) => params.into_iter().collect::<HashMap<_, _>>(),
                Err(e) => {
                    tracing::debug!(position, error = %e, "Rejecting undecodable path");
                    error = Some(HandlerError::new(e).with_status(StatusCode::BAD_REQUEST));
                    continue;
                }
            };

            tracing::trace!(position, pattern = layer.pattern.source(), "Entry matched");

            let saved_params = req.swap_params(params);
            let mount = (layer.pattern.anchor() == Anchor::Prefix)
                .then(|| req.enter_mount(found.matched_len));

            let step = match (&layer.entry, error.take()) {
                (Entry::Handler(handler), None) => handler.call(req, res, Next::new(position)).await,
                (Entry::ErrorHandler(handler), Some(err)) => {
                    handler.call(err, req, res, Next::new(position)).await
                }
                (_, pending) => {
                    error = pending;
                    Step(StepKind::Forward)
                }
            };

            if let Some(saved) = mount {
                req.leave_mount(saved);
            }
            req.swap_params(saved_params);

            match step.0 {
                StepKind::Done => return WalkEnd::Responded,
                StepKind::Forward if res.is_sent() => {
                    res.record(UsageError::ForwardAfterSend { position });
                    return WalkEnd::Responded;
                }
                StepKind::Forward => {}
                StepKind::Fail(err) if res.is_sent() => {
                    res.record(UsageError::FailAfterSend {
                        position,
                        message: err.to_string(),
                    });
                    return WalkEnd::Responded;
                }
                StepKind::Fail(err) => error = Some(err),
            }
        }

        if req.is_aborted() {
            return WalkEnd::Aborted;
        }
        WalkEnd::Exhausted(error)
    }
}

/// A router runs as middleware when mounted in another router.
impl Handler for Router {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next,
    ) -> BoxFuture<'a, Step> {
        Box::pin(async move {
            match self.walk(req, res).await {
                WalkEnd::Responded | WalkEnd::Aborted => Step::done(),
                WalkEnd::Exhausted(None) => next.forward(),
                WalkEnd::Exhausted(Some(err)) => next.fail(err),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::AbortSignal;
    use crate::routing::handler::{error_handler_fn, handler_fn};
    use std::sync::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn record(trace: &Trace, label: &'static str) -> impl Handler {
        let trace = trace.clone();
        handler_fn(move |_req, _res, next| {
            let trace = trace.clone();
            Box::pin(async move {
                trace.lock().unwrap().push(label.to_string());
                next.forward()
            })
        })
    }

    fn send(body: &'static str) -> impl Handler {
        handler_fn(move |_req, res, _next| Box::pin(async move { res.send(body) }))
    }

    async fn run(router: &Router, method: Method, url: &str) -> (WalkEnd, Request, Response) {
        let mut req = Request::new(method, url);
        let mut res = Response::new(AbortSignal::new(), None);
        let end = router.walk(&mut req, &mut res).await;
        (end, req, res)
    }

    #[test]
    fn test_method_filter() {
        assert!(MethodFilter::Any.allows(&Method::DELETE));
        assert!(MethodFilter::Only(Method::GET).allows(&Method::GET));
        assert!(MethodFilter::Only(Method::GET).allows(&Method::HEAD));
        assert!(!MethodFilter::Only(Method::HEAD).allows(&Method::GET));
        assert!(!MethodFilter::Only(Method::POST).allows(&Method::GET));
    }

    #[tokio::test]
    async fn test_registration_order_is_traversal_order() {
        let trace: Trace = Arc::default();
        let router = Router::new()
            .middleware(record(&trace, "first"))
            .get("/", record(&trace, "second"))
            .all("/", record(&trace, "third"))
            .get("/", send("done"));

        let (end, _, res) = run(&router, Method::GET, "/").await;
        assert!(matches!(end, WalkEnd::Responded));
        assert_eq!(res.body().as_ref(), b"done");
        assert_eq!(*trace.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_verb_mismatch_is_skipped() {
        let router = Router::new().post("/about", send("posted"));
        let (end, _, _) = run(&router, Method::GET, "/about").await;
        assert!(matches!(end, WalkEnd::Exhausted(None)));
    }

    #[tokio::test]
    async fn test_failure_skips_ordinary_handlers() {
        let trace: Trace = Arc::default();
        let router = Router::new()
            .get(
                "/",
                handler_fn(|_req, _res, next| {
                    Box::pin(async move { next.fail(HandlerError::msg("boom")) })
                }),
            )
            .middleware(record(&trace, "skipped"))
            .error_handler(error_handler_fn(|err, _req, res, _next| {
                Box::pin(async move {
                    let _ = res.status(StatusCode::INTERNAL_SERVER_ERROR);
                    res.send(format!("handled: {err}"))
                })
            }));

        let (end, _, res) = run(&router, Method::GET, "/").await;
        assert!(matches!(end, WalkEnd::Responded));
        assert_eq!(res.body().as_ref(), b"handled: boom");
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_handlers_before_failure_are_not_visited() {
        let router = Router::new()
            .error_handler(error_handler_fn(|_err, _req, res, _next| {
                Box::pin(async move { res.send("too early") })
            }))
            .middleware(handler_fn(|_req, _res, next| {
                Box::pin(async move { next.fail(HandlerError::msg("late")) })
            }));

        let (end, _, res) = run(&router, Method::GET, "/").await;
        match end {
            WalkEnd::Exhausted(Some(err)) => assert_eq!(err.to_string(), "late"),
            other => panic!("unexpected walk end: {other:?}"),
        }
        assert!(!res.is_sent());
    }

    #[tokio::test]
    async fn test_error_handler_can_recover() {
        let router = Router::new()
            .middleware(handler_fn(|_req, _res, next| {
                Box::pin(async move { next.fail(HandlerError::msg("transient")) })
            }))
            .error_handler(error_handler_fn(|_err, _req, _res, next| {
                Box::pin(async move { next.forward() })
            }))
            .get("/", send("recovered"));

        let (end, _, res) = run(&router, Method::GET, "/").await;
        assert!(matches!(end, WalkEnd::Responded));
        assert_eq!(res.body().as_ref(), b"recovered");
    }

    #[tokio::test]
    async fn test_error_handler_can_pass_error_on() {
        let trace: Trace = Arc::default();
        let seen = trace.clone();
        let router = Router::new()
            .middleware(handler_fn(|_req, _res, next| {
                Box::pin(async move { next.fail(HandlerError::msg("original")) })
            }))
            .error_handler(error_handler_fn(move |err, _req, _res, next| {
                seen.lock().unwrap().push(format!("logged {err}"));
                Box::pin(async move { next.fail(err) })
            }))
            .error_handler(error_handler_fn(|err, _req, res, _next| {
                Box::pin(async move { res.send(format!("final {err}")) })
            }));

        let (_, _, res) = run(&router, Method::GET, "/").await;
        assert_eq!(res.body().as_ref(), b"final original");
        assert_eq!(*trace.lock().unwrap(), vec!["logged original"]);
    }

    #[tokio::test]
    async fn test_params_are_scoped_to_the_entry() {
        let router = Router::new()
            .get(
                "/users/:userId",
                handler_fn(|req, _res, next| {
                    Box::pin(async move {
                        assert_eq!(req.param("userId"), Some("34"));
                        next.forward()
                    })
                }),
            )
            .middleware(handler_fn(|req, res, _next| {
                Box::pin(async move {
                    let seen = req.param("userId").unwrap_or("none").to_string();
                    res.send(seen)
                })
            }));

        let (_, req, res) = run(&router, Method::GET, "/users/34").await;
        assert_eq!(res.body().as_ref(), b"none");
        assert!(req.params().is_empty());
    }

    #[tokio::test]
    async fn test_nested_router() {
        let wiki = Router::new()
            .get("/", send("Wiki home page"))
            .get(
                "/about",
                handler_fn(|req, res, _next| {
                    Box::pin(async move {
                        let body = format!("{} {}", req.base_url(), req.path());
                        res.send(body)
                    })
                }),
            );
        let router = Router::new().nest("/wiki", wiki);

        let (_, _, res) = run(&router, Method::GET, "/wiki/about").await;
        assert_eq!(res.body().as_ref(), b"/wiki /about");

        let (_, _, res) = run(&router, Method::GET, "/wiki/").await;
        assert_eq!(res.body().as_ref(), b"Wiki home page");

        let (end, _, _) = run(&router, Method::GET, "/about").await;
        assert!(matches!(end, WalkEnd::Exhausted(None)));
    }

    #[tokio::test]
    async fn test_nested_router_falls_through_and_restores_path() {
        let inner = Router::new().get("/known", send("inner"));
        let router = Router::new()
            .nest("/api", inner)
            .middleware(handler_fn(|req, res, _next| {
                Box::pin(async move {
                    let body = req.path().to_string();
                    res.send(body)
                })
            }));

        let (_, _, res) = run(&router, Method::GET, "/api/unknown").await;
        assert_eq!(res.body().as_ref(), b"/api/unknown");
    }

    #[tokio::test]
    async fn test_nested_failure_reaches_outer_error_handler() {
        let inner = Router::new().get(
            "/",
            handler_fn(|_req, _res, next| {
                Box::pin(async move { next.fail(HandlerError::msg("inner failure")) })
            }),
        );
        let router = Router::new()
            .nest("/inner", inner)
            .error_handler(error_handler_fn(|err, _req, res, _next| {
                Box::pin(async move { res.send(err.to_string()) })
            }));

        let (_, _, res) = run(&router, Method::GET, "/inner").await;
        assert_eq!(res.body().as_ref(), b"inner failure");
    }

    #[tokio::test]
    async fn test_forward_after_send_is_usage_error() {
        let router = Router::new()
            .get(
                "/",
                handler_fn(|_req, res, next| {
                    Box::pin(async move {
                        let _ = res.send("once");
                        next.forward()
                    })
                }),
            )
            .get("/", send("twice"));

        let (end, _, res) = run(&router, Method::GET, "/").await;
        assert!(matches!(end, WalkEnd::Responded));
        assert_eq!(res.body().as_ref(), b"once");
        assert_eq!(res.violations(), &[UsageError::ForwardAfterSend { position: 0 }]);
    }

    #[tokio::test]
    async fn test_undecodable_param_fails_with_bad_request() {
        let router = Router::new().get("/files/:name", send("file"));
        let (end, _, _) = run(&router, Method::GET, "/files/%FF").await;
        match end {
            WalkEnd::Exhausted(Some(err)) => assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST)),
            other => panic!("unexpected walk end: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_abort_stops_walk() {
        let router = Router::new()
            .middleware(handler_fn(|req, _res, next| {
                Box::pin(async move {
                    req.abort_signal().abort();
                    next.forward()
                })
            }))
            .get("/", send("unreachable"));

        let (end, _, res) = run(&router, Method::GET, "/").await;
        assert!(matches!(end, WalkEnd::Aborted));
        assert!(!res.is_sent());
    }

    #[test]
    fn test_pattern_errors_are_collected() {
        let inner = Router::new().get("/:id/:id", send("x"));
        let mut router = Router::new()
            .get("/a(", send("x"))
            .get("/fine", send("x"))
            .nest("/inner", inner);

        assert_eq!(router.len(), 2);
        assert_eq!(router.take_errors().len(), 2);
    }
}
