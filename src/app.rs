//! Dispatcher entry point.
//!
//! # Responsibilities
//! - Own the root router and the view renderer
//! - Run one request through the router and settle it into exactly one
//!   terminal outcome
//! - Report unhandled errors and usage errors to the operator
//!
//! # Design Decisions
//! - Nothing is left pending: not-found and unhandled outcomes get a
//!   generic response written here
//! - Usage errors never change what the client receives; they are logged
//!   and counted
//! - No process-wide state; several apps can coexist

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::StatusCode;

use crate::http::{Renderer, Request, Response};
use crate::observability::metrics;
use crate::routing::router::WalkEnd;
use crate::routing::{HandlerError, PatternError, Router, UsageError};

/// Registration errors found when building the app.
#[derive(Debug)]
pub struct BuildError {
    pub errors: Vec<PatternError>,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid route registrations: ")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {}

/// Terminal state of one request.
#[derive(Debug)]
pub enum Outcome {
    /// A handler sent the response.
    Responded,
    /// The ordinary walk ran out of entries.
    NotFound,
    /// The error walk ran out of entries.
    Unhandled(HandlerError),
    /// The connection closed before a response was sent.
    Aborted,
}

impl Outcome {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Responded => "responded",
            Outcome::NotFound => "not_found",
            Outcome::Unhandled(_) => "unhandled",
            Outcome::Aborted => "aborted",
        }
    }
}

/// A settled request.
#[derive(Debug)]
pub struct Dispatched {
    pub outcome: Outcome,
    pub response: Response,
    pub usage_errors: Vec<UsageError>,
}

impl Dispatched {
    pub fn into_http(self) -> axum::http::Response<Body> {
        self.response.into_http()
    }
}

/// The dispatcher: a validated root router plus boundary policy.
pub struct App {
    router: Arc<Router>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl App {
    /// Validate `router` and wrap it for dispatch.
    pub fn new(mut router: Router) -> Result<Self, BuildError> {
        let errors = router.take_errors();
        if !errors.is_empty() {
            return Err(BuildError { errors });
        }
        tracing::debug!(entries = router.len(), "Router built");
        Ok(Self {
            router: Arc::new(router),
            renderer: None,
        })
    }

    /// Install the view renderer used by `Response::render`.
    pub fn with_renderer(mut self, renderer: impl Renderer) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Run `req` through the router and settle the outcome.
    pub async fn dispatch(&self, mut req: Request) -> Dispatched {
        let start = Instant::now();
        let mut res = Response::new(req.abort_signal().clone(), self.renderer.clone());

        let end = self.router.walk(&mut req, &mut res).await;

        let outcome = match end {
            _ if req.is_aborted() => Outcome::Aborted,
            WalkEnd::Aborted => Outcome::Aborted,
            WalkEnd::Responded if res.is_sent() => Outcome::Responded,
            WalkEnd::Responded => {
                res.record(UsageError::NoResponse);
                let err = HandlerError::msg("handler finished without sending a response");
                respond_unhandled(&mut res, &err);
                Outcome::Unhandled(err)
            }
            WalkEnd::Exhausted(None) => {
                let body = format!("Cannot {} {}", req.method(), req.path());
                res.fallback(StatusCode::NOT_FOUND, body);
                Outcome::NotFound
            }
            WalkEnd::Exhausted(Some(err)) => {
                tracing::error!(
                    request_id = %req.id(),
                    method = %req.method(),
                    path = req.path(),
                    error = %err,
                    "Unhandled error"
                );
                respond_unhandled(&mut res, &err);
                Outcome::Unhandled(err)
            }
        };

        let usage_errors = res.take_violations();
        for violation in &usage_errors {
            tracing::warn!(
                request_id = %req.id(),
                method = %req.method(),
                path = req.path(),
                kind = violation.kind(),
                "Usage error: {}",
                violation
            );
            metrics::record_usage_error(violation.kind());
        }

        tracing::debug!(
            request_id = %req.id(),
            method = %req.method(),
            path = req.path(),
            outcome = outcome.label(),
            status = res.status_code().as_u16(),
            "Request settled"
        );
        metrics::record_dispatch(
            req.method().as_str(),
            outcome.label(),
            res.status_code().as_u16(),
            start,
        );

        Dispatched {
            outcome,
            response: res,
            usage_errors,
        }
    }
}

/// Only 4xx and 5xx hints are honoured; anything else becomes a 500.
fn respond_unhandled(res: &mut Response, err: &HandlerError) {
    let status = err
        .status()
        .filter(|s| s.is_client_error() || s.is_server_error())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let reason = status.canonical_reason().unwrap_or("Internal Server Error");
    res.fallback(status, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{handler_fn, Next};
    use axum::http::Method;

    #[test]
    fn test_build_error_lists_every_pattern() {
        let send = || handler_fn(|_req, res, _next: Next| Box::pin(async move { res.send("x") }));
        let router = Router::new().get("/:a/:a", send()).get("/(", send());
        let err = App::new(router).err().unwrap();
        assert_eq!(err.errors.len(), 2);
        assert!(err.to_string().starts_with("invalid route registrations: "));
    }

    #[tokio::test]
    async fn test_not_found_message() {
        let app = App::new(Router::new()).unwrap();
        let out = app.dispatch(Request::new(Method::GET, "/missing")).await;
        assert!(matches!(out.outcome, Outcome::NotFound));
        assert_eq!(out.response.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(out.response.body().as_ref(), b"Cannot GET /missing");
    }
}
