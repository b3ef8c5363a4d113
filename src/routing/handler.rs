//! Handler seam between the router and user code.
//!
//! A handler receives the request, the response and a `Next` token, and
//! returns a `Step` telling the walk what to do. The only ways to obtain a
//! `Step` are consuming `Next` (forward or fail) and writing the response,
//! so a handler cannot continue twice and cannot return without choosing.

use std::fmt;

use futures_util::future::BoxFuture;

use crate::http::{Request, Response};
use crate::routing::error::HandlerError;

/// What the walk does after a handler returns.
#[must_use = "a Step must be returned to the router"]
pub struct Step(pub(crate) StepKind);

pub(crate) enum StepKind {
    /// The response was written; the walk halts.
    Done,
    /// Resume at the next matching entry.
    Forward,
    /// Switch to (or stay in) the error walk.
    Fail(HandlerError),
}

impl Step {
    pub(crate) fn done() -> Self {
        Step(StepKind::Done)
    }

    pub(crate) fn fail(error: HandlerError) -> Self {
        Step(StepKind::Fail(error))
    }

    pub fn is_done(&self) -> bool {
        matches!(self.0, StepKind::Done)
    }

    pub fn is_forward(&self) -> bool {
        matches!(self.0, StepKind::Forward)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self.0, StepKind::Fail(_))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            StepKind::Done => f.write_str("Step::Done"),
            StepKind::Forward => f.write_str("Step::Forward"),
            StepKind::Fail(err) => write!(f, "Step::Fail({err})"),
        }
    }
}

/// Forward continuation bound to one position of the walk.
#[derive(Debug)]
pub struct Next {
    position: usize,
}

impl Next {
    pub(crate) fn new(position: usize) -> Self {
        Self { position }
    }

    /// Index of the entry this continuation was handed to.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Pass control to the next matching entry.
    pub fn forward(self) -> Step {
        tracing::trace!(position = self.position, "Forwarding");
        Step(StepKind::Forward)
    }

    /// Abandon the ordinary walk and hand `error` to the error handlers.
    pub fn fail(self, error: impl Into<HandlerError>) -> Step {
        let error = error.into();
        tracing::debug!(position = self.position, error = %error, "Handler failed");
        Step::fail(error)
    }
}

/// An ordinary handler: route handler or middleware.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next,
    ) -> BoxFuture<'a, Step>;
}

/// A handler visited only during the error walk.
pub trait ErrorHandler: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        error: HandlerError,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next,
    ) -> BoxFuture<'a, Step>;
}

/// Handler built from a closure, see [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Turn a closure into a [`Handler`].
///
/// ```ignore
/// handler_fn(|_req, res, _next| Box::pin(async move { res.send("Hello World!") }))
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, Next) -> BoxFuture<'a, Step>
        + Send
        + Sync
        + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, Next) -> BoxFuture<'a, Step>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next,
    ) -> BoxFuture<'a, Step> {
        (self.0)(req, res, next)
    }
}

/// Handler whose closure returns `Result`, see [`fallible_fn`].
pub struct FallibleFn<F>(F);

/// Turn a closure returning `Result<Step, HandlerError>` into a [`Handler`].
///
/// An `Err` is routed into the error walk, so persistence calls can use `?`
/// instead of forwarding every failure by hand.
pub fn fallible_fn<F>(f: F) -> FallibleFn<F>
where
    F: for<'a> Fn(
            &'a mut Request,
            &'a mut Response,
            Next,
        ) -> BoxFuture<'a, Result<Step, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    FallibleFn(f)
}

impl<F> Handler for FallibleFn<F>
where
    F: for<'a> Fn(
            &'a mut Request,
            &'a mut Response,
            Next,
        ) -> BoxFuture<'a, Result<Step, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next,
    ) -> BoxFuture<'a, Step> {
        let position = next.position();
        let fut = (self.0)(req, res, next);
        Box::pin(async move {
            match fut.await {
                Ok(step) => step,
                Err(error) => {
                    tracing::debug!(position, error = %error, "Handler returned an error");
                    Step::fail(error)
                }
            }
        })
    }
}

/// Error handler built from a closure, see [`error_handler_fn`].
pub struct ErrorHandlerFn<F>(F);

/// Turn a closure into an [`ErrorHandler`].
pub fn error_handler_fn<F>(f: F) -> ErrorHandlerFn<F>
where
    F: for<'a> Fn(HandlerError, &'a mut Request, &'a mut Response, Next) -> BoxFuture<'a, Step>
        + Send
        + Sync
        + 'static,
{
    ErrorHandlerFn(f)
}

impl<F> ErrorHandler for ErrorHandlerFn<F>
where
    F: for<'a> Fn(HandlerError, &'a mut Request, &'a mut Response, Next) -> BoxFuture<'a, Step>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        error: HandlerError,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next,
    ) -> BoxFuture<'a, Step> {
        (self.0)(error, req, res, next)
    }
}
