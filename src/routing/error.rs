//! Errors raised while dispatching a request.
//!
//! # Taxonomy
//! - `HandlerError`: passed to `Next::fail`, routed to error handlers
//! - `UsageError`: a handler broke the one-response contract; recorded on
//!   the response and reported at the boundary, never applied
//!
//! Not-found and unhandled outcomes are not errors here; they are
//! terminal states of the walk (see `app::Outcome`).

use std::error::Error as StdError;
use std::fmt;

use axum::http::StatusCode;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Opaque failure carried through the error walk.
///
/// Any `std::error::Error` converts into it, so `?` works inside
/// fallible handlers. It deliberately does not implement `Error` itself.
pub struct HandlerError {
    status: Option<StatusCode>,
    inner: BoxError,
}

impl HandlerError {
    /// Wrap an error (or anything convertible into a boxed error).
    pub fn new(error: impl Into<BoxError>) -> Self {
        Self {
            status: None,
            inner: error.into(),
        }
    }

    /// Build an error from a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(message.to_string())
    }

    /// Attach the status the boundary should use if nobody handles it.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The wrapped error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("status", &self.status)
            .field("inner", &self.inner)
            .finish()
    }
}

/// Violations of the one-response-per-request contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("response sent more than once")]
    DoubleSend,

    #[error("response modified after it was sent")]
    ModifiedAfterSend,

    #[error("entry {position} forwarded after the response was sent")]
    ForwardAfterSend { position: usize },

    #[error("entry {position} failed after the response was sent: {message}")]
    FailAfterSend { position: usize, message: String },

    #[error("response written after the request was aborted")]
    WriteAfterAbort,

    #[error("walk halted without a response")]
    NoResponse,
}

impl UsageError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UsageError::DoubleSend => "double_send",
            UsageError::ModifiedAfterSend => "modified_after_send",
            UsageError::ForwardAfterSend { .. } => "forward_after_send",
            UsageError::FailAfterSend { .. } => "fail_after_send",
            UsageError::WriteAfterAbort => "write_after_abort",
            UsageError::NoResponse => "no_response",
        }
    }
}
