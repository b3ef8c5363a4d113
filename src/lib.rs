//! Switchyard: an Express-style request dispatcher on Tokio and Axum.
//!
//! Routes, middleware and error handlers are registered on a [`Router`] in
//! one ordered sequence. [`App::dispatch`] walks that sequence for each
//! request; handlers either send the response, forward to the next matching
//! entry, or fail into the error walk.

pub mod app;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use app::{App, BuildError, Dispatched, Outcome};
pub use config::AppConfig;
pub use http::{HttpServer, Request, Response, ServeStatic};
pub use lifecycle::Shutdown;
pub use routing::{
    error_handler_fn, fallible_fn, handler_fn, HandlerError, Next, Router, Step, UsageError,
};
