//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum/hyper, tower layers: request ID, timeout, limits)
//!     → request.rs (Request context: method, path, query, body, abort)
//!     → [app dispatches through the router]
//!     → response.rs (write-once Response, converted back to http)
//!     → Send to client
//! ```
//!
//! Collaborators shaped as handlers or seams:
//! - statics.rs: directory-backed middleware (ServeDir)
//! - views.rs: `Renderer` trait used by `Response::render`

pub mod request;
pub mod response;
pub mod server;
pub mod statics;
pub mod views;

pub use request::{AbortGuard, AbortSignal, Request, RequestId, X_REQUEST_ID};
pub use response::Response;
pub use server::HttpServer;
pub use statics::ServeStatic;
pub use views::{RenderError, Renderer};
