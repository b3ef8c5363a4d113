//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (at startup):
//!     get/post/all/middleware/error_handler/nest
//!     → pattern.rs (compile to anchored regex)
//!     → router.rs (append to the ordered sequence)
//!
//! Incoming Request (method, path)
//!     → router.rs (walk entries in registration order)
//!     → handler.rs (handler returns Step: Done | Forward | Fail)
//!     → Responded, or exhausted with/without a pending error
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same input always visits the same entries
//! - Ordinary and error handlers are distinct registrations

pub mod error;
pub mod handler;
pub mod pattern;
pub mod router;

pub use error::{HandlerError, UsageError};
pub use handler::{
    error_handler_fn, fallible_fn, handler_fn, ErrorHandler, Handler, Next, Step,
};
pub use pattern::{Anchor, MatchOptions, PathPattern, PathSpec, PatternError};
pub use router::{MethodFilter, Router};
