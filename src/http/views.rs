//! View rendering seam.
//!
//! The crate ships no template engine. Applications install a `Renderer`
//! on the `App`; `Response::render` calls it and either sends the text or
//! routes the failure into the error walk.

use serde_json::Value;

/// Renders a named view with a mapping of local values.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, view: &str, locals: &Value) -> Result<String, RenderError>;
}

impl<F> Renderer for F
where
    F: Fn(&str, &Value) -> Result<String, RenderError> + Send + Sync + 'static,
{
    fn render(&self, view: &str, locals: &Value) -> Result<String, RenderError> {
        self(view, locals)
    }
}

/// Rendering failures.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no view engine installed, cannot render `{0}`")]
    NoEngine(String),

    #[error("failed to lookup view `{0}`")]
    NotFound(String),

    #[error("failed to render `{view}`: {message}")]
    Engine { view: String, message: String },
}
