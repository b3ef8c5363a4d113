//! Static file middleware.
//!
//! # Responsibilities
//! - Serve files under a directory for GET/HEAD requests
//! - Forward to the next entry when no file matches
//!
//! # Design Decisions
//! - File serving itself is `tower_http::services::ServeDir`; this module
//!   only adapts it to the middleware shape
//! - Uses the mount-relative path, so `middleware_at("/media", ..)` serves
//!   `/media/x.png` from `<dir>/x.png`
//! - Several instances compose in registration order
//! - File bodies are streamed through, never buffered
//! - Directory redirects are rewritten to stay under the mount

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, StatusCode};
use futures_util::future::BoxFuture;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::http::{Request, Response};
use crate::routing::{Handler, HandlerError, Next, Step};

/// Middleware serving files from one directory.
#[derive(Debug, Clone)]
pub struct ServeStatic {
    root: PathBuf,
    service: ServeDir,
}

impl ServeStatic {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            service: ServeDir::new(&root),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn serve(&self, req: &mut Request, res: &mut Response, next: Next) -> Step {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return next.forward();
        }

        let mut builder = axum::http::Request::builder()
            .method(req.method().clone())
            .uri(req.path());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(req.headers().clone());
        }
        let file_request = match builder.body(Body::empty()) {
            Ok(r) => r,
            Err(e) => return next.fail(HandlerError::new(e).with_status(StatusCode::BAD_REQUEST)),
        };

        let response = match self.service.clone().oneshot(file_request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        if response.status() == StatusCode::NOT_FOUND {
            tracing::trace!(root = ?self.root, path = req.path(), "No static file, forwarding");
            return next.forward();
        }

        let (mut parts, body) = response.into_parts();
        if parts.status.is_redirection() {
            mount_location(&mut parts.headers, req.base_url());
        }

        tracing::debug!(root = ?self.root, path = req.path(), status = %parts.status, "Serving static file");
        res.status(parts.status);
        for (name, value) in parts.headers.iter() {
            res.set_header(name.clone(), value.clone());
        }
        res.send_stream(Body::new(body))
    }
}

/// Prefix an absolute `Location` with the mount's base URL.
fn mount_location(headers: &mut axum::http::HeaderMap, base_url: &str) {
    if base_url.is_empty() {
        return;
    }
    let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    if !location.starts_with('/') {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{}{}", base_url, location)) {
        headers.insert(header::LOCATION, value);
    }
}

impl Handler for ServeStatic {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next,
    ) -> BoxFuture<'a, Step> {
        Box::pin(self.serve(req, res, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::http::AbortSignal;
    use crate::routing::Router;

    async fn run(stat: &ServeStatic, method: Method, url: &str) -> (Step, Response) {
        let mut req = Request::new(method, url);
        let mut res = Response::new(AbortSignal::new(), None);
        let step = stat.call(&mut req, &mut res, Next::new(0)).await;
        (step, res)
    }

    #[tokio::test]
    async fn test_serves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.css"), "body { color: red; }").unwrap();
        let stat = ServeStatic::new(dir.path());

        let (step, res) = run(&stat, Method::GET, "/style.css").await;
        assert!(step.is_done());
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some("text/css"));

        let bytes = axum::body::to_bytes(res.into_http().into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"body { color: red; }");
    }

    #[tokio::test]
    async fn test_directory_redirect_stays_under_mount() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "<h1>docs</h1>").unwrap();

        let router = Router::new().middleware_at("/media", ServeStatic::new(dir.path()));
        let app = App::new(router).unwrap();
        let out = app.dispatch(Request::new(Method::GET, "/media/docs")).await;

        assert!(out.response.status_code().is_redirection());
        assert_eq!(out.response.header("location"), Some("/media/docs/"));
    }

    #[test]
    fn test_mount_location() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static("/docs/?v=1"));
        mount_location(&mut headers, "/media");
        assert_eq!(headers[header::LOCATION], "/media/docs/?v=1");

        mount_location(&mut headers, "");
        assert_eq!(headers[header::LOCATION], "/media/docs/?v=1");

        headers.insert(header::LOCATION, HeaderValue::from_static("https://elsewhere/"));
        mount_location(&mut headers, "/media");
        assert_eq!(headers[header::LOCATION], "https://elsewhere/");
    }

    #[tokio::test]
    async fn test_missing_file_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let stat = ServeStatic::new(dir.path());

        let (step, res) = run(&stat, Method::GET, "/nope.png").await;
        assert!(step.is_forward());
        assert!(!res.is_sent());
    }

    #[tokio::test]
    async fn test_other_verbs_forward() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let stat = ServeStatic::new(dir.path());

        let (step, _) = run(&stat, Method::POST, "/a.txt").await;
        assert!(step.is_forward());
    }
}
