//! Switchyard demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server (axum, tower layers)
//!                          │
//!                          ▼
//!                     App::dispatch ──▶ routing::Router walk
//!                          │                 │  route / middleware / mount
//!                          │                 ▼
//!                          │            handlers: send | forward | fail
//!                          ▼
//!     Client Response ◀── finalize (responded, 404, unhandled 5xx)
//! ```

use std::path::PathBuf;

use clap::Parser;
use serde_json::json;

use switchyard::config::{load_config, AppConfig};
use switchyard::lifecycle::startup;
use switchyard::observability::logging;
use switchyard::routing::MatchOptions;
use switchyard::{error_handler_fn, handler_fn, App, Router, ServeStatic};

#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about = "Express-style request dispatcher")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(config = ?cli.config, "switchyard v0.1.0 starting");

    let app = App::new(demo_router(&config))?;
    startup::run(config, app).await?;
    Ok(())
}

fn demo_router(config: &AppConfig) -> Router {
    let options = MatchOptions::from(&config.routing);

    let wiki = Router::with_options(options)
        .get(
            "/",
            handler_fn(|_req, res, _next| Box::pin(async move { res.send("Wiki home page") })),
        )
        .get(
            "/about",
            handler_fn(|_req, res, _next| Box::pin(async move { res.send("About this wiki") })),
        )
        .post(
            "/about",
            handler_fn(|req, res, _next| {
                Box::pin(async move {
                    let length = req.body().len();
                    res.json(&json!({ "received": length }))
                })
            }),
        );

    let mut router = Router::with_options(options).middleware(handler_fn(|req, _res, next| {
        Box::pin(async move {
            tracing::info!(
                request_id = %req.id(),
                method = %req.method(),
                url = req.original_url(),
                "Incoming request"
            );
            next.forward()
        })
    }));

    for mount in &config.static_files {
        router = router.middleware_at(mount.mount.as_str(), ServeStatic::new(&mount.dir));
    }

    router
        .get(
            "/",
            handler_fn(|_req, res, _next| Box::pin(async move { res.send("Hello World!") })),
        )
        .all(
            "/secret",
            handler_fn(|req, _res, next| {
                Box::pin(async move {
                    tracing::info!(method = %req.method(), "Accessing the secret section");
                    next.forward()
                })
            }),
        )
        .get(
            "/users/:userId/books/:bookId",
            handler_fn(|req, res, _next| {
                Box::pin(async move { res.json(req.params()) })
            }),
        )
        .nest("/wiki", wiki)
        .error_handler(error_handler_fn(|err, req, res, _next| {
            Box::pin(async move {
                tracing::error!(path = req.path(), error = %err, "Request failed");
                res.status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
                    .send("Something broke!")
            })
        }))
}
