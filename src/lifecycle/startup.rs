//! Startup orchestration.
//!
//! # Responsibilities
//! - Start background tasks (metrics exporter, signal listener)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)
//! - Logging is initialized by the caller, before the app is built

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::app::App;
use crate::config::AppConfig;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;

/// Errors that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid address '{0}'")]
    Address(String),
    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve `app` with `config` until a termination signal arrives.
pub async fn run(config: AppConfig, app: App) -> Result<(), StartupError> {
    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_listener(&shutdown);
    serve(config, app, &shutdown).await
}

/// Serve `app` until `shutdown` is triggered.
pub async fn serve(config: AppConfig, app: App, shutdown: &Shutdown) -> Result<(), StartupError> {
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_in_flight = config.listener.max_in_flight,
        request_timeout_secs = config.timeouts.request_secs,
        static_mounts = config.static_files.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::Address(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let receiver = shutdown.subscribe();
    let server = HttpServer::new(config, Arc::new(app));
    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
