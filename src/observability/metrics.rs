//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatch_requests_total` (counter): settled requests by method, outcome, status
//! - `dispatch_duration_seconds` (histogram): time from dispatch to settlement
//! - `dispatch_usage_errors_total` (counter): handler contract violations by kind
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; without an installed recorder
//!   the calls are no-ops, which keeps tests free of global state
//! - Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one settled request.
pub fn record_dispatch(method: &str, outcome: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "dispatch_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("dispatch_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record one usage error.
pub fn record_usage_error(kind: &'static str) {
    metrics::counter!("dispatch_usage_errors_total", "kind" => kind).increment(1);
}
