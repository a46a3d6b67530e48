//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, selections, websocket traffic)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `fortitude_requests_total` (counter): forwarded requests by method, status, backend
//! - `fortitude_request_duration_seconds` (histogram): latency distribution
//! - `fortitude_backend_selections_total` (counter): selections by pool role and backend
//! - `fortitude_websocket_connections` (gauge): live bridged connections
//! - `fortitude_websocket_frames_total` (counter): relayed frames by direction
//! - `fortitude_reloads_total` (counter): reload attempts by outcome
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Labels for role, backend, status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed forwarded request.
pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("backend", backend.to_string()),
    ];
    counter!("fortitude_requests_total", &labels[..]).increment(1);
    histogram!("fortitude_request_duration_seconds", &labels[..])
        .record(start.elapsed().as_secs_f64());
}

/// Record that a backend was picked from a pool.
pub fn record_selection(role: &'static str, backend: &str) {
    counter!(
        "fortitude_backend_selections_total",
        "role" => role,
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Track the number of live WebSocket bridges.
pub fn record_websocket_connections(count: u64) {
    gauge!("fortitude_websocket_connections").set(count as f64);
}

/// Record a relayed WebSocket frame.
pub fn record_websocket_frame(direction: &'static str) {
    counter!("fortitude_websocket_frames_total", "direction" => direction).increment(1);
}

/// Record a reload attempt.
pub fn record_reload(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("fortitude_reloads_total", "outcome" => outcome).increment(1);
}
