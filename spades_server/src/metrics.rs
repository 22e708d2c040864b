//! Prometheus metrics for monitoring match traffic.
//!
//! Metrics are exposed in Prometheus text format on a separate listener when
//! `--metrics-bind` (or `METRICS_BIND`) is set. Without an installed exporter
//! the recording calls below are no-ops.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use spades_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::http_requests_total("POST", "/api/v1/matches/{id}/bid", 200);
//! metrics::match_actions_total("bid");
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
///
/// # Arguments
///
/// - `addr`: Address to bind the metrics server to (e.g., `0.0.0.0:9090`)
///
/// # Returns
///
/// Result indicating success or error message
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
///
/// `path` should be the route template, not the concrete URI, to keep label
/// cardinality bounded.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

/// Count an error returned to a client, by error code.
pub fn api_errors_total(code: &str) {
    metrics::counter!("api_errors_total", "code" => code.to_string()).increment(1);
}

// ============================================================================
// WebSocket Metrics
// ============================================================================

/// Adjust the open WebSocket connections gauge.
pub fn websocket_connections_active(delta: f64) {
    metrics::gauge!("websocket_connections_active").increment(delta);
}

/// Increment total WebSocket connections counter.
pub fn websocket_connections_total() {
    metrics::counter!("websocket_connections_total").increment(1);
}

/// Increment seat views pushed over WebSockets.
pub fn websocket_views_sent() {
    metrics::counter!("websocket_views_sent").increment(1);
}

// ============================================================================
// Match Metrics
// ============================================================================

/// Count an accepted seat action (`bid` or `play`).
pub fn match_actions_total(kind: &str) {
    metrics::counter!("match_actions_total", "kind" => kind.to_string()).increment(1);
}

/// Count a player seated by matchmaking.
pub fn players_matched_total(stake_tier: &str) {
    metrics::counter!("players_matched_total", "stake_tier" => stake_tier.to_string())
        .increment(1);
}

/// Set the number of matches restored at startup.
pub fn matches_recovered(count: usize) {
    metrics::gauge!("matches_recovered").set(count as f64);
}
