//! Metrics collection and exposition.
//!
//! # Metrics
//! - `titan_connections_total` (counter): connections accepted past the TLS handshake
//! - `titan_active_connections` (gauge): current connection count
//! - `titan_frames_total` (counter): inbound frames by kind (ping, close, message)
//! - `titan_protocol_violations_total` (counter): violations by reason
//! - `titan_auth_attempts_total` (counter): auth attempts by method, outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed, so tests never need one
//! - Prometheus exposition is opt-in via `observability.metrics_enabled`

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_opened(active: usize) {
    ::metrics::counter!("titan_connections_total").increment(1);
    ::metrics::gauge!("titan_active_connections").set(active as f64);
}

pub fn record_connection_closed(active: usize) {
    ::metrics::gauge!("titan_active_connections").set(active as f64);
}

pub fn record_frame(kind: &'static str) {
    ::metrics::counter!("titan_frames_total", "kind" => kind).increment(1);
}

pub fn record_protocol_violation(reason: &'static str) {
    ::metrics::counter!("titan_protocol_violations_total", "reason" => reason).increment(1);
}

/// Record one authentication attempt. `outcome` is success, rejected or cancelled.
pub fn record_auth(method: &'static str, outcome: &'static str) {
    ::metrics::counter!(
        "titan_auth_attempts_total",
        "method" => method,
        "outcome" => outcome
    )
    .increment(1);
}
