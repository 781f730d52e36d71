//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted client connections
//! - `proxy_active_connections` (gauge): current connection count
//! - `proxy_policy_decisions_total` (counter): decisions by `decision`
//! - `proxy_tunnels_total` (counter): CONNECT tunnels by `outcome`
//! - `proxy_forwarded_requests_total` (counter): plain requests by upstream `status`
//! - `proxy_dial_duration_seconds` (histogram): dial latency by `result`
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing when the exporter is off.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::observability::ObservabilityError;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), ObservabilityError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ObservabilityError::Metrics(e.to_string()))?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_opened() {
    counter!("proxy_connections_total").increment(1);
    gauge!("proxy_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    gauge!("proxy_active_connections").decrement(1.0);
}

pub fn record_policy_decision(decision: &'static str) {
    counter!("proxy_policy_decisions_total", "decision" => decision).increment(1);
}

pub fn record_tunnel(outcome: &'static str) {
    counter!("proxy_tunnels_total", "outcome" => outcome).increment(1);
}

pub fn record_forward(status: u16) {
    counter!("proxy_forwarded_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_dial(elapsed: Duration, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    histogram!("proxy_dial_duration_seconds", "result" => result).record(elapsed.as_secs_f64());
}
