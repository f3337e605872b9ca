//! Metrics collection and exposition.
//!
//! # Metrics
//! - `front_handshakes_total` (counter): TLS handshakes by outcome
//! - `front_issuance_total` (counter): ACME issuances by outcome
//! - `front_requests_total` (counter): proxied requests by status
//! - `front_request_duration_seconds` (histogram): proxy latency
//! - `front_self_dial_total` (counter): periodic self-dial results
//!
//! Recording is cheap when no exporter is installed; the macros write into
//! a no-op recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on the given address.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics exporter listening"),
        Err(err) => tracing::error!(address = %addr, error = %err, "failed to start metrics exporter"),
    }
}

/// Count a TLS handshake by outcome (`completed`, `cache_hit`,
/// `policy_denied`, `no_sni`, ...).
pub fn record_handshake(outcome: &'static str) {
    counter!("front_handshakes_total", "outcome" => outcome).increment(1);
}

/// Count an issuance attempt by outcome.
pub fn record_issuance(outcome: &'static str) {
    counter!("front_issuance_total", "outcome" => outcome).increment(1);
}

/// Record one proxied request.
pub fn record_proxy_request(status: u16, start: Instant) {
    counter!("front_requests_total", "status" => status.to_string()).increment(1);
    histogram!("front_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a periodic self-dial result.
pub fn record_self_dial(ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("front_self_dial_total", "outcome" => outcome).increment(1);
}
