//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): inbound requests admitted to the pipeline
//! - `proxy_upstream_attempts_total` (counter): forwarding attempts by status
//! - `proxy_upstream_latency_seconds` (histogram): per-attempt upstream latency
//! - `proxy_retries_total` (counter): failed attempts followed by a wait
//! - `proxy_admission_in_flight` (gauge): requests holding an admission slot
//! - `proxy_journal_write_failures_total` (counter): failed journal writes by sink
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request() {
    counter!("proxy_requests_total").increment(1);
}

/// Record one upstream attempt. `status` is "error" for transport failures.
pub fn record_attempt(status: &str, start: Instant) {
    counter!("proxy_upstream_attempts_total", "status" => status.to_string()).increment(1);
    histogram!("proxy_upstream_latency_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_retry() {
    counter!("proxy_retries_total").increment(1);
}

pub fn set_admission_in_flight(in_flight: usize) {
    gauge!("proxy_admission_in_flight").set(in_flight as f64);
}

pub fn record_journal_failure(sink: &str) {
    counter!("proxy_journal_write_failures_total", "sink" => sink.to_string()).increment(1);
}
