//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_bodies_modified_total` (counter): rewritten bodies by phase, content type
//! - `proxy_modifier_failures_total` (counter): failed modifiers by name, kind
//! - `proxy_parse_failures_total` (counter): bodies passed through unparsed
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Content-type labels use the normalized MIME essence to bound cardinality

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::modifier::Phase;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start_time: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(start_time.elapsed().as_secs_f64());
}

pub fn record_body_modified(phase: Phase, content_type: &str) {
    metrics::counter!(
        "proxy_bodies_modified_total",
        "phase" => phase.as_str(),
        "content_type" => content_type.to_string()
    )
    .increment(1);
}

pub fn record_modifier_failure(modifier: &str, kind: &'static str) {
    metrics::counter!(
        "proxy_modifier_failures_total",
        "modifier" => modifier.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_parse_failure(content_type: &str) {
    metrics::counter!("proxy_parse_failures_total", "content_type" => content_type.to_string()).increment(1);
}
