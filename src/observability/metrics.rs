//! Metrics for the telemetry pipeline itself.
//!
//! # Metrics
//! - `telemetry_events_enqueued_total` (counter): events accepted by the sink, by kind
//! - `telemetry_events_dropped_total` (counter): events lost, by kind and reason
//! - `telemetry_upload_batches_total` (counter): upload attempts, by result
//! - `telemetry_flush_total` (counter): shutdown flushes, by result
//! - `http_requests_total` (counter): inbound requests, by method and status
//! - `http_request_duration_seconds` (histogram): inbound request latency

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_event_enqueued(kind: &'static str) {
    counter!("telemetry_events_enqueued_total", "kind" => kind).increment(1);
}

pub fn record_event_dropped(kind: &'static str, reason: &'static str) {
    counter!("telemetry_events_dropped_total", "kind" => kind, "reason" => reason).increment(1);
}

pub fn record_upload(result: &'static str) {
    counter!("telemetry_upload_batches_total", "result" => result).increment(1);
}

pub fn record_flush(flushed: bool) {
    let result = if flushed { "ok" } else { "incomplete" };
    counter!("telemetry_flush_total", "result" => result).increment(1);
}

pub fn record_request(method: &str, status: Option<u16>, duration: Duration) {
    let status = status.map(|s| s.to_string()).unwrap_or_else(|| "aborted".to_string());
    counter!("http_requests_total", "method" => method.to_string(), "status" => status).increment(1);
    histogram!("http_request_duration_seconds", "method" => method.to_string()).record(duration.as_secs_f64());
}
