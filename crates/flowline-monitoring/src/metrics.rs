//! Log-based metrics.
//!
//! Metrics are emitted as structured `tracing` events on the
//! `flowline::metrics` target, so any subscriber (or log pipeline) can pick
//! them up without a dedicated exporter.

use std::time::Duration;

use tracing::info;

/// Flowline specific metrics
pub struct FlowMetrics;

impl FlowMetrics {
    /// Record an HTTP request
    pub fn record_http_request(path: &str, method: &str, status_code: u16, duration: Duration) {
        info!(
            target: "flowline::metrics",
            metric = "http_request",
            path,
            method,
            status = status_code,
            duration_ms = duration_ms(duration),
            "HTTP Request"
        );
    }

    /// Record a completed flow execution
    pub fn record_flow_execution(flow: &str, mode: &str, duration: Duration, success: bool) {
        info!(
            target: "flowline::metrics",
            metric = "flow_execution",
            flow,
            mode,
            duration_ms = duration_ms(duration),
            success,
            "Flow Execution"
        );
    }

    /// Record how many chunks a streaming invocation delivered
    pub fn record_stream_chunks(flow: &str, chunks: usize, completed: bool) {
        info!(
            target: "flowline::metrics",
            metric = "stream_chunks",
            flow,
            chunks,
            completed,
            "Stream Chunks"
        );
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
