//! Prometheus metrics exposition
//!
//! - `relay_requests_total` (counter): labels `status`, `method`
//! - `relay_request_duration_seconds` (histogram): label `status`
//! - `relay_scheme_fallbacks_total` (counter)
//! - `relay_upstream_errors_total` (counter): label `error_type`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("relay_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `relay_request_duration_seconds` gets explicit buckets so it renders as a
/// histogram rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed relay request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("relay_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("relay_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a move from one candidate scheme to the next.
pub fn record_scheme_fallback() {
    metrics::counter!("relay_scheme_fallbacks_total").increment(1);
}

/// Record an upstream error with a classification label.
pub fn record_upstream_error(error_type: &str) {
    metrics::counter!("relay_upstream_errors_total", "error_type" => error_type.to_string())
        .increment(1);
}
