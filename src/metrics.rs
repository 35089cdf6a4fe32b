/// Metrics and telemetry for the bucket gateway
///
/// Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Upload outcomes per conflict decision
/// - Reference segment writes and rotations
/// - Tenant lock contention

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, route, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Upload Metrics ==========

    /// Uploads by outcome (uploaded, conflict, skipped, overwritten, replaced, failed)
    pub static ref UPLOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gateway_uploads_total",
        "Total number of uploads by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Bytes accepted by uploads
    pub static ref UPLOAD_BYTES_TOTAL: IntCounter = register_int_counter!(
        "gateway_upload_bytes_total",
        "Total bytes written by uploads"
    )
    .unwrap();

    // ========== Reference Store Metrics ==========

    /// Segment writes by operation (append, remove, move, replace)
    pub static ref REFERENCE_WRITES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gateway_reference_writes_total",
        "Total number of reference segment writes",
        &["operation"]
    )
    .unwrap();

    /// Segment rotations
    pub static ref SEGMENT_ROTATIONS_TOTAL: IntCounter = register_int_counter!(
        "gateway_segment_rotations_total",
        "Total number of reference segment rotations"
    )
    .unwrap();

    /// Time spent waiting for a tenant write lock
    pub static ref LOCK_WAIT_SECONDS: Histogram = register_histogram!(
        "gateway_lock_wait_seconds",
        "Time spent acquiring tenant write locks in seconds",
        vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .unwrap();

    // ========== Tenant Metrics ==========

    /// Tenants currently in the map
    pub static ref TENANTS_ACTIVE: IntGauge = register_int_gauge!(
        "gateway_tenants_active",
        "Number of active tenants"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record the outcome of an upload
pub fn record_upload(outcome: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[outcome]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes);
}
