//! Metrics module
//!
//! Prometheus metrics for the upload pipeline. Metrics are registered in the
//! default registry; [`render`] produces the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "course_video_uploads_total",
        "Uploads by terminal status",
        &["status"]  // "completed", "failed" or "aborted"
    ).unwrap();

    // Chunk metrics
    pub static ref CHUNKS_UPLOADED: Counter = register_counter!(
        "course_video_chunks_uploaded_total",
        "Chunks committed by the server"
    ).unwrap();

    pub static ref CHUNK_BYTES_TOTAL: Counter = register_counter!(
        "course_video_chunk_bytes_total",
        "Bytes of committed chunks"
    ).unwrap();

    pub static ref CHUNK_RETRIES: Counter = register_counter!(
        "course_video_chunk_retries_total",
        "Chunk attempts after the first"
    ).unwrap();

    pub static ref CHUNK_DURATION: Histogram = register_histogram!(
        "course_video_chunk_duration_seconds",
        "Time to upload one chunk",
        vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    // Recovery metrics
    pub static ref SESSION_RECOVERIES: CounterVec = register_counter_vec!(
        "course_video_session_recoveries_total",
        "Session recoveries by kind",
        &["kind"]  // "automatic", "manual" or "reinitialize"
    ).unwrap();
}

/// Record an upload reaching a terminal status
pub fn record_upload(status: &str) {
    UPLOADS_TOTAL.with_label_values(&[status]).inc();
}

/// Record a committed chunk
pub fn record_chunk_uploaded(bytes: u64, duration_secs: f64) {
    CHUNKS_UPLOADED.inc();
    CHUNK_BYTES_TOTAL.inc_by(bytes as f64);
    CHUNK_DURATION.observe(duration_secs);
}

pub fn record_chunk_retry() {
    CHUNK_RETRIES.inc();
}

pub fn record_session_recovery(kind: &str) {
    SESSION_RECOVERIES.with_label_values(&[kind]).inc();
}

/// Encode every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
