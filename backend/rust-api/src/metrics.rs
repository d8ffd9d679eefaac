use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // Business Metrics
    pub static ref ATTEMPTS_STARTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "test_attempts_started_total",
        "Total number of test attempts started or resumed",
        &["mode"]
    )
    .unwrap();

    pub static ref ATTEMPTS_SUBMITTED_TOTAL: IntCounter = register_int_counter!(
        "test_attempts_submitted_total",
        "Total number of test attempts submitted for scoring"
    )
    .unwrap();

    pub static ref PROGRESS_UPDATES_TOTAL: IntCounter = register_int_counter!(
        "test_attempt_progress_updates_total",
        "Total number of attempt progress saves"
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}
