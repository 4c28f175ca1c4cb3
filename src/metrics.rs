use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder, register_histogram,
    register_int_counter, register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: IntCounterVec = register_int_counter_vec!(
        "roast_requests_total",
        "Total number of tracked requests",
        &["endpoint", "outcome"]
    )
    .unwrap();
    pub static ref RATE_LIMITED_TOTAL: IntCounter = register_int_counter!(
        "roast_rate_limited_total",
        "Requests rejected by the rate limiter"
    )
    .unwrap();
    pub static ref UPSTREAM_CALLS: IntCounterVec = register_int_counter_vec!(
        "roast_upstream_calls_total",
        "Gemini calls by key and outcome",
        &["key", "outcome"]
    )
    .unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "roast_upstream_latency_seconds",
        "Gemini request latency in seconds"
    )
    .unwrap();
    pub static ref ACTIVE_SESSIONS: IntGauge =
        register_int_gauge!("roast_active_sessions", "Currently active client sessions").unwrap();
}

pub fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// Renders every registered collector in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
