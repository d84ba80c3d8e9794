// src/core/metrics.rs

//! Prometheus metrics for the event loop, the backend connection and the
//! request continuations. Registered once per process through `lazy_static`.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// Commands issued on the backend connection that are still owed a reply.
    pub static ref PENDING_COMMANDS: Gauge =
        register_gauge!("spinelbridge_pending_commands", "Commands waiting for a backend reply.").unwrap();
    /// Requests that have suspended and not yet finished.
    pub static ref SUSPENDED_REQUESTS: Gauge =
        register_gauge!("spinelbridge_suspended_requests", "Requests currently suspended on a continuation.").unwrap();
    /// 1 while the backend connection is established.
    pub static ref BACKEND_CONNECTED: Gauge =
        register_gauge!("spinelbridge_backend_connected", "Backend connection state (1 connected, 0 otherwise).").unwrap();

    // --- Counters ---
    pub static ref REQUESTS_STARTED_TOTAL: Counter =
        register_counter!("spinelbridge_requests_started_total", "Requests that created a continuation.").unwrap();
    pub static ref REQUESTS_COMPLETED_TOTAL: Counter =
        register_counter!("spinelbridge_requests_completed_total", "Requests that finished with a backend reply or a no-reply outcome.").unwrap();
    pub static ref COMMANDS_ISSUED_TOTAL: Counter =
        register_counter!("spinelbridge_commands_issued_total", "Commands written to the backend connection.").unwrap();
    /// Completions delivered by the event loop, labeled by outcome (`reply`, `no_reply`).
    pub static ref COMPLETIONS_TOTAL: CounterVec =
        register_counter_vec!("spinelbridge_completions_total", "Completion callbacks run, labeled by outcome.", &["outcome"]).unwrap();
    pub static ref REQUEST_TIMEOUTS_TOTAL: Counter =
        register_counter!("spinelbridge_request_timeouts_total", "Requests that gave up waiting for a completion.").unwrap();
    pub static ref HEARTBEATS_TOTAL: Counter =
        register_counter!("spinelbridge_heartbeats_total", "Heartbeat timer ticks run on the event loop.").unwrap();
    pub static ref LOOP_CALLBACK_PANICS_TOTAL: Counter =
        register_counter!("spinelbridge_loop_callback_panics_total", "Loop callbacks that panicked and were contained.").unwrap();

    // --- Histograms ---
    /// Time from continuation creation to consumption.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("spinelbridge_request_latency_seconds", "Suspended request latency in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
