//! Prometheus metrics for the worker multiplexer.
//!
//! All metrics follow the naming convention: `mux_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., mux_request_timeouts_total)
//! - **Gauge**: Value that can go up or down (e.g., mux_pending_requests)
//!
//! The multiplexer keeps its own atomic counters; [`StatsMirror`] copies them
//! into these metrics so the core crate stays free of a metrics dependency.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Mutex;
use worker_mux::{StatsSnapshot, WorkerClient};

use crate::TelemetryError;

lazy_static! {
    /// Metrics registry for the multiplexer
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // REQUEST METRICS
    // =========================================================================

    /// Requests registered and posted to the worker
    pub static ref REQUESTS_DISPATCHED: IntCounter = IntCounter::new(
        "mux_requests_dispatched_total",
        "Total requests registered and posted to the worker"
    ).expect("metric creation failed");

    /// Requests resolved by a final reply
    pub static ref RESPONSES_COMPLETED: IntCounter = IntCounter::new(
        "mux_responses_completed_total",
        "Total requests resolved by a final reply"
    ).expect("metric creation failed");

    /// Requests rejected by the worker or by channel close
    pub static ref REQUESTS_FAILED: IntCounter = IntCounter::new(
        "mux_requests_failed_total",
        "Total requests rejected by the worker or by channel close"
    ).expect("metric creation failed");

    /// Requests whose deadline fired
    pub static ref REQUEST_TIMEOUTS: IntCounter = IntCounter::new(
        "mux_request_timeouts_total",
        "Total requests that timed out"
    ).expect("metric creation failed");

    /// Requests refused before the handshake completed
    pub static ref REQUESTS_NOT_CONNECTED: IntCounter = IntCounter::new(
        "mux_requests_not_connected_total",
        "Total requests refused because the handshake had not completed"
    ).expect("metric creation failed");

    /// Non-final chunks delivered to streaming callers
    pub static ref STREAM_CHUNKS: IntCounter = IntCounter::new(
        "mux_stream_chunks_total",
        "Total non-final response chunks delivered"
    ).expect("metric creation failed");

    // =========================================================================
    // ROUTER METRICS
    // =========================================================================

    /// Replies for correlation ids nobody is waiting on
    pub static ref UNEXPECTED_IDS: IntCounter = IntCounter::new(
        "mux_unexpected_correlation_ids_total",
        "Total replies received for unknown correlation ids"
    ).expect("metric creation failed");

    /// Worker events published to subscribers
    pub static ref EVENTS_PUBLISHED: IntCounter = IntCounter::new(
        "mux_events_published_total",
        "Total worker events published to subscribers"
    ).expect("metric creation failed");

    // =========================================================================
    // STATE GAUGES
    // =========================================================================

    /// Calls currently awaiting a terminal reply
    pub static ref PENDING_REQUESTS: IntGauge = IntGauge::new(
        "mux_pending_requests",
        "Number of requests awaiting a terminal reply"
    ).expect("metric creation failed");

    /// Unresolved records retained for late-reply diagnostics
    pub static ref UNRESOLVED_RECORDS: IntGauge = IntGauge::new(
        "mux_unresolved_records",
        "Number of timed-out requests retained for late-reply diagnostics"
    ).expect("metric creation failed");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Requests
        Box::new(REQUESTS_DISPATCHED.clone()),
        Box::new(RESPONSES_COMPLETED.clone()),
        Box::new(REQUESTS_FAILED.clone()),
        Box::new(REQUEST_TIMEOUTS.clone()),
        Box::new(REQUESTS_NOT_CONNECTED.clone()),
        Box::new(STREAM_CHUNKS.clone()),
        // Router
        Box::new(UNEXPECTED_IDS.clone()),
        Box::new(EVENTS_PUBLISHED.clone()),
        // State
        Box::new(PENDING_REQUESTS.clone()),
        Box::new(UNRESOLVED_RECORDS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Copies a client's statistics into the Prometheus metrics.
///
/// Counters advance by the difference since the previous observation, so a
/// mirror should be used for one client only.
#[derive(Debug, Default)]
pub struct StatsMirror {
    last: Mutex<Observed>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Observed {
    stats: StatsSnapshot,
    events_published: u64,
}

impl StatsMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the client's current statistics.
    pub fn observe_client(&self, client: &WorkerClient) {
        self.observe(
            client.stats(),
            client.events_published(),
            client.pending_count(),
            client.unresolved_count(),
        );
    }

    /// Observe raw values.
    pub fn observe(
        &self,
        stats: StatsSnapshot,
        events_published: u64,
        pending: usize,
        unresolved: usize,
    ) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        advance(&REQUESTS_DISPATCHED, last.stats.registered, stats.registered);
        advance(&RESPONSES_COMPLETED, last.stats.completed, stats.completed);
        advance(&REQUESTS_FAILED, last.stats.failed, stats.failed);
        advance(&REQUEST_TIMEOUTS, last.stats.timeouts, stats.timeouts);
        advance(&REQUESTS_NOT_CONNECTED, last.stats.not_connected, stats.not_connected);
        advance(&STREAM_CHUNKS, last.stats.chunks, stats.chunks);
        advance(&UNEXPECTED_IDS, last.stats.unexpected, stats.unexpected);
        advance(&EVENTS_PUBLISHED, last.events_published, events_published);

        PENDING_REQUESTS.set(i64::try_from(pending).unwrap_or(i64::MAX));
        UNRESOLVED_RECORDS.set(i64::try_from(unresolved).unwrap_or(i64::MAX));

        *last = Observed {
            stats,
            events_published,
        };
    }
}

fn advance(counter: &IntCounter, previous: u64, current: u64) {
    if current > previous {
        counter.inc_by(current - previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_is_idempotent() {
        register_metrics().unwrap();
        register_metrics().unwrap();
    }

    #[test]
    fn test_mirror_advances_by_delta() {
        let mirror = StatsMirror::new();
        let before = STREAM_CHUNKS.get();

        let first = StatsSnapshot {
            chunks: 3,
            ..StatsSnapshot::default()
        };
        mirror.observe(first, 0, 2, 1);
        mirror.observe(StatsSnapshot { chunks: 5, ..first }, 0, 0, 1);

        // Other tests share the global counter, so only a lower bound holds.
        assert!(STREAM_CHUNKS.get() >= before + 5);
    }

    #[test]
    fn test_gather_renders_text_format() {
        register_metrics().unwrap();
        REQUESTS_DISPATCHED.inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("mux_requests_dispatched_total"));
        assert!(text.contains("mux_pending_requests"));
    }
}
