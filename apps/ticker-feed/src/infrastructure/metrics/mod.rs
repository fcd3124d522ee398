//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Stream**: frames received and dropped, reconnects, connection state
//! - **Store**: ingest outcomes
//! - **Gateway**: cache outcomes and upstream fetch latency per provider
//! - **Feed**: attached consumer count
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::ticker::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Idempotent: later calls return the handle installed by the first one.
///
/// # Panics
///
/// Panics if another global recorder was installed before the first call.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_feed_frames_received_total",
        "Text frames received from the ticker stream"
    );
    describe_counter!(
        "ticker_feed_frames_dropped_total",
        "Ticker frames dropped during validation, by reason"
    );
    describe_counter!(
        "ticker_feed_reconnects_total",
        "Ticker stream reconnection attempts"
    );
    describe_gauge!(
        "ticker_feed_connection_state",
        "Stream connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting)"
    );
    describe_counter!(
        "ticker_feed_store_ingest_total",
        "Store write attempts by outcome"
    );
    describe_counter!(
        "ticker_feed_gateway_requests_total",
        "REST gateway lookups by provider, resource and cache outcome"
    );
    describe_histogram!(
        "ticker_feed_gateway_fetch_seconds",
        "Upstream REST fetch latency"
    );
    describe_gauge!(
        "ticker_feed_consumers",
        "Consumers attached to the shared feed"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// How a gateway lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a fresh cache entry.
    Hit,
    /// Fetched from upstream and cached.
    Fetched,
    /// Upstream failed; served an expired entry.
    StaleFallback,
    /// Upstream failed with nothing cached; served an empty result.
    Empty,
}

impl CacheOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Fetched => "fetched",
            Self::StaleFallback => "stale_fallback",
            Self::Empty => "empty",
        }
    }
}

/// Record a text frame received from the stream.
pub fn record_frame_received() {
    counter!("ticker_feed_frames_received_total").increment(1);
}

/// Record a frame dropped during validation.
pub fn record_frame_dropped(reason: &'static str) {
    counter!("ticker_feed_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("ticker_feed_reconnects_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("ticker_feed_connection_state").set(state.as_gauge());
}

/// Record a store write attempt.
pub fn record_ingest(outcome: &'static str) {
    counter!("ticker_feed_store_ingest_total", "outcome" => outcome).increment(1);
}

/// Record how a gateway lookup was served.
pub fn record_gateway_request(provider: &'static str, resource: &'static str, outcome: CacheOutcome) {
    counter!(
        "ticker_feed_gateway_requests_total",
        "provider" => provider,
        "resource" => resource,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record upstream fetch latency.
pub fn record_gateway_fetch(provider: &'static str, duration: Duration) {
    histogram!("ticker_feed_gateway_fetch_seconds", "provider" => provider)
        .record(duration.as_secs_f64());
}

/// Update the attached consumer gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_consumers(count: usize) {
    gauge!("ticker_feed_consumers").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
