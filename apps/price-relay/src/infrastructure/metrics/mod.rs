//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: received, dropped (by reason), malformed upstream messages
//! - **Quotes**: published quotes and persistence failures
//! - **Upstream**: reconnects and session refreshes
//! - **Clients**: connected count, queue drops, pruned connections
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the relay port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INIT_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Install the Prometheus recorder and register metric descriptions.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns `BuildError` if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let _guard = INIT_LOCK.lock();
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
        "price_relay_ticks_received_total",
        "Total raw ticks received from the upstream or bridge"
    );
    describe_counter!(
        "price_relay_ticks_dropped_total",
        "Total ticks dropped by the normalizer, by reason"
    );
    describe_counter!(
        "price_relay_parse_errors_total",
        "Total malformed upstream messages"
    );
    describe_counter!(
        "price_relay_quotes_published_total",
        "Total normalized quotes published to clients"
    );
    describe_counter!(
        "price_relay_persistence_failures_total",
        "Total failures reading or writing the stored quote"
    );

    describe_counter!(
        "price_relay_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_counter!(
        "price_relay_session_refreshes_total",
        "Total upstream session refreshes, by outcome"
    );

    describe_gauge!(
        "price_relay_clients",
        "Number of connected downstream WebSocket clients"
    );
    describe_counter!(
        "price_relay_client_messages_dropped_total",
        "Total messages dropped because a client queue was full"
    );
    describe_counter!(
        "price_relay_clients_pruned_total",
        "Total clients removed by liveness sweep or send failure"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a raw tick.
pub fn record_tick_received() {
    counter!("price_relay_ticks_received_total").increment(1);
}

/// Record a dropped tick.
pub fn record_tick_dropped(reason: &'static str) {
    counter!("price_relay_ticks_dropped_total", "reason" => reason).increment(1);
}

/// Record a malformed upstream message.
pub fn record_parse_error(source: &'static str) {
    counter!("price_relay_parse_errors_total", "source" => source).increment(1);
}

/// Record a published quote.
pub fn record_quote_published() {
    counter!("price_relay_quotes_published_total").increment(1);
}

/// Record a failed store operation.
pub fn record_persistence_failure(operation: &'static str) {
    counter!(
        "price_relay_persistence_failures_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("price_relay_reconnects_total").increment(1);
}

/// Record a session refresh outcome.
pub fn record_session_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("price_relay_session_refreshes_total", "outcome" => outcome).increment(1);
}

/// Update the connected client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(count: usize) {
    gauge!("price_relay_clients").set(count as f64);
}

/// Record messages dropped for a slow client.
pub fn record_client_message_dropped() {
    counter!("price_relay_client_messages_dropped_total").increment(1);
}

/// Record clients removed from the hub.
pub fn record_clients_pruned(reason: &'static str, count: u64) {
    counter!("price_relay_clients_pruned_total", "reason" => reason).increment(count);
}

// =============================================================================
// Tests
// =============================================================================
