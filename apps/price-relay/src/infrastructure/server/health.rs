//! Health Check and Metrics Endpoints
//!
//! Used by container orchestrators, load balancers and monitoring systems.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{AppState, SharedState};
use crate::application::services::FeedSnapshot;
use crate::infrastructure::config::UpstreamMode;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Upstream mode.
    pub mode: &'static str,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub feed: FeedSnapshot,
    /// Connected downstream clients.
    pub clients: usize,
    /// Summary of the cached quote.
    pub last_quote: Option<LastQuoteInfo>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Quotes are flowing.
    Healthy,
    /// Upstream down but a cached quote is still being served.
    Degraded,
    /// Upstream down and nothing to serve.
    Unhealthy,
}

/// Cached quote summary.
#[derive(Debug, Clone, Serialize)]
pub struct LastQuoteInfo {
    /// Bid price.
    pub bid: Decimal,
    /// Ask price.
    pub ask: Decimal,
    /// Normalization timestamp.
    pub updated: DateTime<Utc>,
}

// =============================================================================
// HTTP Handlers
// =============================================================================

pub(super) async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler(State(state): State<SharedState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let feed = state.feed.snapshot();
    let last_quote = state.cache.get().map(|quote| LastQuoteInfo {
        bid: quote.bid,
        ask: quote.ask,
        updated: quote.updated,
    });

    HealthResponse {
        status: determine_health_status(state.mode, feed.connected, last_quote.is_some()),
        version: state.version.clone(),
        mode: state.mode.as_str(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        clients: state.hub.stats().clients,
        last_quote,
    }
}

const fn determine_health_status(mode: UpstreamMode, connected: bool, has_quote: bool) -> HealthStatus {
    match (mode, connected, has_quote) {
        (UpstreamMode::Bridge, ..) | (UpstreamMode::Streaming, true, _) => HealthStatus::Healthy,
        (UpstreamMode::Streaming, false, true) => HealthStatus::Degraded,
        (UpstreamMode::Streaming, false, false) => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Tests
// =============================================================================
