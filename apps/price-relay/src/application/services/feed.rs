//! Upstream Feed State
//!
//! Connection status and counters for the single upstream feed, updated by
//! the pipeline and read by the health endpoint.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::session::ConnectionState;

/// Shared status of the upstream feed.
#[derive(Debug, Default)]
pub struct FeedState {
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    ticks_received: AtomicU64,
    ticks_dropped: AtomicU64,
}

/// Point-in-time copy of [`FeedState`] for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    /// Connection state name.
    pub state: &'static str,
    /// Whether quotes are currently flowing.
    pub connected: bool,
    /// Last time the subscription was acknowledged.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last time a tick arrived.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Most recent upstream error.
    pub error: Option<String>,
    /// Reconnect attempts since the last successful subscription.
    pub reconnect_attempts: u32,
    /// Ticks received this run.
    pub ticks_received: u64,
    /// Ticks dropped by the normalizer this run.
    pub ticks_dropped: u64,
}

impl FeedState {
    /// Create a disconnected feed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Subscribed {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Record an upstream error without changing the connection state.
    pub fn set_error(&self, message: String) {
        *self.error_message.write() = Some(message);
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a received tick.
    pub fn record_tick(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
        *self.last_tick_at.write() = Some(Utc::now());
    }

    /// Record a dropped tick.
    pub fn record_dropped(&self) {
        self.ticks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Copy the current values.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        let state = self.state();
        FeedSnapshot {
            state: state.as_str(),
            connected: state.is_live(),
            last_connected_at: *self.last_connected_at.read(),
            last_tick_at: *self.last_tick_at.read(),
            error: self.error_message.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
        }
    }
}
