//! Heartbeat Manager
//!
//! Keeps the upstream stream alive with periodic pings and reports a
//! timeout when no frame at all arrives within the pong window after a ping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::UpstreamSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// How long to wait for any frame after a ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(300),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub const fn from_upstream_settings(settings: &UpstreamSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval,
            pong_timeout: settings.pong_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send the keep-alive pings now.
    SendPing,
    /// Nothing arrived in time; recycle the connection.
    Timeout,
}

/// State shared between the heartbeat manager and the stream reader.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<Instant>,
    ping_sent_at: RwLock<Option<Instant>>,
    waiting: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            ping_sent_at: RwLock::new(None),
            waiting: AtomicBool::new(false),
        }
    }

    /// Record that a frame (of any kind) arrived.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
        self.waiting.store(false, Ordering::SeqCst);
    }

    /// Mark that a ping was just sent.
    pub fn mark_ping_sent(&self) {
        *self.ping_sent_at.write() = Some(Instant::now());
        self.waiting.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Time since the outstanding ping was sent.
    #[must_use]
    pub fn time_since_ping(&self) -> Option<Duration> {
        if !self.is_waiting() {
            return None;
        }
        self.ping_sent_at.read().map(|sent| sent.elapsed())
    }

    /// Time since the last frame.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

/// Heartbeat manager that monitors connection health.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or a timeout is detected.
    ///
    /// The first ping goes out one full interval after start; the pong window
    /// is checked at a finer cadence so a dead link is noticed promptly.
    pub async fn run(self) {
        let start = tokio::time::Instant::now();
        let ping_period = self.config.ping_interval.max(Duration::from_millis(10));
        let mut ping = tokio::time::interval_at(start + ping_period, ping_period);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let check_period = (self.config.pong_timeout / 4).max(Duration::from_millis(10));
        let mut check = tokio::time::interval_at(start + check_period, check_period);
        check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = check.tick() => {
                    if self.timed_out().await {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
            }
        }
    }

    /// Emit `Timeout` if the outstanding ping went unanswered for too long.
    async fn timed_out(&self) -> bool {
        let Some(elapsed) = self.state.time_since_ping() else {
            return false;
        };
        if elapsed <= self.config.pong_timeout {
            return false;
        }

        tracing::warn!(
            elapsed_secs = elapsed.as_secs(),
            timeout_secs = self.config.pong_timeout.as_secs(),
            "Heartbeat timeout detected"
        );
        let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
        true
    }
}
