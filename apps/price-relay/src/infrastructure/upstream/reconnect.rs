//! Retry Policy
//!
//! Delay schedule shared by the stream connector (fixed delay, unbounded)
//! and startup authentication (exponential backoff with jitter, bounded).

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::UpstreamSettings;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt (1.0 keeps the delay fixed).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(2000))
    }
}

impl ReconnectConfig {
    /// Same delay before every attempt, no jitter, no limit.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Doubling delay with ±10% jitter, capped at `max_delay`.
    #[must_use]
    pub const fn exponential(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts,
        }
    }

    /// Stream reconnect schedule from upstream settings.
    #[must_use]
    pub const fn for_stream(settings: &UpstreamSettings) -> Self {
        Self::fixed(settings.reconnect_delay)
    }

    /// Startup authentication schedule from upstream settings.
    #[must_use]
    pub const fn for_auth(settings: &UpstreamSettings) -> Self {
        Self::exponential(
            Duration::from_secs(1),
            Duration::from_secs(30),
            settings.auth_max_attempts,
        )
    }
}

/// Retry policy producing the delay before each attempt.
///
/// # Example
///
/// ```rust
/// use price_relay::infrastructure::upstream::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_millis(2000)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Reset after a successful attempt.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_never_grows() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_millis(2000)));
        for _ in 0..100 {
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
        }
        assert_eq!(policy.attempt_count(), 100);
        assert!(policy.should_retry());
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            jitter_factor: 0.0,
            ..ReconnectConfig::exponential(Duration::from_millis(100), Duration::from_millis(350), 0)
        });

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(350)));
    }

    #[test]
    fn max_attempts_then_reset() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::exponential(
            Duration::from_millis(10),
            Duration::from_secs(1),
            3,
        ));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
    }

    #[test]
    fn jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig::exponential(
                Duration::from_millis(1000),
                Duration::from_secs(10),
                0,
            ));
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn schedules_from_settings() {
        let settings = UpstreamSettings::default();
        let stream = ReconnectConfig::for_stream(&settings);
        assert_eq!(stream.initial_delay, Duration::from_millis(2000));
        assert_eq!(stream.max_attempts, 0);

        let auth = ReconnectConfig::for_auth(&settings);
        assert_eq!(auth.max_attempts, 5);
    }
}
