//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::domain::normalizer::{DEFAULT_UNIT, NormalizerConfig};

/// Default upstream REST base URL.
pub const DEFAULT_API_URL: &str = "https://api-capital.backend-capital.com/api/v1";

/// Default upstream streaming URL.
pub const DEFAULT_STREAM_URL: &str = "wss://api-streaming-capital.backend-capital.com/connect";

/// Default instrument search terms, in priority order.
pub const DEFAULT_SEARCH_TERMS: [&str; 3] = ["gold", "xauusd", "spot gold"];

/// Shortest accepted upstream reconnect delay.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1500);

/// Longest accepted upstream reconnect delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Where quotes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpstreamMode {
    /// A bridge client pushes `tick` messages over a downstream socket.
    #[default]
    Bridge,
    /// The relay authenticates and subscribes to the upstream streaming API.
    Streaming,
}

impl UpstreamMode {
    /// Parse mode from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "streaming" | "stream" | "api" => Self::Streaming,
            _ => Self::Bridge,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::Streaming => "streaming",
        }
    }
}

/// Upstream API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    identifier: String,
    password: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, identifier: String, password: String) -> Self {
        Self {
            api_key,
            identifier,
            password,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the login identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("identifier", &self.identifier)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 10000 }
    }
}

/// Upstream streaming API settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// REST base URL.
    pub api_url: String,
    /// Streaming WebSocket URL.
    pub stream_url: String,
    /// Instrument search terms, in priority order.
    pub search_terms: Vec<String>,
    /// Accept any market whose epic starts with this prefix.
    pub epic_prefix: Option<String>,
    /// Instrument used when resolution fails.
    pub fallback_epic: Option<String>,
    /// Fixed delay before each reconnect.
    pub reconnect_delay: Duration,
    /// Keep-alive ping interval.
    pub ping_interval: Duration,
    /// How long to wait for any frame after a ping.
    pub pong_timeout: Duration,
    /// Startup authentication attempts before giving up (0 = unlimited).
    pub auth_max_attempts: u32,
    /// Session re-acquisition period.
    pub session_refresh: Duration,
    /// Sentiment poll period (`None` = disabled).
    pub sentiment_poll: Option<Duration>,
    /// REST request timeout.
    pub request_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            search_terms: DEFAULT_SEARCH_TERMS.iter().map(ToString::to_string).collect(),
            epic_prefix: None,
            fallback_epic: None,
            reconnect_delay: Duration::from_millis(2000),
            ping_interval: Duration::from_secs(300),
            pong_timeout: Duration::from_secs(30),
            auth_max_attempts: 5,
            session_refresh: Duration::from_secs(510),
            sentiment_poll: Some(Duration::from_secs(300)),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Quote normalization and persistence settings.
#[derive(Debug, Clone)]
pub struct QuoteSettings {
    /// Added to the bid when the upstream provides no ask.
    pub spread: Decimal,
    /// Added to an upstream-provided ask.
    pub ask_markup: Decimal,
    /// Unit label.
    pub unit: String,
    /// Symbol override.
    pub symbol: Option<String>,
    /// Path of the stored last quote.
    pub store_path: PathBuf,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            spread: Decimal::new(100, 2),
            ask_markup: Decimal::new(0, 2),
            unit: DEFAULT_UNIT.to_string(),
            symbol: None,
            store_path: PathBuf::from("./lastrate.json"),
        }
    }
}

impl QuoteSettings {
    /// Normalizer parameters derived from these settings.
    #[must_use]
    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            spread: self.spread,
            ask_markup: self.ask_markup,
            unit: self.unit.clone(),
            symbol: self.symbol.clone(),
        }
    }
}

/// Downstream fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Cached quote re-broadcast period.
    pub rebroadcast_interval: Duration,
    /// Liveness sweep period.
    pub liveness_interval: Duration,
    /// Per-client outbound queue capacity.
    pub client_queue_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            rebroadcast_interval: Duration::from_millis(1000),
            liveness_interval: Duration::from_secs(15),
            client_queue_capacity: 64,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream mode.
    pub mode: UpstreamMode,
    /// Upstream credentials (required in streaming mode).
    pub credentials: Option<Credentials>,
    /// Listener settings.
    pub server: ServerSettings,
    /// Upstream settings.
    pub upstream: UpstreamSettings,
    /// Quote settings.
    pub quote: QuoteSettings,
    /// Broadcast settings.
    pub broadcast: BroadcastSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: UpstreamMode::Bridge,
            credentials: None,
            server: ServerSettings::default(),
            upstream: UpstreamSettings::default(),
            quote: QuoteSettings::default(),
            broadcast: BroadcastSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if streaming credentials are missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if streaming credentials are missing or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let mode = env
            .get("UPSTREAM_MODE")
            .map(|s| UpstreamMode::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let credentials = match mode {
            UpstreamMode::Streaming => Some(Credentials::new(
                env.required("UPSTREAM_API_KEY")?,
                env.required("UPSTREAM_IDENTIFIER")?,
                env.required("UPSTREAM_PASSWORD")?,
            )),
            UpstreamMode::Bridge => None,
        };

        let server = ServerSettings {
            port: env.parse_u16("PORT", ServerSettings::default().port),
        };

        let upstream_defaults = UpstreamSettings::default();
        let sentiment_secs = env.parse_u64("SENTIMENT_POLL_SECS", 300);
        let upstream = UpstreamSettings {
            api_url: env
                .get("UPSTREAM_API_URL")
                .map_or(upstream_defaults.api_url, |u| {
                    u.trim_end_matches('/').to_string()
                }),
            stream_url: env
                .get("UPSTREAM_STREAM_URL")
                .unwrap_or(upstream_defaults.stream_url),
            search_terms: env
                .get("UPSTREAM_SEARCH_TERMS")
                .map(|s| split_list(&s))
                .filter(|terms| !terms.is_empty())
                .unwrap_or(upstream_defaults.search_terms),
            epic_prefix: env.get("UPSTREAM_EPIC_PREFIX"),
            fallback_epic: env.get("UPSTREAM_FALLBACK_EPIC"),
            reconnect_delay: clamp_reconnect_delay(env.parse_duration_millis(
                "UPSTREAM_RECONNECT_DELAY_MS",
                upstream_defaults.reconnect_delay,
            )),
            ping_interval: env.parse_duration_secs(
                "UPSTREAM_PING_INTERVAL_SECS",
                upstream_defaults.ping_interval,
            ),
            pong_timeout: env.parse_duration_secs(
                "UPSTREAM_PONG_TIMEOUT_SECS",
                upstream_defaults.pong_timeout,
            ),
            auth_max_attempts: env.parse_u32(
                "UPSTREAM_AUTH_MAX_ATTEMPTS",
                upstream_defaults.auth_max_attempts,
            ),
            session_refresh: env.parse_duration_secs(
                "SESSION_REFRESH_SECS",
                upstream_defaults.session_refresh,
            ),
            sentiment_poll: (sentiment_secs > 0).then(|| Duration::from_secs(sentiment_secs)),
            request_timeout: upstream_defaults.request_timeout,
        };

        let quote_defaults = QuoteSettings::default();
        let spread = env.parse_decimal("QUOTE_SPREAD", quote_defaults.spread)?;
        if spread.is_sign_negative() {
            return Err(ConfigError::InvalidValue {
                key: "QUOTE_SPREAD".to_string(),
                reason: "spread cannot be negative".to_string(),
            });
        }
        let quote = QuoteSettings {
            spread,
            ask_markup: env.parse_decimal("QUOTE_ASK_MARKUP", quote_defaults.ask_markup)?,
            unit: env.get("QUOTE_UNIT").unwrap_or(quote_defaults.unit),
            symbol: env.get("QUOTE_SYMBOL"),
            store_path: env
                .get("LAST_QUOTE_PATH")
                .map_or(quote_defaults.store_path, PathBuf::from),
        };

        let broadcast_defaults = BroadcastSettings::default();
        let broadcast = BroadcastSettings {
            rebroadcast_interval: env.parse_duration_millis(
                "BROADCAST_INTERVAL_MS",
                broadcast_defaults.rebroadcast_interval,
            ),
            liveness_interval: env.parse_duration_secs(
                "LIVENESS_INTERVAL_SECS",
                broadcast_defaults.liveness_interval,
            ),
            client_queue_capacity: env
                .parse_usize(
                    "CLIENT_QUEUE_CAPACITY",
                    broadcast_defaults.client_queue_capacity,
                )
                .max(1),
        };

        Ok(Self {
            mode,
            credentials,
            server,
            upstream,
            quote,
            broadcast,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Key lookup with the parsing helpers used by [`RelayConfig::from_lookup`].
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value for `key`.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse_u16(&self, key: &str, default: u16) -> u16 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn parse_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn parse_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn parse_usize(&self, key: &str, default: usize) -> usize {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn parse_duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn parse_duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn parse_decimal(&self, key: &str, default: Decimal) -> Result<Decimal, ConfigError> {
        self.get(key).map_or(Ok(default), |v| {
            Decimal::from_str(&v).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
    }
}

/// Keep the reconnect delay inside the range the upstream tolerates.
fn clamp_reconnect_delay(delay: Duration) -> Duration {
    let clamped = delay.clamp(MIN_RECONNECT_DELAY, MAX_RECONNECT_DELAY);
    if clamped != delay {
        tracing::warn!(
            requested_ms = %delay.as_millis(),
            applied_ms = %clamped.as_millis(),
            "UPSTREAM_RECONNECT_DELAY_MS out of range, clamping"
        );
    }
    clamped
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
