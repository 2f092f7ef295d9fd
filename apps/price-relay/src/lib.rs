#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Relay - Real-time Quote Fan-out
//!
//! Ingests a single upstream quote stream, normalizes and caches the latest
//! quote, and fans it out to any number of downstream WebSocket clients.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core quote logic and data types
//!   - `quote`: Raw ticks, normalized quotes, session extrema, sentiment
//!   - `normalizer`: Fixed-precision normalization and extrema tracking
//!   - `session`: Upstream session tokens and connection states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Quote store, session provider, quote sink, upstream events
//!   - `services`: Last quote cache, feed state, relay pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: REST session client, session supervisor, streaming connector
//!   - `broadcast`: Downstream client registry and fan-out
//!   - `persistence`: File-backed last quote store
//!   - `server`: HTTP banner, health, metrics and downstream WebSocket
//!   - `config`: Configuration from the environment
//!
//! # Data Flow
//!
//! ```text
//! Streaming API ──► Connector ──┐
//!                               ├──► Pipeline ──► Cache ──► Hub ──► Client 1
//! Bridge client ──► /ws tick ───┘       │                      ├──► Client 2
//!                                  Normalizer                  └──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core quote types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::normalizer::{NormalizeError, NormalizerConfig, QuoteNormalizer};
pub use domain::quote::{Quote, RawTick, SessionStats, Sentiment};
pub use domain::session::{AuthError, ConnectionState, ResolutionError, SessionError, SessionState};

// Application services
pub use application::ports::{QuoteSink, QuoteStore, SessionProvider, UpstreamEvent};
pub use application::services::{FeedState, LastQuoteCache, RelayPipeline};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, Credentials, QuoteSettings, RelayConfig, ServerSettings,
    UpstreamMode, UpstreamSettings,
};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{BroadcastHub, HubConfig, ServerMessage, SharedBroadcastHub};

// Server
pub use infrastructure::server::{AppState, RelayServer, ServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
