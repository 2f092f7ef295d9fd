//! Configuration Module
//!
//! Environment-driven configuration for the relay.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, Credentials, DEFAULT_API_URL, DEFAULT_SEARCH_TERMS,
    DEFAULT_STREAM_URL, QuoteSettings, RelayConfig, ServerSettings, UpstreamMode,
    UpstreamSettings,
};
