//! Upstream Wire Types
//!
//! JSON shapes exchanged with the upstream REST API and streaming endpoint.
//!
//! # Streaming Messages
//!
//! ## Outbound
//! - `marketData.subscribe`: subscribe one epic using both session tokens
//! - `ping`: application keep-alive
//!
//! ## Inbound
//! - `quote`: price update for a subscribed epic
//! - `marketData.subscribe`: subscription acknowledgement or rejection
//! - `ping`: keep-alive acknowledgement
//!
//! # REST
//! - `POST /session`: login, tokens returned in `CST` / `X-SECURITY-TOKEN` headers
//! - `GET /markets?searchTerm=`: instrument search
//! - `GET /clientsentiment/{epic}`: share of clients long and short

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::{RawTick, Sentiment, deserialize_lenient_price};
use crate::domain::session::SessionTokens;

/// Destination of subscription requests and acknowledgements.
pub const DESTINATION_SUBSCRIBE: &str = "marketData.subscribe";

/// Destination of quote updates.
pub const DESTINATION_QUOTE: &str = "quote";

/// Destination of keep-alive messages.
pub const DESTINATION_PING: &str = "ping";

/// Correlation id of every subscribe request.
pub const SUBSCRIBE_CORRELATION_ID: &str = "1";

/// Subscription entry status reported for an accepted epic.
pub const SUBSCRIPTION_PROCESSED: &str = "PROCESSED";

// =============================================================================
// Outbound Streaming Messages
// =============================================================================

/// Epic list carried by a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpicsPayload {
    /// Instruments to subscribe.
    pub epics: Vec<String>,
}

/// Market data subscription request.
///
/// # Wire Format (JSON)
/// ```json
/// {"destination":"marketData.subscribe","correlationId":"1","cst":"..","securityToken":"..","payload":{"epics":["GOLD"]}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Always `marketData.subscribe`.
    pub destination: &'static str,
    /// Request correlation id.
    pub correlation_id: String,
    /// Client session token.
    pub cst: String,
    /// Account security token.
    pub security_token: String,
    /// Instruments to subscribe.
    pub payload: EpicsPayload,
}

impl SubscribeRequest {
    /// Build a subscription for a single epic.
    #[must_use]
    pub fn new(tokens: &SessionTokens, epic: &str) -> Self {
        Self {
            destination: DESTINATION_SUBSCRIBE,
            correlation_id: SUBSCRIBE_CORRELATION_ID.to_string(),
            cst: tokens.cst().to_string(),
            security_token: tokens.security_token().to_string(),
            payload: EpicsPayload {
                epics: vec![epic.to_string()],
            },
        }
    }
}

/// Application-level keep-alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    /// Always `ping`.
    pub destination: &'static str,
    /// Request correlation id.
    pub correlation_id: String,
    /// Client session token.
    pub cst: String,
    /// Account security token.
    pub security_token: String,
}

impl PingRequest {
    /// Build a ping.
    #[must_use]
    pub fn new(tokens: &SessionTokens, correlation_id: u64) -> Self {
        Self {
            destination: DESTINATION_PING,
            correlation_id: correlation_id.to_string(),
            cst: tokens.cst().to_string(),
            security_token: tokens.security_token().to_string(),
        }
    }
}

// =============================================================================
// Inbound Streaming Messages
// =============================================================================

/// Common envelope of every inbound streaming message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message destination.
    pub destination: Option<String>,
    /// Correlation id echoed from the request.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// `OK` or `ERROR`.
    #[serde(default)]
    pub status: Option<String>,
    /// Destination-specific payload.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Payload of a `quote` message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuotePayload {
    /// Instrument the quote belongs to.
    pub epic: String,
    /// Bid price.
    #[serde(default, deserialize_with = "deserialize_lenient_price")]
    pub bid: Option<Decimal>,
    /// Offer price.
    #[serde(default, deserialize_with = "deserialize_lenient_price")]
    pub ofr: Option<Decimal>,
    /// Ask price, used by some feeds instead of `ofr`.
    #[serde(default, deserialize_with = "deserialize_lenient_price")]
    pub ask: Option<Decimal>,
    /// Session high.
    #[serde(default, deserialize_with = "deserialize_lenient_price")]
    pub high: Option<Decimal>,
    /// Session low.
    #[serde(default, deserialize_with = "deserialize_lenient_price")]
    pub low: Option<Decimal>,
    /// Upstream timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl QuotePayload {
    /// Convert into a raw tick.
    #[must_use]
    pub fn into_raw_tick(self) -> RawTick {
        RawTick {
            symbol: Some(self.epic),
            bid: self.bid,
            ask: self.ofr.or(self.ask),
            high: self.high,
            low: self.low,
            time: None,
            time_msc: self.timestamp.map(serde_json::Value::from),
            volume: None,
        }
    }
}

/// Payload of a subscription acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    /// Per-epic subscription status.
    #[serde(default)]
    pub subscriptions: BTreeMap<String, String>,
    /// Error code when the request was rejected.
    #[serde(default)]
    pub error_code: Option<String>,
}

/// A decoded subscription acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAck {
    /// Envelope status.
    pub status: Option<String>,
    /// Decoded payload.
    pub payload: SubscribePayload,
}

impl SubscribeAck {
    /// Describe why the subscription was refused, or `None` if it was accepted.
    #[must_use]
    pub fn rejection(&self) -> Option<String> {
        if let Some(code) = &self.payload.error_code {
            return Some(code.clone());
        }
        if self
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("ERROR"))
        {
            return Some("subscription status ERROR".to_string());
        }

        let refused: Vec<String> = self
            .payload
            .subscriptions
            .iter()
            .filter(|(_, status)| status.as_str() != SUBSCRIPTION_PROCESSED)
            .map(|(epic, status)| format!("{epic}: {status}"))
            .collect();

        (!refused.is_empty()).then(|| refused.join(", "))
    }
}

/// Decoded streaming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Price update.
    Quote(QuotePayload),
    /// Subscription acknowledgement.
    Subscribe(SubscribeAck),
    /// Keep-alive acknowledgement.
    Ping,
    /// Any other destination.
    Other(String),
}

// =============================================================================
// REST Messages
// =============================================================================

/// Login request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest<'a> {
    /// Account identifier.
    pub identifier: &'a str,
    /// Account password.
    pub password: &'a str,
    /// Whether `password` is encrypted.
    pub encrypted_password: bool,
}

/// One instrument from a market search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    /// Instrument identifier.
    pub epic: String,
    /// Display name.
    #[serde(default)]
    pub instrument_name: Option<String>,
    /// Whether prices for this instrument can be streamed.
    #[serde(default)]
    pub streaming_prices_available: bool,
}

/// Market search response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketSearchResponse {
    /// Matching instruments.
    #[serde(default)]
    pub markets: Vec<MarketSummary>,
}

/// Client sentiment response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentResponse {
    /// Percentage of clients long.
    pub long_position_percentage: Decimal,
    /// Percentage of clients short.
    pub short_position_percentage: Decimal,
}

impl From<SentimentResponse> for Sentiment {
    fn from(value: SentimentResponse) -> Self {
        Self {
            buyers: value.long_position_percentage,
            sellers: value.short_position_percentage,
        }
    }
}
