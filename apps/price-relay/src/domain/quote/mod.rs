//! Quote Domain Types
//!
//! Canonical price records produced by the normalizer and delivered to
//! downstream clients, together with the raw tick shape accepted from
//! upstream sources.
//!
//! # Precision
//!
//! Every price carries exactly two fraction digits. Rounding is
//! half-away-from-zero on the decimal representation of the input, so
//! upstream JSON numbers are read from their textual form rather than
//! through a binary float.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Number of fraction digits carried by every price.
pub const PRICE_SCALE: u32 = 2;

// =============================================================================
// Price Helpers
// =============================================================================

/// Round a price to two decimal places (half away from zero) with a fixed
/// scale of two, so `2350.1` renders as `2350.10`.
#[must_use]
pub fn round_price(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(PRICE_SCALE);
    rounded
}

/// Parse a price from a loosely typed JSON value.
///
/// Accepts JSON numbers and numeric strings. Returns `None` for anything
/// else (null, booleans, non-numeric strings).
#[must_use]
pub fn parse_price(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Returns the value only if it is strictly positive.
#[must_use]
pub fn positive(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| v.is_sign_positive() && !v.is_zero())
}

/// Serde helper: deserialize an optional price, mapping malformed values to `None`.
///
/// A non-numeric price must not reject the whole message, so invalid
/// input is treated the same as an absent field.
///
/// # Errors
///
/// Only fails if the underlying JSON is structurally invalid.
pub fn deserialize_lenient_price<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_price))
}

// =============================================================================
// Raw Tick
// =============================================================================

/// One raw price update from an upstream source, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawTick {
    /// Upstream symbol or instrument identifier.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Bid price, if present and numeric.
    #[serde(default, deserialize_with = "deserialize_lenient_price")]
    pub bid: Option<Decimal>,
    /// Ask price, if the upstream provides one.
    #[serde(default, deserialize_with = "deserialize_lenient_price")]
    pub ask: Option<Decimal>,
    /// Upstream session high, if provided.
    #[serde(default, deserialize_with = "deserialize_lenient_price")]
    pub high: Option<Decimal>,
    /// Upstream session low, if provided.
    #[serde(default, deserialize_with = "deserialize_lenient_price")]
    pub low: Option<Decimal>,
    /// Source timestamp, passed through untouched.
    #[serde(default)]
    pub time: Option<Value>,
    /// Source timestamp in milliseconds, passed through untouched.
    #[serde(default)]
    pub time_msc: Option<Value>,
    /// Source volume, passed through untouched.
    #[serde(default)]
    pub volume: Option<Value>,
}

impl RawTick {
    /// Create a tick carrying only a bid.
    #[must_use]
    pub const fn with_bid(bid: Decimal) -> Self {
        Self {
            symbol: None,
            bid: Some(bid),
            ask: None,
            high: None,
            low: None,
            time: None,
            time_msc: None,
            volume: None,
        }
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Canonical, normalized price record.
///
/// Superseded by the next tick, never mutated. Decimal fields serialize as
/// fixed two-digit strings; deserialization accepts strings or numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Bid price.
    pub bid: Decimal,
    /// Ask price.
    pub ask: Decimal,
    /// Session high (maximum ask seen this run).
    pub high: Decimal,
    /// Session low (minimum bid seen this run).
    pub low: Decimal,
    /// Price unit label.
    pub unit: String,
    /// Normalization timestamp.
    pub updated: DateTime<Utc>,
    /// Source timestamp from the bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    /// Source timestamp in milliseconds from the bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_msc: Option<Value>,
    /// Source volume from the bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Value>,
}

impl Quote {
    /// Session extrema carried by this quote.
    #[must_use]
    pub const fn session_stats(&self) -> SessionStats {
        SessionStats {
            high: self.high,
            low: self.low,
        }
    }

    /// Spread between ask and bid.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

// =============================================================================
// Session Stats
// =============================================================================

/// High/low extrema of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
}

impl SessionStats {
    /// Seed extrema from a single tick.
    #[must_use]
    pub const fn seed(ask: Decimal, bid: Decimal) -> Self {
        Self { high: ask, low: bid }
    }

    /// Fold a new observation into the extrema.
    #[must_use]
    pub fn widen(self, high: Decimal, low: Decimal) -> Self {
        Self {
            high: self.high.max(high),
            low: self.low.min(low),
        }
    }
}

// =============================================================================
// Sentiment
// =============================================================================

/// Share of upstream clients long (buyers) and short (sellers) the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentiment {
    /// Percentage of clients long.
    pub buyers: Decimal,
    /// Percentage of clients short.
    pub sellers: Decimal,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn round_price_half_away_from_zero() {
        assert_eq!(round_price(dec!(2350.125)).to_string(), "2350.13");
        assert_eq!(round_price(dec!(2350.124)).to_string(), "2350.12");
        assert_eq!(round_price(dec!(-1.005)).to_string(), "-1.01");
    }

    #[test]
    fn round_price_pads_to_two_digits() {
        assert_eq!(round_price(dec!(2350.1)).to_string(), "2350.10");
        assert_eq!(round_price(dec!(2350)).to_string(), "2350.00");
    }

    #[test]
    fn parse_price_uses_decimal_text() {
        // 1.005 is 1.00499.. as a binary float; the textual form must win.
        let parsed = parse_price(&json!(1.005)).unwrap();
        assert_eq!(round_price(parsed).to_string(), "1.01");
    }

    #[test]
    fn parse_price_accepts_numeric_strings() {
        assert_eq!(parse_price(&json!(" 2350.5 ")), Some(dec!(2350.5)));
        assert_eq!(parse_price(&json!("1e3")), Some(dec!(1000)));
    }

    #[test]
    fn parse_price_rejects_non_numeric() {
        assert_eq!(parse_price(&json!("abc")), None);
        assert_eq!(parse_price(&json!(null)), None);
        assert_eq!(parse_price(&json!(true)), None);
        assert_eq!(parse_price(&json!({"bid": 1})), None);
    }

    #[test]
    fn raw_tick_tolerates_bad_bid() {
        let tick: RawTick =
            serde_json::from_value(json!({"symbol": "XAUUSD", "bid": "n/a", "ask": null}))
                .unwrap();
        assert_eq!(tick.symbol.as_deref(), Some("XAUUSD"));
        assert!(tick.bid.is_none());
        assert!(tick.ask.is_none());
    }

    #[test]
    fn quote_serializes_fixed_two_digit_strings() {
        let quote = Quote {
            symbol: Some("XAUUSD".to_string()),
            bid: round_price(dec!(2350.1)),
            ask: round_price(dec!(2351.1)),
            high: round_price(dec!(2352)),
            low: round_price(dec!(2349.5)),
            unit: "USD/oz".to_string(),
            updated: Utc::now(),
            time: None,
            time_msc: None,
            volume: None,
        };

        let value = serde_json::to_value(&quote).unwrap();
        assert_eq!(value["bid"], json!("2350.10"));
        assert_eq!(value["ask"], json!("2351.10"));
        assert_eq!(value["high"], json!("2352.00"));
        assert!(value.get("time").is_none());
    }

    #[test]
    fn quote_deserializes_numbers_and_strings() {
        let quote: Quote = serde_json::from_value(json!({
            "bid": 2350.12,
            "ask": "2351.12",
            "high": 2352,
            "low": "2349.00",
            "unit": "USD/oz",
            "updated": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(quote.bid, dec!(2350.12));
        assert_eq!(quote.ask, dec!(2351.12));
        assert_eq!(quote.spread(), dec!(1.00));
    }

    #[test]
    fn session_stats_widen() {
        let stats = SessionStats::seed(dec!(10), dec!(9));
        let widened = stats.widen(dec!(11), dec!(9.5));
        assert_eq!(widened.high, dec!(11));
        assert_eq!(widened.low, dec!(9));
    }
}
