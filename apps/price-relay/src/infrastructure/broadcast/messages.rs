//! Downstream Messages
//!
//! JSON objects sent to connected clients, tagged by `type`.
//!
//! ```json
//! {"type":"connected","message":"WS OK","time":"2024-01-01T00:00:00Z"}
//! {"type":"rate","symbol":"XAUUSD","bid":"2350.12","ask":"2351.12","high":"2351.12","low":"2350.12","unit":"USD/oz","updated":"..."}
//! {"type":"sessionStats","high":"2351.12","low":"2350.12","time":"..."}
//! {"type":"sentiment","buyers":"61.5","sellers":"38.5","updated":"..."}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::quote::{Quote, SessionStats, Sentiment};

/// Greeting sent as the first message on every connection.
pub const CONNECTED_MESSAGE: &str = "WS OK";

/// A message to downstream clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Connection greeting.
    Connected {
        /// Always `WS OK`.
        message: &'static str,
        /// Server time.
        time: DateTime<Utc>,
    },
    /// Latest quote, fields inline.
    Rate(Quote),
    /// Session extrema.
    SessionStats {
        /// Session high.
        high: Decimal,
        /// Session low.
        low: Decimal,
        /// Server time.
        time: DateTime<Utc>,
    },
    /// Client sentiment.
    Sentiment {
        /// Percentage of clients long.
        buyers: Decimal,
        /// Percentage of clients short.
        sellers: Decimal,
        /// Server time.
        updated: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Greeting stamped now.
    #[must_use]
    pub fn connected() -> Self {
        Self::Connected {
            message: CONNECTED_MESSAGE,
            time: Utc::now(),
        }
    }

    /// Session extrema stamped now.
    #[must_use]
    pub fn session_stats(stats: SessionStats) -> Self {
        Self::SessionStats {
            high: stats.high,
            low: stats.low,
            time: Utc::now(),
        }
    }

    /// Sentiment stamped now.
    #[must_use]
    pub fn sentiment(sentiment: Sentiment) -> Self {
        Self::Sentiment {
            buyers: sentiment.buyers,
            sellers: sentiment.sellers,
            updated: Utc::now(),
        }
    }

    /// Wire name of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Rate(_) => "rate",
            Self::SessionStats { .. } => "sessionStats",
            Self::Sentiment { .. } => "sentiment",
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
