//! Port Interfaces
//!
//! Contracts between the application services and the infrastructure
//! adapters, following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteStore`: durable storage for the last quote
//! - `SessionProvider`: upstream REST session, instrument search, sentiment
//! - `QuoteSink`: fan-out of published quotes to downstream clients
//!
//! ## Driver Messages (Inbound)
//!
//! - `UpstreamEvent`: everything the connector or bridge hands the pipeline

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::quote::{Quote, RawTick, Sentiment};
use crate::domain::session::{AuthError, ResolutionError, SessionError, SessionTokens};

// =============================================================================
// Quote Store
// =============================================================================

/// Errors raised by a [`QuoteStore`].
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The record could not be read or written.
    #[error("quote store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored record is not a valid quote.
    #[error("stored quote is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Durable storage for the single last-quote record.
pub trait QuoteStore: Send + Sync {
    /// Load the stored quote. `Ok(None)` when nothing has been stored yet.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the record exists but cannot be read or parsed.
    fn load(&self) -> Result<Option<Quote>, PersistenceError>;

    /// Replace the stored quote.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the record cannot be written.
    fn save(&self, quote: &Quote) -> Result<(), PersistenceError>;
}

// =============================================================================
// Session Provider
// =============================================================================

/// Upstream REST operations needed to stream quotes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Authenticate and return a fresh token pair.
    async fn acquire(&self) -> Result<SessionTokens, AuthError>;

    /// Search for a streaming-eligible instrument, trying `terms` in order.
    async fn resolve_instrument(
        &self,
        tokens: &SessionTokens,
        terms: &[String],
    ) -> Result<String, ResolutionError>;

    /// Fetch client sentiment for an instrument.
    async fn fetch_sentiment(
        &self,
        tokens: &SessionTokens,
        epic: &str,
    ) -> Result<Sentiment, SessionError>;
}

// =============================================================================
// Quote Sink
// =============================================================================

/// Receiver of everything the pipeline publishes.
pub trait QuoteSink: Send + Sync {
    /// Publish a freshly normalized quote.
    fn publish_quote(&self, quote: &Quote);

    /// Publish a sentiment snapshot.
    fn publish_sentiment(&self, sentiment: &Sentiment);
}

// =============================================================================
// Upstream Events
// =============================================================================

/// Events flowing from the connector or bridge into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Opening the upstream transport.
    Connecting,
    /// Subscription acknowledged.
    Subscribed,
    /// Transport closed or failed.
    Disconnected,
    /// Reconnecting after the delay.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// A raw price update.
    Tick(RawTick),
    /// The upstream refused the subscription.
    SubscribeError(String),
    /// A sentiment snapshot.
    Sentiment(Sentiment),
}
