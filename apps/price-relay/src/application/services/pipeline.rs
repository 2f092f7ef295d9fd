//! Relay Pipeline
//!
//! The single task that owns the normalizer and writes the cache. Upstream
//! events arrive in order over one channel, so quotes reach downstream
//! clients in exactly that order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::cache::LastQuoteCache;
use super::feed::FeedState;
use crate::application::ports::{QuoteSink, UpstreamEvent};
use crate::domain::normalizer::QuoteNormalizer;
use crate::domain::quote::RawTick;
use crate::domain::session::ConnectionState;
use crate::infrastructure::metrics;

/// Turns upstream events into cached and published quotes.
pub struct RelayPipeline {
    normalizer: QuoteNormalizer,
    cache: Arc<LastQuoteCache>,
    sink: Arc<dyn QuoteSink>,
    feed: Arc<FeedState>,
}

impl RelayPipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(
        normalizer: QuoteNormalizer,
        cache: Arc<LastQuoteCache>,
        sink: Arc<dyn QuoteSink>,
        feed: Arc<FeedState>,
    ) -> Self {
        Self {
            normalizer,
            cache,
            sink,
            feed,
        }
    }

    /// Consume events until the channel closes or `cancel` fires.
    pub async fn run(mut self, mut rx: mpsc::Receiver<UpstreamEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Relay pipeline cancelled");
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("Upstream event channel closed");
                        break;
                    };
                    self.handle_event(event);
                }
            }
        }
    }

    /// Apply a single event.
    pub fn handle_event(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Connecting => {
                self.feed.set_state(ConnectionState::Connecting);
                tracing::debug!("Upstream connecting");
            }
            UpstreamEvent::Subscribed => {
                self.feed.set_state(ConnectionState::Subscribed);
                tracing::info!("Upstream subscribed");
            }
            UpstreamEvent::Disconnected => {
                self.feed.set_state(ConnectionState::Disconnected);
                tracing::warn!("Upstream disconnected");
            }
            UpstreamEvent::Reconnecting { attempt } => {
                self.feed.set_state(ConnectionState::Reconnecting);
                self.feed.increment_reconnect_attempts();
                metrics::record_reconnect();
                tracing::info!(attempt, "Upstream reconnecting");
            }
            UpstreamEvent::SubscribeError(message) => {
                tracing::error!(error = %message, "Upstream rejected subscription");
                self.feed.set_error(message);
            }
            UpstreamEvent::Tick(tick) => self.handle_tick(&tick),
            UpstreamEvent::Sentiment(sentiment) => {
                tracing::debug!(
                    buyers = %sentiment.buyers,
                    sellers = %sentiment.sellers,
                    "Sentiment updated"
                );
                self.sink.publish_sentiment(&sentiment);
            }
        }
    }

    fn handle_tick(&mut self, tick: &RawTick) {
        self.feed.record_tick();
        metrics::record_tick_received();

        match self.normalizer.normalize(tick) {
            Ok(quote) => {
                tracing::trace!(bid = %quote.bid, ask = %quote.ask, "Quote normalized");
                self.cache.set(quote.clone());
                self.sink.publish_quote(&quote);
                metrics::record_quote_published();
            }
            Err(e) => {
                self.feed.record_dropped();
                metrics::record_tick_dropped(e.reason());
                tracing::debug!(error = %e, "Dropped tick");
            }
        }
    }
}
