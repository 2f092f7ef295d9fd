//! Session Supervisor
//!
//! Owns the upstream session: acquires it at startup with bounded backoff,
//! resolves the instrument once, refreshes the tokens on a fixed period and
//! polls client sentiment. The current [`SessionState`] is published over a
//! `watch` channel that the connector reads at every connect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{SessionProvider, UpstreamEvent};
use crate::domain::session::{AuthError, ResolutionError, SessionError, SessionState, SessionTokens};
use crate::infrastructure::config::UpstreamSettings;
use crate::infrastructure::metrics;

/// Configuration for the session supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Instrument search terms, tried in order.
    pub search_terms: Vec<String>,
    /// Instrument used when resolution fails.
    pub fallback_epic: Option<String>,
    /// Startup authentication retry schedule.
    pub auth_retry: ReconnectConfig,
    /// Token refresh period.
    pub refresh_interval: Duration,
    /// Sentiment poll period (`None` disables polling).
    pub sentiment_poll: Option<Duration>,
}

impl SupervisorConfig {
    /// Build from upstream settings.
    #[must_use]
    pub fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            search_terms: settings.search_terms.clone(),
            fallback_epic: settings.fallback_epic.clone(),
            auth_retry: ReconnectConfig::for_auth(settings),
            refresh_interval: settings.session_refresh,
            sentiment_poll: settings.sentiment_poll,
        }
    }
}

/// Publishes and maintains the upstream session.
pub struct SessionSupervisor {
    provider: Arc<dyn SessionProvider>,
    config: SupervisorConfig,
    session_tx: watch::Sender<Option<SessionState>>,
}

impl SessionSupervisor {
    /// Create a supervisor with no session yet.
    #[must_use]
    pub fn new(provider: Arc<dyn SessionProvider>, config: SupervisorConfig) -> Self {
        let (session_tx, _) = watch::channel(None);
        Self {
            provider,
            config,
            session_tx,
        }
    }

    /// Receiver for the current session.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionState>> {
        self.session_tx.subscribe()
    }

    /// Current session, if established.
    #[must_use]
    pub fn current(&self) -> Option<SessionState> {
        self.session_tx.borrow().clone()
    }

    /// Authenticate, resolve the instrument and publish the first session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Auth` once the retry schedule is exhausted, or
    /// `SessionError::Resolution` if no instrument is found and no fallback
    /// is configured.
    pub async fn establish(&self) -> Result<SessionState, SessionError> {
        let tokens = self.acquire_with_retry().await?;
        let epic = self.resolve(&tokens).await?;
        let session = SessionState::new(tokens, epic)?;

        tracing::info!(epic = %session.epic(), "Upstream session established");
        self.session_tx.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn acquire_with_retry(&self) -> Result<SessionTokens, AuthError> {
        let mut policy = ReconnectPolicy::new(self.config.auth_retry.clone());

        loop {
            match self.provider.acquire().await {
                Ok(tokens) => return Ok(tokens),
                Err(e) => {
                    let Some(delay) = policy.next_delay() else {
                        tracing::error!(
                            attempts = policy.attempt_count() + 1,
                            error = %e,
                            "Upstream authentication failed, giving up"
                        );
                        return Err(e);
                    };
                    tracing::warn!(
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Upstream authentication failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn resolve(&self, tokens: &SessionTokens) -> Result<String, ResolutionError> {
        match self
            .provider
            .resolve_instrument(tokens, &self.config.search_terms)
            .await
        {
            Ok(epic) => Ok(epic),
            Err(e) => match &self.config.fallback_epic {
                Some(fallback) => {
                    tracing::warn!(error = %e, fallback = %fallback, "Instrument resolution failed, using fallback");
                    Ok(fallback.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Re-acquire tokens once, keeping the resolved instrument.
    ///
    /// On failure the previous session stays published.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Auth` if authentication fails.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let Some(previous) = self.current() else {
            return Err(SessionError::Request("no session to refresh".to_string()));
        };

        match self.provider.acquire().await {
            Ok(tokens) => {
                self.session_tx.send_replace(Some(previous.refreshed(tokens)));
                metrics::record_session_refresh(true);
                tracing::info!(epic = %previous.epic(), "Upstream session refreshed");
                Ok(())
            }
            Err(e) => {
                metrics::record_session_refresh(false);
                tracing::warn!(error = %e, "Upstream session refresh failed, keeping previous session");
                Err(e.into())
            }
        }
    }

    /// Refresh the session every `refresh_interval` until cancelled.
    pub async fn run_refresh(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.refresh_interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Session refresh cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let _ = self.refresh().await;
                }
            }
        }
    }

    /// Fetch sentiment once and forward it to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if there is no session or the request fails.
    pub async fn poll_sentiment(&self, event_tx: &mpsc::Sender<UpstreamEvent>) -> Result<(), SessionError> {
        let session = self
            .current()
            .ok_or_else(|| SessionError::Request("no session".to_string()))?;
        let sentiment = self
            .provider
            .fetch_sentiment(session.tokens(), session.epic())
            .await?;

        event_tx
            .send(UpstreamEvent::Sentiment(sentiment))
            .await
            .map_err(|_| SessionError::Request("event channel closed".to_string()))
    }

    /// Poll sentiment on the configured period until cancelled.
    ///
    /// Returns immediately when polling is disabled.
    pub async fn run_sentiment(
        self: Arc<Self>,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) {
        let Some(period) = self.config.sentiment_poll.filter(|p| !p.is_zero()) else {
            tracing::debug!("Sentiment polling disabled");
            return;
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Sentiment poller cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_sentiment(&event_tx).await {
                        tracing::warn!(error = %e, "Sentiment poll failed");
                    }
                }
            }
        }
    }
}
