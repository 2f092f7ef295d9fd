//! Streaming Connector
//!
//! Holds the persistent WebSocket to the upstream streaming endpoint,
//! subscribes to the resolved instrument and forwards quotes to the
//! pipeline as [`UpstreamEvent`]s.
//!
//! # Lifecycle
//!
//! `Disconnected → Connecting → Subscribed → Disconnected → Reconnecting → Connecting`
//!
//! Reconnection is unbounded with a fixed delay. The session is read from
//! the supervisor's watch channel at every connect, so a refreshed session
//! is picked up by the next connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{self, CodecError};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::{PingRequest, QuotePayload, StreamMessage, SubscribeAck, SubscribeRequest};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::UpstreamEvent;
use crate::domain::session::SessionState;
use crate::infrastructure::config::UpstreamSettings;
use crate::infrastructure::metrics;

type StreamWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a single upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Encoding an outbound request failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No keep-alive answer within the pong timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The WebSocket handshake did not complete within the pong timeout.
    #[error("connect timeout")]
    ConnectTimeout,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The pipeline stopped receiving events.
    #[error("event channel closed")]
    ChannelClosed,

    /// The session supervisor went away.
    #[error("session channel closed")]
    SessionClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the streaming connector.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection schedule.
    pub reconnect: ReconnectConfig,
    /// Keep-alive configuration.
    pub heartbeat: HeartbeatConfig,
}

impl ConnectorConfig {
    /// Build from upstream settings.
    #[must_use]
    pub fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            url: settings.stream_url.clone(),
            reconnect: ReconnectConfig::for_stream(settings),
            heartbeat: HeartbeatConfig::from_upstream_settings(settings),
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Upstream streaming client for a single instrument.
pub struct StreamConnector {
    config: ConnectorConfig,
    session_rx: watch::Receiver<Option<SessionState>>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
    correlation: AtomicU64,
}

impl StreamConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new(
        config: ConnectorConfig,
        session_rx: watch::Receiver<Option<SessionState>>,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            session_rx,
            event_tx,
            cancel,
            correlation: AtomicU64::new(2),
        }
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only if the session or event channel closes; transport
    /// failures are always retried.
    pub async fn run(self: Arc<Self>) -> Result<(), ConnectorError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Upstream connector cancelled");
                return Ok(());
            }

            let Some(session) = self.wait_for_session().await? else {
                return Ok(());
            };

            match self.connect_and_run(&session, &mut policy).await {
                Ok(()) => {
                    tracing::info!("Upstream connector stopped");
                    return Ok(());
                }
                Err(e @ (ConnectorError::ChannelClosed | ConnectorError::SessionClosed)) => {
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream connection error");
                    self.emit(UpstreamEvent::Disconnected).await?;

                    let Some(delay) = policy.next_delay() else {
                        return Ok(());
                    };
                    let attempt = policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to upstream stream"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Upstream connector cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }

                    self.emit(UpstreamEvent::Reconnecting { attempt }).await?;
                }
            }
        }
    }

    /// Current session, waiting for the supervisor to publish one.
    ///
    /// Returns `Ok(None)` if cancelled while waiting.
    async fn wait_for_session(&self) -> Result<Option<SessionState>, ConnectorError> {
        let mut rx = self.session_rx.clone();
        tokio::select! {
            () = self.cancel.cancelled() => Ok(None),
            result = rx.wait_for(Option::is_some) => {
                let guard = result.map_err(|_| ConnectorError::SessionClosed)?;
                Ok(guard.clone())
            }
        }
    }

    async fn connect_and_run(
        &self,
        session: &SessionState,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ConnectorError> {
        self.emit(UpstreamEvent::Connecting).await?;
        tracing::info!(url = %self.config.url, epic = %session.epic(), "Connecting to upstream stream");

        let connect = tokio::time::timeout(
            self.config.heartbeat.pong_timeout,
            tokio_tungstenite::connect_async(&self.config.url),
        );
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = connect => result.map_err(|_| ConnectorError::ConnectTimeout)??,
        };
        let (mut write, mut read) = ws_stream.split();

        let subscribe = SubscribeRequest::new(session.tokens(), session.epic());
        write
            .send(Message::Text(codec::encode(&subscribe)?.into()))
            .await?;
        tracing::debug!(epic = %session.epic(), "Subscription request sent");

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let _heartbeat_guard = heartbeat_cancel.drop_guard();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                heartbeat_event = heartbeat_rx.recv() => {
                    match heartbeat_event {
                        Some(HeartbeatEvent::SendPing) => {
                            self.send_ping(&mut write).await?;
                            heartbeat_state.mark_ping_sent();
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            return Err(ConnectorError::HeartbeatTimeout);
                        }
                        None => {
                            tracing::debug!("Heartbeat channel closed");
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat_state.record_activity();
                            self.handle_text(&text, session, policy).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat_state.record_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Upstream sent close frame");
                            return Err(ConnectorError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            heartbeat_state.record_activity();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Upstream stream ended");
                            return Err(ConnectorError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(
        &self,
        text: &str,
        session: &SessionState,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ConnectorError> {
        let message = match codec::decode_stream(text) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_parse_error("stream");
                tracing::warn!(error = %e, "Dropping malformed upstream message");
                return Ok(());
            }
        };

        match message {
            StreamMessage::Quote(payload) => self.handle_quote(payload, session).await,
            StreamMessage::Subscribe(ack) => self.handle_ack(&ack, policy).await,
            StreamMessage::Ping => {
                tracing::debug!("Upstream ping acknowledged");
                Ok(())
            }
            StreamMessage::Other(destination) => {
                tracing::trace!(destination = %destination, "Ignoring upstream message");
                Ok(())
            }
        }
    }

    async fn handle_quote(
        &self,
        payload: QuotePayload,
        session: &SessionState,
    ) -> Result<(), ConnectorError> {
        if payload.epic != session.epic() {
            tracing::trace!(epic = %payload.epic, "Discarding quote for other instrument");
            return Ok(());
        }
        self.emit(UpstreamEvent::Tick(payload.into_raw_tick())).await
    }

    async fn handle_ack(
        &self,
        ack: &SubscribeAck,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ConnectorError> {
        if let Some(reason) = ack.rejection() {
            tracing::error!(reason = %reason, "Upstream subscription rejected");
            return self.emit(UpstreamEvent::SubscribeError(reason)).await;
        }
        policy.reset();
        self.emit(UpstreamEvent::Subscribed).await
    }

    async fn send_ping(&self, write: &mut StreamWriter) -> Result<(), ConnectorError> {
        let current = self.session_rx.borrow().clone();
        if let Some(session) = current {
            let ping = PingRequest::new(session.tokens(), self.next_correlation());
            write.send(Message::Text(codec::encode(&ping)?.into())).await?;
        }
        write.send(Message::Ping(Vec::new().into())).await?;
        tracing::trace!("Upstream keep-alive sent");
        Ok(())
    }

    fn next_correlation(&self) -> u64 {
        self.correlation.fetch_add(1, Ordering::Relaxed)
    }

    async fn emit(&self, event: UpstreamEvent) -> Result<(), ConnectorError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| ConnectorError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use tokio::net::TcpListener;

    use super::*;
    use crate::domain::session::SessionTokens;

    fn session() -> SessionState {
        let tokens = SessionTokens::new("cst", "sec").unwrap();
        SessionState::new(tokens, "GOLD").unwrap()
    }

    fn config(url: String) -> ConnectorConfig {
        ConnectorConfig {
            url,
            reconnect: ReconnectConfig::fixed(Duration::from_millis(50)),
            heartbeat: HeartbeatConfig::new(Duration::from_secs(60), Duration::from_secs(5)),
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<UpstreamEvent>) -> UpstreamEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event should arrive")
            .expect("channel should stay open")
    }

    async fn next_tick_bid(rx: &mut mpsc::Receiver<UpstreamEvent>) -> rust_decimal::Decimal {
        loop {
            if let UpstreamEvent::Tick(tick) = next_event(rx).await {
                return tick.bid.expect("tick should carry a bid");
            }
        }
    }

    /// Accept one upstream connection, check the subscription, then stream quotes.
    async fn serve_once(listener: &TcpListener, quotes: &[&str]) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let Some(Ok(Message::Text(request))) = ws.next().await else {
            panic!("expected subscribe request");
        };
        let request: serde_json::Value = serde_json::from_str(&request).unwrap();
        assert_eq!(request["destination"], "marketData.subscribe");
        assert_eq!(request["correlationId"], "1");
        assert_eq!(request["cst"], "cst");
        assert_eq!(request["securityToken"], "sec");
        assert_eq!(request["payload"]["epics"][0], "GOLD");

        ws.send(Message::Text(
            r#"{"status":"OK","destination":"marketData.subscribe","payload":{"subscriptions":{"GOLD":"PROCESSED"}}}"#.into(),
        ))
        .await
        .unwrap();
        for quote in quotes {
            ws.send(Message::Text((*quote).into())).await.unwrap();
        }
        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn forwards_matching_quotes_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (_session_tx, session_rx) = watch::channel(Some(session()));
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let connector = Arc::new(StreamConnector::new(config(url), session_rx, event_tx, cancel.clone()));
        let handle = tokio::spawn(Arc::clone(&connector).run());

        serve_once(
            &listener,
            &[
                r#"{"destination":"quote","payload":{"epic":"SILVER","bid":30.1,"ofr":30.2}}"#,
                "garbage",
                r#"{"destination":"quote","payload":{"epic":"GOLD","bid":2350.12,"ofr":2350.62}}"#,
            ],
        )
        .await;

        assert_eq!(next_event(&mut event_rx).await, UpstreamEvent::Connecting);
        assert_eq!(next_event(&mut event_rx).await, UpstreamEvent::Subscribed);
        assert_eq!(next_tick_bid(&mut event_rx).await, dec!(2350.12));
        assert_eq!(next_event(&mut event_rx).await, UpstreamEvent::Disconnected);
        assert_eq!(
            next_event(&mut event_rx).await,
            UpstreamEvent::Reconnecting { attempt: 1 }
        );

        serve_once(
            &listener,
            &[r#"{"destination":"quote","payload":{"epic":"GOLD","bid":2351,"ofr":2351.5}}"#],
        )
        .await;
        assert_eq!(next_event(&mut event_rx).await, UpstreamEvent::Connecting);
        assert_eq!(next_event(&mut event_rx).await, UpstreamEvent::Subscribed);
        assert_eq!(next_tick_bid(&mut event_rx).await, dec!(2351));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "connector should stop after cancellation");
    }

    #[tokio::test]
    async fn rejected_subscription_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (_session_tx, session_rx) = watch::channel(Some(session()));
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let connector = Arc::new(StreamConnector::new(config(url), session_rx, event_tx, cancel.clone()));
        tokio::spawn(Arc::clone(&connector).run());

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        ws.send(Message::Text(
            r#"{"status":"ERROR","destination":"marketData.subscribe","payload":{"errorCode":"error.invalid.session.token"}}"#.into(),
        ))
        .await
        .unwrap();

        assert_eq!(next_event(&mut event_rx).await, UpstreamEvent::Connecting);
        assert_eq!(
            next_event(&mut event_rx).await,
            UpstreamEvent::SubscribeError("error.invalid.session.token".to_string())
        );

        cancel.cancel();
    }

    #[tokio::test]
    async fn stalled_handshake_times_out_and_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        // accept TCP but never answer the upgrade
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let (_session_tx, session_rx) = watch::channel(Some(session()));
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let config = ConnectorConfig {
            heartbeat: HeartbeatConfig::new(Duration::from_secs(60), Duration::from_millis(100)),
            ..config(url)
        };
        let handle = tokio::spawn(Arc::new(StreamConnector::new(config, session_rx, event_tx, cancel.clone())).run());

        assert_eq!(next_event(&mut event_rx).await, UpstreamEvent::Connecting);
        assert_eq!(next_event(&mut event_rx).await, UpstreamEvent::Disconnected);
        assert_eq!(
            next_event(&mut event_rx).await,
            UpstreamEvent::Reconnecting { attempt: 1 }
        );
        assert_eq!(next_event(&mut event_rx).await, UpstreamEvent::Connecting);

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "cancellation should interrupt a pending handshake");
        silent.abort();
    }

    #[tokio::test]
    async fn waits_for_session_before_connecting() {
        let (session_tx, session_rx) = watch::channel(None);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let connector = Arc::new(StreamConnector::new(
            config("ws://127.0.0.1:1".to_string()),
            session_rx,
            event_tx,
            cancel.clone(),
        ));
        let handle = tokio::spawn(Arc::clone(&connector).run());

        let early = tokio::time::timeout(Duration::from_millis(100), event_rx.recv()).await;
        assert!(early.is_err(), "no connection attempt without a session");

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("connector should stop")
            .expect("task should not panic");
        assert!(result.is_ok());
        drop(session_tx);
    }
}
