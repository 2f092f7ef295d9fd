//! Downstream WebSocket Sessions
//!
//! Each socket is split into a writer task draining the client's hub queue
//! and a reader loop handling pongs, bridge ticks and close frames. Either
//! half ending tears the whole session down.

use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::SharedState;
use crate::application::ports::UpstreamEvent;
use crate::infrastructure::broadcast::{ClientRegistration, Outbound};
use crate::infrastructure::metrics;
use crate::infrastructure::upstream::codec;

/// Complete the upgrade and run the session.
pub fn upgrade(ws: WebSocketUpgrade, state: SharedState) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let ClientRegistration { id, rx, alive } = state.hub.register();
    let (sender, receiver) = socket.split();

    let mut writer = tokio::spawn(write_loop(sender, rx));

    let reader = async {
        let mut receiver = receiver;
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Pong(_)) => alive.store(true, Ordering::SeqCst),
                Ok(Message::Text(text)) => handle_text(&state, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(client_id = %id, error = %e, "Client socket error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        () = reader => writer.abort(),
        _ = &mut writer => {}
    }

    state.hub.unregister(id);
}

async fn write_loop(mut sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        let message = match outbound {
            Outbound::Text(text) => Message::Text(text.to_string().into()),
            Outbound::Ping => Message::Ping(Vec::new().into()),
            Outbound::Close => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        };
        if sender.send(message).await.is_err() {
            break;
        }
    }
    let _ = sender.close().await;
}

/// Inbound text: bridge ticks in bridge mode, ignored otherwise.
async fn handle_text(state: &SharedState, text: &str) {
    if !state.accepts_bridge_ticks() {
        tracing::trace!("Ignoring client message in streaming mode");
        return;
    }

    match codec::decode_bridge(text) {
        Ok(Some(tick)) => {
            if state.ingest_tx.send(UpstreamEvent::Tick(tick)).await.is_err() {
                tracing::warn!("Pipeline stopped, bridge tick discarded");
            }
        }
        Ok(None) => tracing::trace!("Ignoring non-tick client message"),
        Err(e) => {
            metrics::record_parse_error("bridge");
            tracing::warn!(error = %e, "Dropping malformed bridge message");
        }
    }
}
