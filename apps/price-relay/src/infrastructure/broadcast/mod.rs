//! Broadcast Hub
//!
//! Fans published messages out to every connected downstream client.
//!
//! # Architecture
//!
//! Each client owns a bounded outbound queue drained by its socket writer.
//! The hub only keeps the queue sender and a liveness flag per client, so a
//! slow or dead socket can never block the pipeline or other clients:
//!
//! - full queue: the message is dropped for that client only
//! - closed queue: the client is removed
//! - no pong since the previous sweep: the client is closed and removed
//!
//! Fresh quotes and re-broadcasts of the cached quote share one publish
//! lock, so a client never sees an older `rate` after a newer one.

pub mod messages;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use messages::ServerMessage;

use crate::application::ports::QuoteSink;
use crate::application::services::LastQuoteCache;
use crate::domain::quote::{Quote, Sentiment};
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics;

/// Smallest queue that still fits the catch-up sequence.
const MIN_QUEUE_CAPACITY: usize = 4;

// =============================================================================
// Client Handles
// =============================================================================

/// Command for a client's socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame.
    Text(Arc<str>),
    /// Transport-level ping.
    Ping,
    /// Close the socket.
    Close,
}

/// What the hub keeps per client.
#[derive(Debug)]
struct ClientHandle {
    tx: mpsc::Sender<Outbound>,
    alive: Arc<AtomicBool>,
}

/// Returned to the socket task on registration.
#[derive(Debug)]
pub struct ClientRegistration {
    /// Connection id.
    pub id: Uuid,
    /// Outbound queue, already holding the catch-up messages.
    pub rx: mpsc::Receiver<Outbound>,
    /// Set to `true` whenever the client answers a ping.
    pub alive: Arc<AtomicBool>,
}

// =============================================================================
// Configuration
// =============================================================================

/// Hub timing and queue sizes.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Cached quote re-broadcast period.
    pub rebroadcast_interval: Duration,
    /// Liveness sweep period.
    pub liveness_interval: Duration,
    /// Per-client outbound queue capacity.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from(&BroadcastSettings::default())
    }
}

impl From<&BroadcastSettings> for HubConfig {
    fn from(settings: &BroadcastSettings) -> Self {
        Self {
            rebroadcast_interval: settings.rebroadcast_interval,
            liveness_interval: settings.liveness_interval,
            queue_capacity: settings.client_queue_capacity,
        }
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Registry of downstream clients.
pub struct BroadcastHub {
    config: HubConfig,
    cache: Arc<LastQuoteCache>,
    clients: RwLock<HashMap<Uuid, ClientHandle>>,
    publish: Mutex<()>,
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

impl BroadcastHub {
    /// Create an empty hub backed by the quote cache.
    #[must_use]
    pub fn new(config: HubConfig, cache: Arc<LastQuoteCache>) -> Self {
        Self {
            config,
            cache,
            clients: RwLock::new(HashMap::new()),
            publish: Mutex::new(()),
        }
    }

    /// Register a new client.
    ///
    /// The greeting, the cached quote and the session extrema are queued
    /// while the client map is write-locked, so no broadcast can land in
    /// front of them.
    pub fn register(&self) -> ClientRegistration {
        let capacity = self.config.queue_capacity.max(MIN_QUEUE_CAPACITY);
        let (tx, rx) = mpsc::channel(capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let id = Uuid::new_v4();

        let mut clients = self.clients.write();

        let mut catch_up = vec![ServerMessage::connected()];
        if let Some(quote) = self.cache.get() {
            catch_up.push(ServerMessage::Rate(quote));
        }
        if let Some(stats) = self.cache.session_stats() {
            catch_up.push(ServerMessage::session_stats(stats));
        }
        for message in &catch_up {
            if let Some(text) = encode(message) {
                let _ = tx.try_send(Outbound::Text(text));
            }
        }

        clients.insert(
            id,
            ClientHandle {
                tx,
                alive: Arc::clone(&alive),
            },
        );
        let count = clients.len();
        drop(clients);

        metrics::set_clients(count);
        tracing::info!(client_id = %id, clients = count, "Client connected");

        ClientRegistration { id, rx, alive }
    }

    /// Remove a client. Returns whether it was registered.
    pub fn unregister(&self, id: Uuid) -> bool {
        let mut clients = self.clients.write();
        let removed = clients.remove(&id).is_some();
        let count = clients.len();
        drop(clients);

        if removed {
            metrics::set_clients(count);
            tracing::info!(client_id = %id, clients = count, "Client disconnected");
        }
        removed
    }

    /// Send a message to every client. Returns how many queues accepted it.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let clients = self.clients.read();
            for (id, client) in clients.iter() {
                match client.tx.try_send(Outbound::Text(Arc::clone(&text))) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        metrics::record_client_message_dropped();
                        tracing::debug!(client_id = %id, kind = message.kind(), "Client queue full, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            self.prune(&closed, "send_failed");
        }
        delivered
    }

    /// Ping live clients and drop the ones that never answered the last ping.
    ///
    /// Returns the number of clients removed.
    pub fn sweep_liveness(&self) -> usize {
        let mut dead = Vec::new();
        {
            let clients = self.clients.read();
            for (id, client) in clients.iter() {
                if client.alive.swap(false, Ordering::SeqCst) {
                    if let Err(TrySendError::Closed(_)) = client.tx.try_send(Outbound::Ping) {
                        dead.push(*id);
                    }
                } else {
                    let _ = client.tx.try_send(Outbound::Close);
                    tracing::info!(client_id = %id, "Terminating unresponsive client");
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            self.prune(&dead, "liveness");
        }
        dead.len()
    }

    /// Resend the cached quote. Returns how many queues accepted it.
    ///
    /// The cache is read under the publish lock: a quote written to the
    /// cache after this read is published only once this resend is queued.
    pub fn rebroadcast_cached(&self) -> usize {
        let _publish = self.publish.lock();
        self.cache
            .get()
            .map_or(0, |quote| self.broadcast(&ServerMessage::Rate(quote)))
    }

    /// Run the re-broadcast and liveness timers until cancelled.
    pub async fn run_timers(self: Arc<Self>, cancel: CancellationToken) {
        let start = tokio::time::Instant::now();
        let rebroadcast_period = self.config.rebroadcast_interval.max(Duration::from_millis(10));
        let liveness_period = self.config.liveness_interval.max(Duration::from_millis(10));

        let mut rebroadcast = tokio::time::interval_at(start + rebroadcast_period, rebroadcast_period);
        rebroadcast.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut liveness = tokio::time::interval_at(start + liveness_period, liveness_period);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Broadcast timers cancelled");
                    break;
                }
                _ = rebroadcast.tick() => {
                    self.rebroadcast_cached();
                }
                _ = liveness.tick() => {
                    self.sweep_liveness();
                }
            }
        }
    }

    /// Tell every client to close and forget them all.
    pub fn close_all(&self) {
        let drained: Vec<(Uuid, ClientHandle)> = self.clients.write().drain().collect();
        for (_, client) in &drained {
            let _ = client.tx.try_send(Outbound::Close);
        }
        metrics::set_clients(0);
        tracing::info!(clients = drained.len(), "Closed all downstream clients");
    }

    /// Current hub statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            clients: self.clients.read().len(),
        }
    }

    fn prune(&self, ids: &[Uuid], reason: &'static str) {
        let mut clients = self.clients.write();
        let mut removed = 0_u64;
        for id in ids {
            if clients.remove(id).is_some() {
                removed += 1;
            }
        }
        let count = clients.len();
        drop(clients);

        metrics::record_clients_pruned(reason, removed);
        metrics::set_clients(count);
        tracing::debug!(reason, removed, clients = count, "Pruned clients");
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("config", &self.config)
            .field("clients", &self.clients.read().len())
            .finish_non_exhaustive()
    }
}

impl QuoteSink for BroadcastHub {
    fn publish_quote(&self, quote: &Quote) {
        let _publish = self.publish.lock();
        self.broadcast(&ServerMessage::Rate(quote.clone()));
    }

    fn publish_sentiment(&self, sentiment: &Sentiment) {
        self.broadcast(&ServerMessage::sentiment(*sentiment));
    }
}

/// Statistics about the hub.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BroadcastStats {
    /// Registered clients.
    pub clients: usize,
}

fn encode(message: &ServerMessage) -> Option<Arc<str>> {
    match message.to_json() {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            tracing::error!(error = %e, kind = message.kind(), "Failed to serialize downstream message");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
