//! HTTP and WebSocket Server
//!
//! One listener serves the banner, health endpoints, metrics and the
//! downstream WebSocket.
//!
//! # Endpoints
//!
//! - `GET /` - Plain-text banner, or a WebSocket upgrade
//! - `GET /ws` - WebSocket upgrade
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness check
//! - `GET /readyz` - Readiness check
//! - `GET /metrics` - Prometheus metrics in text format

pub mod health;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::UpstreamEvent;
use crate::application::services::{FeedState, LastQuoteCache};
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::config::UpstreamMode;

/// Body of `GET /` for plain HTTP requests.
pub const BANNER: &str = "✅ Price relay running";

// =============================================================================
// Server State
// =============================================================================

/// Shared state for every handler.
pub struct AppState {
    mode: UpstreamMode,
    version: String,
    started_at: Instant,
    hub: SharedBroadcastHub,
    feed: Arc<FeedState>,
    cache: Arc<LastQuoteCache>,
    ingest_tx: mpsc::Sender<UpstreamEvent>,
}

/// Shared state reference.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Create server state.
    #[must_use]
    pub fn new(
        mode: UpstreamMode,
        hub: SharedBroadcastHub,
        feed: Arc<FeedState>,
        cache: Arc<LastQuoteCache>,
        ingest_tx: mpsc::Sender<UpstreamEvent>,
    ) -> Self {
        Self {
            mode,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            hub,
            feed,
            cache,
            ingest_tx,
        }
    }

    /// Whether downstream sockets may push bridge ticks.
    #[must_use]
    pub fn accepts_bridge_ticks(&self) -> bool {
        self.mode == UpstreamMode::Bridge
    }

    /// Whether the relay can currently serve fresh quotes.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match self.mode {
            UpstreamMode::Bridge => true,
            UpstreamMode::Streaming => self.feed.state().is_live(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("mode", &self.mode)
            .field("version", &self.version)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Server
// =============================================================================

/// Build the application router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health::health_handler))
        .route("/healthz", get(health::liveness_handler))
        .route("/readyz", get(health::readiness_handler))
        .route("/metrics", get(health::metrics_handler))
        .with_state(state)
}

/// HTTP and WebSocket server.
pub struct RelayServer {
    port: u16,
    state: SharedState,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: SharedState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the listener. Separate from [`RelayServer::serve`] so a bind
    /// failure is reported before any background task starts.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::BindFailed` if the port is unavailable.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))
    }

    /// Serve on `listener` until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` if the HTTP server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "Relay server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Relay server stopped");
        Ok(())
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server fails while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn root_handler(
    State(state): State<SharedState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => websocket::upgrade(ws, state),
        Err(_) => BANNER.into_response(),
    }
}

async fn ws_handler(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    websocket::upgrade(ws, state)
}

// =============================================================================
// Errors
// =============================================================================

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::{PersistenceError, QuoteStore};
    use crate::domain::quote::Quote;
    use crate::domain::session::ConnectionState;
    use crate::infrastructure::broadcast::{BroadcastHub, HubConfig};

    struct NullStore;

    impl QuoteStore for NullStore {
        fn load(&self) -> Result<Option<Quote>, PersistenceError> {
            Ok(None)
        }

        fn save(&self, _quote: &Quote) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    fn state(mode: UpstreamMode) -> (SharedState, Arc<FeedState>) {
        let cache = Arc::new(LastQuoteCache::new(Arc::new(NullStore)));
        let hub = Arc::new(BroadcastHub::new(HubConfig::default(), Arc::clone(&cache)));
        let feed = Arc::new(FeedState::new());
        let (ingest_tx, _ingest_rx) = mpsc::channel(8);
        let state = Arc::new(AppState::new(mode, hub, Arc::clone(&feed), cache, ingest_tx));
        (state, feed)
    }

    async fn get_status(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn root_serves_banner_without_upgrade() {
        let (state, _) = state(UpstreamMode::Bridge);
        let (status, body) = get_status(router(state), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, BANNER);
    }

    #[tokio::test]
    async fn ws_path_requires_upgrade() {
        let (state, _) = state(UpstreamMode::Bridge);
        let (status, _) = get_status(router(state), "/ws").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn readiness_follows_mode_and_feed() {
        let (bridge, _) = state(UpstreamMode::Bridge);
        assert_eq!(get_status(router(bridge), "/readyz").await.0, StatusCode::OK);

        let (streaming, feed) = state(UpstreamMode::Streaming);
        assert_eq!(
            get_status(router(Arc::clone(&streaming)), "/readyz").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        feed.set_state(ConnectionState::Subscribed);
        assert_eq!(get_status(router(streaming), "/readyz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let (state, _) = state(UpstreamMode::Streaming);
        let (status, body) = get_status(router(state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
