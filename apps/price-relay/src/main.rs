//! Price Relay Binary
//!
//! Starts the quote relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required in streaming mode
//! - `UPSTREAM_API_KEY`, `UPSTREAM_IDENTIFIER`, `UPSTREAM_PASSWORD`
//!
//! ## Optional
//! - `PORT`: HTTP/WebSocket port (default: 10000)
//! - `UPSTREAM_MODE`: bridge | streaming (default: bridge)
//! - `QUOTE_SPREAD`: Spread added to the bid when no ask is given (default: 1.00)
//! - `LAST_QUOTE_PATH`: Stored quote location (default: ./lastrate.json)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: `price_relay=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_relay::application::ports::{QuoteSink, UpstreamEvent};
use price_relay::application::services::{FeedState, LastQuoteCache, RelayPipeline};
use price_relay::domain::normalizer::QuoteNormalizer;
use price_relay::infrastructure::broadcast::{BroadcastHub, HubConfig};
use price_relay::infrastructure::persistence::FileQuoteStore;
use price_relay::infrastructure::server::{AppState, RelayServer};
use price_relay::infrastructure::telemetry;
use price_relay::infrastructure::upstream::{
    ConnectorConfig, RestSessionClient, SessionClientConfig, SessionSupervisor, StreamConnector,
    SupervisorConfig,
};
use price_relay::{RelayConfig, UpstreamMode, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the upstream event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting price relay");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Cache, restored from the previous run
    let store = Arc::new(FileQuoteStore::new(config.quote.store_path.clone()));
    let cache = Arc::new(LastQuoteCache::new(store));
    let restored = cache.restore();

    let hub = Arc::new(BroadcastHub::new(
        HubConfig::from(&config.broadcast),
        Arc::clone(&cache),
    ));
    let feed = Arc::new(FeedState::new());

    // Bind before starting any background task so a busy port fails fast
    let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(EVENT_CHANNEL_CAPACITY);
    let app_state = Arc::new(AppState::new(
        config.mode,
        Arc::clone(&hub),
        Arc::clone(&feed),
        Arc::clone(&cache),
        event_tx.clone(),
    ));
    let server = RelayServer::new(config.server.port, app_state, shutdown_token.clone());
    let listener = server.bind().await?;

    // Upstream session: resolved before anything is served in streaming mode
    let supervisor = match (config.mode, config.credentials.clone()) {
        (UpstreamMode::Streaming, Some(credentials)) => {
            let client = RestSessionClient::new(SessionClientConfig::from_settings(
                &config.upstream,
                credentials,
            ))?;
            let supervisor = Arc::new(SessionSupervisor::new(
                Arc::new(client),
                SupervisorConfig::from_settings(&config.upstream),
            ));
            supervisor
                .establish()
                .await
                .context("failed to establish upstream session")?;
            Some(supervisor)
        }
        (UpstreamMode::Streaming, None) => {
            anyhow::bail!("streaming mode requires upstream credentials");
        }
        (UpstreamMode::Bridge, _) => None,
    };

    // Pipeline
    let normalizer = QuoteNormalizer::with_previous(config.quote.normalizer_config(), restored.as_ref());
    let pipeline = RelayPipeline::new(
        normalizer,
        Arc::clone(&cache),
        Arc::clone(&hub) as Arc<dyn QuoteSink>,
        Arc::clone(&feed),
    );
    let pipeline_handle = tokio::spawn(pipeline.run(event_rx, shutdown_token.clone()));

    // Upstream connector, session refresh and sentiment
    if let Some(supervisor) = supervisor {
        let connector = Arc::new(StreamConnector::new(
            ConnectorConfig::from_settings(&config.upstream),
            supervisor.subscribe(),
            event_tx.clone(),
            shutdown_token.clone(),
        ));
        tokio::spawn(async move {
            if let Err(e) = connector.run().await {
                tracing::error!(error = %e, "Upstream connector error");
            }
        });

        tokio::spawn(Arc::clone(&supervisor).run_refresh(shutdown_token.clone()));
        tokio::spawn(supervisor.run_sentiment(event_tx.clone(), shutdown_token.clone()));
    }
    drop(event_tx);

    // Hub timers
    tokio::spawn(Arc::clone(&hub).run_timers(shutdown_token.clone()));

    // Server
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!(error = %e, "Relay server error");
        }
    });

    tracing::info!(port = config.server.port, mode = config.mode.as_str(), "Price relay ready");

    await_shutdown(shutdown_token).await;

    hub.close_all();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = server_handle.await;
        let _ = pipeline_handle.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timeout elapsed, exiting");
    }

    tracing::info!("Price relay stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        mode = config.mode.as_str(),
        port = config.server.port,
        spread = %config.quote.spread,
        ask_markup = %config.quote.ask_markup,
        unit = %config.quote.unit,
        store_path = %config.quote.store_path.display(),
        "Configuration loaded"
    );
    if config.mode == UpstreamMode::Streaming {
        tracing::debug!(
            api_url = %config.upstream.api_url,
            stream_url = %config.upstream.stream_url,
            search_terms = ?config.upstream.search_terms,
            fallback_epic = ?config.upstream.fallback_epic,
            "Upstream endpoints"
        );
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
