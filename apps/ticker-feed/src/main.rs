//! Ticker Feed Binary
//!
//! Starts the shared ticker stream and the HTTP API.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `TICKER_SYMBOLS`: Comma-separated pair allow-list (default: built-in top-10 list)
//! - `BINANCE_WS_URL`: Combined stream base URL
//! - `BINANCE_REST_URL`: REST base URL
//! - `CRYPTOCOMPARE_API_KEY`: Enables historical charts; the price matrix works without it
//! - `COINGECKO_API_URL`: Market list, coin chart and trending base URL
//! - `TICKER_HTTP_PORT`: HTTP API port (default: 8083)
//! - `TICKER_FALLBACK_POLL_SECS`: REST poll interval while the stream is down (default: 30, must be > 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ticker-feed)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use ticker_feed::infrastructure::telemetry;
use ticker_feed::{
    AppState, FeedConfig, HttpServer, MarketFeed, RestPriceGateway, StreamClient, TickerStore,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Ticker Feed");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = FeedConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let registry = Arc::new(config.registry.clone());

    let gateway = Arc::new(
        RestPriceGateway::new(config.gateway_config(), Arc::clone(&registry))
            .context("failed to build REST gateway")?,
    );

    let store = Arc::new(TickerStore::new(config.store_config()));
    let client = StreamClient::new(config.stream_client_config());
    let feed = MarketFeed::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        client,
        Arc::clone(&gateway) as _,
        config.feed_config(),
    );

    // The service itself is the first consumer: it keeps the full allow-list
    // streaming for the HTTP API.
    let symbols = registry.symbols();
    let lease = feed
        .attach(symbols.iter().map(String::as_str))
        .await
        .context("failed to attach service consumer")?;
    tracing::info!(
        consumer = lease.consumer_id(),
        symbols = lease.symbols().len(),
        seeded = store.len(),
        "Service consumer attached"
    );

    spawn_update_logger(&store, shutdown_token.clone());

    // Spawn HTTP server
    let http_state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed),
        Arc::clone(&gateway),
    ));
    let http_server = HttpServer::new(config.server.http_port, http_state, shutdown_token.clone());
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Ticker feed ready");

    await_shutdown(shutdown_token).await;

    lease.detach();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, http_task).await.is_err() {
        tracing::warn!("HTTP server did not stop before the shutdown timeout");
    }

    tracing::info!(
        consumers = feed.consumer_count(),
        state = feed.connection_state().as_str(),
        "Ticker feed stopped"
    );
    Ok(())
}

/// Trace every store update at `debug` until shutdown.
fn spawn_update_logger(store: &TickerStore, shutdown_token: CancellationToken) {
    let mut updates = store.update_stream();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown_token.cancelled() => break,
                next = updates.next() => match next {
                    Some(Ok(snapshot)) => tracing::debug!(
                        symbol = %snapshot.symbol,
                        price = snapshot.price,
                        source = ?snapshot.source,
                        "Ticker update"
                    ),
                    Some(Err(lagged)) => tracing::debug!(error = %lagged, "Update logger lagged"),
                    None => break,
                },
            }
        }
    });
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        symbols = config.registry.len(),
        http_port = config.server.http_port,
        history_enabled = config.gateway.cryptocompare_api_key.is_some(),
        fallback_poll_secs = config.stream.fallback_poll_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.stream.url,
        binance_rest_url = %config.gateway.binance_url,
        cryptocompare_url = %config.gateway.cryptocompare_url,
        coingecko_url = %config.gateway.coingecko_url,
        "Upstream endpoints"
    );
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
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
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
