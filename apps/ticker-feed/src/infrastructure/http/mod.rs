//! HTTP API, Health and Metrics Endpoint
//!
//! Read-only JSON API over the ticker store and the REST gateway, plus the
//! probes and Prometheus endpoint used by orchestrators.
//!
//! # Endpoints
//!
//! - `GET /api/prices[?symbol=BTCUSDT]` - Latest prices with display metadata
//! - `GET /api/charts?symbol=BTC&currency=USD&timeframe=daily&limit=30` - OHLCV history
//!   (every parameter optional; `hourly` or `24h` select hourly candles, anything else daily)
//! - `GET /api/market/coins?page=1&per_page=100` - Market-cap ranked coin list
//! - `GET /api/market/chart?id=bitcoin&days=7` - USD price chart for one coin
//! - `GET /api/market/trending` - Coins trending in search
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (stream connected or data cached)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::MarketFeed;
use crate::domain::market::{
    ChartPoint, Granularity, HistoryResult, MarketSummary, OhlcvPoint, TrendingCoin,
};
use crate::domain::symbols::SymbolInfo;
use crate::domain::ticker::{ConnectionState, PriceDelta, SnapshotSource, TickerSnapshot};
use crate::infrastructure::gateway::RestPriceGateway;
use crate::infrastructure::metrics::get_metrics_handle;

const DEFAULT_SYMBOL: &str = "BTC";
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_HISTORY_LIMIT: u32 = 30;
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_CHART_DAYS: &str = "7";

// =============================================================================
// Response Types
// =============================================================================

/// One symbol's latest price with display metadata.
#[derive(Debug, Clone, Serialize)]
pub struct PriceView {
    /// Exchange pair.
    pub symbol: String,
    /// Base asset code.
    pub short: String,
    /// Display name.
    pub name: String,
    /// Display glyph.
    pub icon: String,
    /// Last price.
    pub price: f64,
    /// Absolute 24h change.
    pub price_change: f64,
    /// Percentage 24h change.
    pub price_change_percent: f64,
    /// 24h high.
    pub high_24h: f64,
    /// 24h low.
    pub low_24h: f64,
    /// 24h base volume.
    pub volume: f64,
    /// 24h quote volume.
    pub quote_volume: f64,
    /// Observation time.
    pub last_update: DateTime<Utc>,
    /// Where the value came from.
    pub source: SnapshotSource,
    /// Current up/down flash.
    pub delta: PriceDelta,
}

impl PriceView {
    fn new(info: &SymbolInfo, snapshot: TickerSnapshot, delta: PriceDelta) -> Self {
        Self {
            symbol: info.symbol.clone(),
            short: info.short.clone(),
            name: info.name.clone(),
            icon: info.icon.clone(),
            price: snapshot.price,
            price_change: snapshot.price_change,
            price_change_percent: snapshot.price_change_percent,
            high_24h: snapshot.high_24h,
            low_24h: snapshot.low_24h,
            volume: snapshot.volume,
            quote_volume: snapshot.quote_volume,
            last_update: snapshot.last_update,
            source: snapshot.source,
            delta,
        }
    }
}

/// `GET /api/prices` response.
#[derive(Debug, Serialize)]
pub struct PricesResponse {
    /// Stream connection state.
    pub connection: ConnectionState,
    /// Symbols with data, in registry order.
    pub data: Vec<PriceView>,
}

/// `GET /api/prices?symbol=` response.
#[derive(Debug, Serialize)]
pub struct PriceResponse {
    /// Stream connection state.
    pub connection: ConnectionState,
    /// Requested symbol.
    pub symbol: String,
    /// Latest price; `null` until the first value arrives.
    pub data: Option<PriceView>,
}

/// `GET /api/charts` response.
#[derive(Debug, Serialize)]
pub struct ChartResponse {
    /// Resolved pair.
    pub symbol: String,
    /// Quote currency.
    pub currency: String,
    /// Candle width.
    pub timeframe: &'static str,
    /// Candles, oldest first.
    pub data: Vec<OhlcvPoint>,
}

/// `GET /api/market/coins` response.
#[derive(Debug, Serialize)]
pub struct MarketResponse {
    /// Page number.
    pub page: u32,
    /// Page size.
    pub per_page: u32,
    /// Coins on this page.
    pub data: Vec<MarketSummary>,
}

/// `GET /api/market/chart` response.
#[derive(Debug, Serialize)]
pub struct CoinChartResponse {
    /// Coin id as requested.
    pub id: String,
    /// Window as requested.
    pub days: String,
    /// USD price samples, oldest first.
    pub prices: Vec<ChartPoint>,
}

/// `GET /api/market/trending` response.
#[derive(Debug, Serialize)]
pub struct TrendingResponse {
    /// Trending coins, highest first.
    pub data: Vec<TrendingCoin>,
}

/// Error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable reason.
    pub error: &'static str,
    /// Human-readable message.
    pub message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Stream status.
    pub stream: StreamInfo,
    /// Store status.
    pub store: StoreInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream connected.
    Healthy,
    /// Stream down, serving cached or REST data.
    Degraded,
    /// Stream down and no data.
    Unhealthy,
}

/// Stream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the stream is connected.
    pub connected: bool,
    /// Symbols on the open connection.
    pub symbols: Vec<String>,
    /// Frames received.
    pub frames_received: u64,
    /// Frames dropped.
    pub frames_dropped: u64,
    /// Reconnect attempts.
    pub reconnects: u64,
}

/// Store status.
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    /// Symbols with a value.
    pub symbols_with_data: usize,
    /// Attached feed consumers.
    pub consumers: usize,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct AppState {
    version: String,
    started_at: Instant,
    feed: Arc<MarketFeed>,
    gateway: Arc<RestPriceGateway>,
}

impl AppState {
    /// Create new server state.
    #[must_use]
    pub fn new(version: String, feed: Arc<MarketFeed>, gateway: Arc<RestPriceGateway>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            gateway,
        }
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Build the router. Exposed for in-process testing.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/prices", get(prices_handler))
        .route("/api/charts", get(charts_handler))
        .route("/api/market/coins", get(market_handler))
        .route("/api/market/chart", get(coin_chart_handler))
        .route("/api/market/trending", get(trending_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// HTTP API server.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// API Handlers
// =============================================================================

#[derive(Debug, Deserialize)]
struct PricesQuery {
    symbol: Option<String>,
}

async fn prices_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PricesQuery>,
) -> Response {
    let store = state.feed.store();
    let registry = state.feed.registry();
    let connection = store.connection_state();

    if let Some(symbol) = query.symbol {
        let Some(info) = registry.get(&symbol) else {
            return error_response(
                StatusCode::NOT_FOUND,
                "unknown_symbol",
                format!("symbol {symbol} is not supported"),
            );
        };
        let data = store
            .snapshot(&info.symbol)
            .map(|snapshot| PriceView::new(info, snapshot, store.delta(&info.symbol)));
        return Json(PriceResponse {
            connection,
            symbol: info.symbol.clone(),
            data,
        })
        .into_response();
    }

    let data = registry
        .iter()
        .filter_map(|info| {
            store
                .snapshot(&info.symbol)
                .map(|snapshot| PriceView::new(info, snapshot, store.delta(&info.symbol)))
        })
        .collect();
    Json(PricesResponse { connection, data }).into_response()
}

#[derive(Debug, Deserialize)]
struct ChartsQuery {
    symbol: Option<String>,
    currency: Option<String>,
    timeframe: Option<String>,
    limit: Option<u32>,
}

async fn charts_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChartsQuery>,
) -> Response {
    let symbol = query
        .symbol
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SYMBOL.to_string());
    let granularity = query.timeframe.as_deref().map_or(Granularity::Daily, chart_granularity);
    let currency = query
        .currency
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    match state
        .gateway
        .get_history(&symbol, &currency, granularity, limit)
        .await
    {
        HistoryResult::Points(data) => {
            let symbol = state
                .gateway
                .registry()
                .resolve_asset(&symbol)
                .map_or(symbol, |info| info.symbol.clone());
            Json(ChartResponse {
                symbol,
                currency: currency.trim().to_ascii_uppercase(),
                timeframe: granularity.as_str(),
                data,
            })
            .into_response()
        }
        HistoryResult::Unavailable(reason) => {
            tracing::debug!(symbol = %symbol, reason = ?reason, "History unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "history_unavailable", reason.message())
        }
    }
}

/// `24h` and the hourly aliases select hourly candles; anything else is daily.
fn chart_granularity(raw: &str) -> Granularity {
    if raw.trim().eq_ignore_ascii_case("24h") {
        return Granularity::Hourly;
    }
    Granularity::parse(raw).unwrap_or(Granularity::Daily)
}

#[derive(Debug, Deserialize)]
struct MarketQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

async fn market_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarketQuery>,
) -> Json<MarketResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 250);
    let data = state.gateway.get_market_list(page, per_page).await;
    Json(MarketResponse {
        page,
        per_page,
        data,
    })
}

#[derive(Debug, Deserialize)]
struct CoinChartQuery {
    id: Option<String>,
    days: Option<String>,
}

async fn coin_chart_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CoinChartQuery>,
) -> Response {
    let Some(id) = query.id.filter(|id| !id.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing_id", "coin id is required");
    };
    let days = query
        .days
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CHART_DAYS.to_string());

    let prices = state.gateway.get_coin_chart(&id, &days).await;
    Json(CoinChartResponse { id, days, prices }).into_response()
}

async fn trending_handler(State(state): State<Arc<AppState>>) -> Json<TrendingResponse> {
    Json(TrendingResponse {
        data: state.gateway.get_trending().await,
    })
}

// =============================================================================
// Probe Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.feed.store();

    if store.is_live() || !store.is_empty() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let feed = &state.feed;
    let store = feed.store();
    let stats = feed.stream_stats();
    let connection = store.connection_state();
    let connected = connection == ConnectionState::Connected;

    let store_info = StoreInfo {
        symbols_with_data: store.len(),
        consumers: feed.consumer_count(),
    };

    HealthResponse {
        status: determine_health_status(connected, store_info.symbols_with_data),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream: StreamInfo {
            state: connection,
            connected,
            symbols: feed.active_symbols(),
            frames_received: stats.frames_received,
            frames_dropped: stats.frames_dropped,
            reconnects: stats.reconnects,
        },
        store: store_info,
    }
}

const fn determine_health_status(connected: bool, symbols_with_data: usize) -> HealthStatus {
    if connected {
        HealthStatus::Healthy
    } else if symbols_with_data > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
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
