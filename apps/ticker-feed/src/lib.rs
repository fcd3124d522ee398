#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Ticker Feed - Real-Time Crypto Market Data
//!
//! Keeps one shared streaming connection to the exchange for the union of
//! all symbols any consumer is watching, holds the latest price per symbol
//! in an in-process store, and serves cached REST data as the cold-start
//! and degraded path.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `symbols`: Allow-list, display metadata, subscription sets
//!   - `ticker`: Ticker updates, snapshots, flash direction, connection state
//!   - `market`: REST snapshot, history and market list types
//!   - `subscription`: Per-consumer symbol refcounts
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: REST snapshot source
//!   - `services`: Ticker store, shared market feed
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Ticker stream client, frame codec, 24h REST client
//!   - `cryptocompare`, `coingecko`: History and market list providers
//!   - `gateway`: TTL-cached REST gateway with stale-while-error
//!   - `config`: Environment-driven configuration
//!   - `http`: JSON API, health probes, Prometheus endpoint
//!
//! # Data Flow
//!
//! ```text
//!                       ┌──────────────┐  ingest   ┌─────────────┐
//! Binance WS ──frames──►│ StreamClient │──────────►│             │──callbacks──► Consumer 1
//!                       └──────────────┘           │ TickerStore │──broadcast──► Consumer 2
//!                       ┌──────────────┐ seed /    │             │──HTTP API───► Consumer N
//! Binance REST ────────►│  RestPrice   │ fallback  │             │
//! CryptoCompare ───────►│   Gateway    │──────────►└─────────────┘
//! CoinGecko ───────────►└──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{
    ChartPoint, Granularity, HistoryResult, MarketSummary, OhlcvPoint, PriceSnapshot, TrendingCoin,
    Unavailable,
};
pub use domain::subscription::{ConsumerId, ConsumerTable, SetChange};
pub use domain::symbols::{SubscriptionSet, SymbolError, SymbolInfo, SymbolRegistry};
pub use domain::ticker::{ConnectionState, PriceDelta, SnapshotSource, TickerSnapshot, TickerUpdate};

// Application ports and services
pub use application::ports::SnapshotProvider;
pub use application::services::{
    FeedError, FeedLease, IngestOutcome, MarketFeed, MarketFeedConfig, StoreSubscription,
    TickerStore, TickerStoreConfig,
};

// Stream client
pub use infrastructure::binance::{
    FrameCodec, FrameError, ReconnectConfig, StreamClient, StreamClientConfig, StreamClientError,
    StreamHandle,
};

// REST gateway
pub use infrastructure::gateway::fetch::ProviderError;
pub use infrastructure::gateway::{GatewayConfig, RestPriceGateway};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FeedConfig};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
