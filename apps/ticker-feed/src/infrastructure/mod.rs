//! Infrastructure Layer - Adapters and external integrations.
//!
//! Exchange and data-provider clients, the cached REST gateway, and the
//! process plumbing (configuration, HTTP surface, metrics, logging).

/// Binance ticker stream and REST adapters.
pub mod binance;

/// CoinGecko market list client.
pub mod coingecko;

/// Environment-driven configuration.
pub mod config;

/// CryptoCompare history and price client.
pub mod cryptocompare;

/// Cached REST gateway over all providers.
pub mod gateway;

/// HTTP API, health and metrics endpoint.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OTLP span export.
pub mod telemetry;
