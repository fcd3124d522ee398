//! Environment-driven configuration.

use std::time::Duration;

use crate::application::services::{MarketFeedConfig, TickerStoreConfig};
use crate::domain::symbols::{SymbolError, SymbolRegistry};
use crate::infrastructure::binance::rest::DEFAULT_REST_URL;
use crate::infrastructure::binance::stream::{DEFAULT_STREAM_SUFFIX, DEFAULT_STREAM_URL};
use crate::infrastructure::binance::{ReconnectConfig, StreamClientConfig};
use crate::infrastructure::cryptocompare::ApiKey;
use crate::infrastructure::gateway::GatewayConfig;
use crate::infrastructure::{coingecko, cryptocompare};

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket base URL.
    pub url: String,
    /// Per-symbol stream suffix, e.g. `@ticker` or `@miniTicker`.
    pub suffix: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Reconnect after this long without a frame.
    pub idle_timeout: Duration,
    /// REST poll interval while the stream is down.
    pub fallback_poll_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            suffix: DEFAULT_STREAM_SUFFIX.to_string(),
            reconnect_delay: Duration::from_millis(3000),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            fallback_poll_interval: Duration::from_secs(30),
        }
    }
}

/// REST provider settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Binance REST base URL.
    pub binance_url: String,
    /// CryptoCompare base URL.
    pub cryptocompare_url: String,
    /// CryptoCompare API key.
    pub cryptocompare_api_key: Option<ApiKey>,
    /// CoinGecko base URL.
    pub coingecko_url: String,
    /// Per-request timeout.
    pub http_timeout: Duration,
    /// Snapshot cache TTL.
    pub snapshot_ttl: Duration,
    /// Hourly history cache TTL.
    pub history_hourly_ttl: Duration,
    /// Daily history cache TTL.
    pub history_daily_ttl: Duration,
    /// Market list cache TTL.
    pub market_list_ttl: Duration,
    /// Coin chart cache TTL.
    pub coin_chart_ttl: Duration,
    /// Trending list cache TTL.
    pub trending_ttl: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            binance_url: DEFAULT_REST_URL.to_string(),
            cryptocompare_url: cryptocompare::DEFAULT_API_URL.to_string(),
            cryptocompare_api_key: None,
            coingecko_url: coingecko::DEFAULT_API_URL.to_string(),
            http_timeout: Duration::from_secs(10),
            snapshot_ttl: Duration::from_secs(30),
            history_hourly_ttl: Duration::from_secs(60),
            history_daily_ttl: Duration::from_secs(300),
            market_list_ttl: Duration::from_secs(60),
            coin_chart_ttl: Duration::from_secs(300),
            trending_ttl: Duration::from_secs(300),
        }
    }
}

/// Ticker store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Up/down flash duration.
    pub flash_window: Duration,
    /// Async update channel capacity.
    pub broadcast_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            flash_window: Duration::from_millis(500),
            broadcast_capacity: 1024,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP API port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8083 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Tradable symbol allow-list.
    pub registry: SymbolRegistry,
    /// Stream settings.
    pub stream: StreamSettings,
    /// REST gateway settings.
    pub gateway: GatewaySettings,
    /// Store settings.
    pub store: StoreSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `TICKER_SYMBOLS` or a URL variable is malformed,
    /// or a timeout or interval is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// Unset or unparseable numeric values fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `TICKER_SYMBOLS` or a URL variable is malformed,
    /// or a timeout or interval is zero. Cache TTLs may be zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let registry = match env("TICKER_SYMBOLS") {
            Some(list) => SymbolRegistry::new(list.split(',').map(str::trim).filter(|s| !s.is_empty()))?,
            None => SymbolRegistry::default(),
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            url: parse_url(&env, "BINANCE_WS_URL", &stream_defaults.url, &["ws://", "wss://"])?,
            suffix: env("BINANCE_STREAM_SUFFIX").unwrap_or(stream_defaults.suffix),
            reconnect_delay: parse_millis(&env, "TICKER_RECONNECT_DELAY_MS", stream_defaults.reconnect_delay),
            connect_timeout: non_zero(
                "TICKER_CONNECT_TIMEOUT_SECS",
                parse_secs(&env, "TICKER_CONNECT_TIMEOUT_SECS", stream_defaults.connect_timeout),
            )?,
            idle_timeout: non_zero(
                "TICKER_IDLE_TIMEOUT_SECS",
                parse_secs(&env, "TICKER_IDLE_TIMEOUT_SECS", stream_defaults.idle_timeout),
            )?,
            fallback_poll_interval: non_zero(
                "TICKER_FALLBACK_POLL_SECS",
                parse_secs(&env, "TICKER_FALLBACK_POLL_SECS", stream_defaults.fallback_poll_interval),
            )?,
        };

        let http = ["http://", "https://"];
        let gateway_defaults = GatewaySettings::default();
        let gateway = GatewaySettings {
            binance_url: parse_url(&env, "BINANCE_REST_URL", &gateway_defaults.binance_url, &http)?,
            cryptocompare_url: parse_url(
                &env,
                "CRYPTOCOMPARE_API_URL",
                &gateway_defaults.cryptocompare_url,
                &http,
            )?,
            cryptocompare_api_key: env("CRYPTOCOMPARE_API_KEY").and_then(ApiKey::new),
            coingecko_url: parse_url(&env, "COINGECKO_API_URL", &gateway_defaults.coingecko_url, &http)?,
            http_timeout: non_zero(
                "GATEWAY_HTTP_TIMEOUT_SECS",
                parse_secs(&env, "GATEWAY_HTTP_TIMEOUT_SECS", gateway_defaults.http_timeout),
            )?,
            snapshot_ttl: parse_secs(&env, "GATEWAY_SNAPSHOT_TTL_SECS", gateway_defaults.snapshot_ttl),
            history_hourly_ttl: parse_secs(
                &env,
                "GATEWAY_HISTORY_HOURLY_TTL_SECS",
                gateway_defaults.history_hourly_ttl,
            ),
            history_daily_ttl: parse_secs(
                &env,
                "GATEWAY_HISTORY_DAILY_TTL_SECS",
                gateway_defaults.history_daily_ttl,
            ),
            market_list_ttl: parse_secs(
                &env,
                "GATEWAY_MARKET_LIST_TTL_SECS",
                gateway_defaults.market_list_ttl,
            ),
            coin_chart_ttl: parse_secs(&env, "GATEWAY_COIN_CHART_TTL_SECS", gateway_defaults.coin_chart_ttl),
            trending_ttl: parse_secs(&env, "GATEWAY_TRENDING_TTL_SECS", gateway_defaults.trending_ttl),
        };

        let store_defaults = StoreSettings::default();
        let store = StoreSettings {
            flash_window: non_zero(
                "TICKER_FLASH_WINDOW_MS",
                parse_millis(&env, "TICKER_FLASH_WINDOW_MS", store_defaults.flash_window),
            )?,
            broadcast_capacity: parse_value(&env, "TICKER_BROADCAST_CAPACITY", store_defaults.broadcast_capacity)
                .max(1),
        };

        let server = ServerSettings {
            http_port: parse_value(&env, "TICKER_HTTP_PORT", ServerSettings::default().http_port),
        };

        Ok(Self {
            registry,
            stream,
            gateway,
            store,
            server,
        })
    }

    /// Stream client configuration.
    #[must_use]
    pub fn stream_client_config(&self) -> StreamClientConfig {
        StreamClientConfig {
            base_url: self.stream.url.clone(),
            stream_suffix: self.stream.suffix.clone(),
            reconnect: ReconnectConfig {
                delay: self.stream.reconnect_delay,
                ..ReconnectConfig::default()
            },
            connect_timeout: self.stream.connect_timeout,
            idle_timeout: self.stream.idle_timeout,
        }
    }

    /// Gateway configuration.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        let settings = &self.gateway;
        GatewayConfig {
            binance_url: settings.binance_url.clone(),
            cryptocompare_url: settings.cryptocompare_url.clone(),
            cryptocompare_api_key: settings.cryptocompare_api_key.clone(),
            coingecko_url: settings.coingecko_url.clone(),
            http_timeout: settings.http_timeout,
            snapshot_ttl: settings.snapshot_ttl,
            history_hourly_ttl: settings.history_hourly_ttl,
            history_daily_ttl: settings.history_daily_ttl,
            market_list_ttl: settings.market_list_ttl,
            coin_chart_ttl: settings.coin_chart_ttl,
            trending_ttl: settings.trending_ttl,
            ..GatewayConfig::default()
        }
    }

    /// Ticker store configuration.
    #[must_use]
    pub const fn store_config(&self) -> TickerStoreConfig {
        TickerStoreConfig {
            flash_window: self.store.flash_window,
            broadcast_capacity: self.store.broadcast_capacity,
        }
    }

    /// Market feed configuration.
    #[must_use]
    pub const fn feed_config(&self) -> MarketFeedConfig {
        MarketFeedConfig {
            fallback_interval: self.stream.fallback_poll_interval,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `TICKER_SYMBOLS` contains an invalid entry.
    #[error("invalid TICKER_SYMBOLS entry: {0}")]
    InvalidSymbol(SymbolError),
    /// `TICKER_SYMBOLS` is set but lists no symbols.
    #[error("TICKER_SYMBOLS lists no symbols")]
    EmptySymbolList,
    /// URL variable has the wrong scheme.
    #[error("environment variable {key} is not a valid URL: {value}")]
    InvalidUrl {
        /// Variable name.
        key: &'static str,
        /// Rejected value.
        value: String,
    },
    /// Timeout or interval variable is zero.
    #[error("environment variable {key} must be greater than zero")]
    ZeroDuration {
        /// Variable name.
        key: &'static str,
    },
}

impl From<SymbolError> for ConfigError {
    fn from(error: SymbolError) -> Self {
        match error {
            SymbolError::Empty => Self::EmptySymbolList,
            other => Self::InvalidSymbol(other),
        }
    }
}

fn parse_value<T, E>(env: &E, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    E: Fn(&str) -> Option<String>,
{
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_secs<E: Fn(&str) -> Option<String>>(env: &E, key: &str, default: Duration) -> Duration {
    env(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_millis<E: Fn(&str) -> Option<String>>(env: &E, key: &str, default: Duration) -> Duration {
    env(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn non_zero(key: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        Err(ConfigError::ZeroDuration { key })
    } else {
        Ok(value)
    }
}

fn parse_url<E: Fn(&str) -> Option<String>>(
    env: &E,
    key: &'static str,
    default: &str,
    schemes: &[&str],
) -> Result<String, ConfigError> {
    let Some(value) = env(key) else {
        return Ok(default.to_string());
    };
    let valid = schemes
        .iter()
        .any(|scheme| value.len() > scheme.len() && value.to_ascii_lowercase().starts_with(scheme));
    if valid {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::InvalidUrl { key, value })
    }
}
