//! REST Price Gateway
//!
//! Cached access to the REST providers: Binance snapshots, CryptoCompare
//! history and prices, and the CoinGecko market list, coin charts and
//! trending coins.
//!
//! # Error Policy
//!
//! Callers never see an upstream error. A failed fetch is answered with the
//! last value cached under the same key (even if expired), or with an empty
//! result when nothing was ever cached. Every failure is logged at `warn`
//! and counted in `ticker_feed_gateway_requests_total`.
//!
//! Parameters are validated before any network call; a request that
//! validates to nothing makes no request at all.

pub mod cache;
pub mod fetch;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use self::cache::{CacheKey, Lookup, TtlCache};
use self::fetch::{Provider, ProviderError};
use crate::application::ports::SnapshotProvider;
use crate::domain::market::{
    ChartPoint, Granularity, HistoryResult, MarketSummary, OhlcvPoint, PriceSnapshot, TrendingCoin,
    Unavailable,
};
use crate::domain::symbols::SymbolRegistry;
use crate::infrastructure::binance::BinanceRestClient;
use crate::infrastructure::binance::rest::DEFAULT_REST_URL;
use crate::infrastructure::coingecko::{self, CoinGeckoClient};
use crate::infrastructure::cryptocompare::{self, ApiKey, CryptoCompareClient};
use crate::infrastructure::metrics::{self, CacheOutcome};

/// Largest history window accepted by the provider.
pub const MAX_HISTORY_LIMIT: u32 = 2000;

/// Largest market list page accepted by the provider.
pub const MAX_PAGE_SIZE: u32 = 250;

/// Largest coin chart window in days; `max` is accepted separately.
pub const MAX_CHART_DAYS: u32 = 3650;

/// Quote currency used for the market list and coin charts.
const MARKET_LIST_CURRENCY: &str = "usd";

// =============================================================================
// Configuration
// =============================================================================

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Binance REST base URL.
    pub binance_url: String,
    /// CryptoCompare data API base URL.
    pub cryptocompare_url: String,
    /// CryptoCompare API key; history is unavailable without it, prices
    /// are fetched unauthenticated.
    pub cryptocompare_api_key: Option<ApiKey>,
    /// CoinGecko API base URL.
    pub coingecko_url: String,
    /// Per-request timeout.
    pub http_timeout: Duration,
    /// Snapshot freshness.
    pub snapshot_ttl: Duration,
    /// Hourly history freshness.
    pub history_hourly_ttl: Duration,
    /// Daily history freshness.
    pub history_daily_ttl: Duration,
    /// Market list freshness.
    pub market_list_ttl: Duration,
    /// Price matrix freshness.
    pub current_price_ttl: Duration,
    /// Coin chart freshness.
    pub coin_chart_ttl: Duration,
    /// Trending list freshness.
    pub trending_ttl: Duration,
}

impl Default for GatewayConfig {
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
            current_price_ttl: Duration::from_secs(30),
            coin_chart_ttl: Duration::from_secs(300),
            trending_ttl: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Gateway
// =============================================================================

type PriceMatrix = BTreeMap<String, BTreeMap<String, f64>>;

/// Cached REST market data gateway.
#[derive(Debug)]
pub struct RestPriceGateway {
    config: GatewayConfig,
    registry: Arc<SymbolRegistry>,
    binance: BinanceRestClient,
    cryptocompare: CryptoCompareClient,
    coingecko: CoinGeckoClient,
    snapshots: TtlCache<BTreeMap<String, PriceSnapshot>>,
    history: TtlCache<Vec<OhlcvPoint>>,
    markets: TtlCache<Vec<MarketSummary>>,
    prices: TtlCache<PriceMatrix>,
    charts: TtlCache<Vec<ChartPoint>>,
    trending: TtlCache<Vec<TrendingCoin>>,
}

impl RestPriceGateway {
    /// Create a gateway. All providers share one connection pool.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Http` if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig, registry: Arc<SymbolRegistry>) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.http_timeout).build()?;

        let cryptocompare = CryptoCompareClient::new(
            client.clone(),
            config.cryptocompare_url.clone(),
            config.cryptocompare_api_key.clone(),
        );
        if !cryptocompare.has_api_key() {
            tracing::warn!("CRYPTOCOMPARE_API_KEY not set, historical data disabled");
        }

        Ok(Self {
            binance: BinanceRestClient::new(client.clone(), config.binance_url.clone()),
            coingecko: CoinGeckoClient::new(client, config.coingecko_url.clone()),
            cryptocompare,
            registry,
            config,
            snapshots: TtlCache::new(),
            history: TtlCache::new(),
            markets: TtlCache::new(),
            prices: TtlCache::new(),
            charts: TtlCache::new(),
            trending: TtlCache::new(),
        })
    }

    /// Symbol allow-list used for validation.
    #[must_use]
    pub fn registry(&self) -> &Arc<SymbolRegistry> {
        &self.registry
    }

    /// Whether history requests can be served.
    #[must_use]
    pub const fn history_enabled(&self) -> bool {
        self.cryptocompare.has_api_key()
    }

    /// 24h snapshots for the allow-listed subset of `symbols`.
    pub async fn get_snapshot<S: AsRef<str>>(&self, symbols: &[S]) -> BTreeMap<String, PriceSnapshot> {
        let mut known = self.registry.filter_known(symbols.iter().map(AsRef::as_ref));
        if known.is_empty() {
            return BTreeMap::new();
        }
        known.sort_unstable();

        let key = CacheKey::new(Provider::Binance, "snapshot", known.join(","));
        cached(&self.snapshots, key, self.config.snapshot_ttl, || async {
            let entries = self.binance.ticker_24h(&known).await?;
            let snapshots: BTreeMap<String, PriceSnapshot> = entries
                .into_iter()
                .filter(|(symbol, _)| known.contains(symbol))
                .collect();
            Ok::<_, ProviderError>(snapshots)
        })
        .await
    }

    /// OHLCV history for `symbol` (pair or base asset) quoted in `currency`.
    pub async fn get_history(
        &self,
        symbol: &str,
        currency: &str,
        granularity: Granularity,
        limit: u32,
    ) -> HistoryResult {
        let Some(info) = self.registry.resolve_asset(symbol) else {
            return HistoryResult::Unavailable(Unavailable::UnknownSymbol);
        };
        let Some(quote) = normalize_currency(currency) else {
            return HistoryResult::Unavailable(Unavailable::InvalidCurrency);
        };
        if !self.history_enabled() {
            return HistoryResult::Unavailable(Unavailable::MissingApiKey);
        }

        let base = info.short.clone();
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let (resource, ttl) = match granularity {
            Granularity::Hourly => ("history_hourly", self.config.history_hourly_ttl),
            Granularity::Daily => ("history_daily", self.config.history_daily_ttl),
        };

        let key = CacheKey::new(Provider::CryptoCompare, resource, format!("{base}:{quote}:{limit}"));
        let points = cached(&self.history, key, ttl, || {
            self.cryptocompare.history(&base, &quote, granularity, limit)
        })
        .await;
        HistoryResult::Points(points)
    }

    /// One page of the market-cap ranked coin list.
    pub async fn get_market_list(&self, page: u32, page_size: u32) -> Vec<MarketSummary> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let key = CacheKey::new(Provider::CoinGecko, "markets", format!("{page}:{page_size}"));
        cached(&self.markets, key, self.config.market_list_ttl, || {
            self.coingecko
                .markets(MARKET_LIST_CURRENCY, page, page_size, true)
        })
        .await
    }

    /// Current prices for each base asset in each currency.
    ///
    /// Malformed codes are dropped; returns an empty map when nothing
    /// remains. Works with or without an API key.
    pub async fn get_current_prices<S: AsRef<str>>(&self, bases: &[S], currencies: &[S]) -> PriceMatrix {
        let mut bases: Vec<String> = bases
            .iter()
            .filter_map(|b| normalize_code(b.as_ref(), 1, 10, |c| c.is_ascii_alphanumeric()))
            .collect();
        let mut quotes: Vec<String> = currencies
            .iter()
            .filter_map(|c| normalize_currency(c.as_ref()))
            .collect();
        bases.sort_unstable();
        bases.dedup();
        quotes.sort_unstable();
        quotes.dedup();

        if bases.is_empty() || quotes.is_empty() {
            return BTreeMap::new();
        }

        let key = CacheKey::new(
            Provider::CryptoCompare,
            "prices",
            format!("{}:{}", bases.join(","), quotes.join(",")),
        );
        cached(&self.prices, key, self.config.current_price_ttl, || {
            self.cryptocompare.price_multi(&bases, &quotes)
        })
        .await
    }

    /// USD price samples for CoinGecko coin `id` over `days` (`1`-`3650` or
    /// `max`), oldest first.
    ///
    /// A malformed id or window returns an empty chart without a request.
    pub async fn get_coin_chart(&self, id: &str, days: &str) -> Vec<ChartPoint> {
        let (Some(id), Some(days)) = (normalize_coin_id(id), normalize_days(days)) else {
            tracing::debug!(id, days, "Rejected coin chart parameters");
            return Vec::new();
        };

        let key = CacheKey::new(Provider::CoinGecko, "coin_chart", format!("{id}:{days}"));
        cached(&self.charts, key, self.config.coin_chart_ttl, || {
            self.coingecko.coin_chart(&id, MARKET_LIST_CURRENCY, &days)
        })
        .await
    }

    /// Coins ranked by recent search activity.
    pub async fn get_trending(&self) -> Vec<TrendingCoin> {
        let key = CacheKey::new(Provider::CoinGecko, "trending", "");
        cached(&self.trending, key, self.config.trending_ttl, || self.coingecko.trending()).await
    }
}

#[async_trait]
impl SnapshotProvider for RestPriceGateway {
    async fn fetch_snapshots(&self, symbols: &[String]) -> BTreeMap<String, PriceSnapshot> {
        self.get_snapshot(symbols).await
    }
}

// =============================================================================
// Cache-or-fetch
// =============================================================================

async fn cached<V, F, Fut>(cache: &TtlCache<V>, key: CacheKey, ttl: Duration, fetch: F) -> V
where
    V: Clone + Default,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, ProviderError>>,
{
    let provider = key.provider.as_str();
    let resource = key.resource;

    if let Lookup::Fresh(value) = cache.lookup(&key) {
        metrics::record_gateway_request(provider, resource, CacheOutcome::Hit);
        return value;
    }

    match fetch().await {
        Ok(value) => {
            cache.insert(key, value.clone(), ttl);
            metrics::record_gateway_request(provider, resource, CacheOutcome::Fetched);
            value
        }
        Err(e) => match cache.lookup(&key) {
            Lookup::Fresh(value) | Lookup::Stale(value) => {
                tracing::warn!(
                    provider,
                    resource,
                    params = %key.params,
                    error = %e,
                    "Upstream fetch failed, serving cached value"
                );
                metrics::record_gateway_request(provider, resource, CacheOutcome::StaleFallback);
                value
            }
            Lookup::Miss => {
                tracing::warn!(
                    provider,
                    resource,
                    params = %key.params,
                    error = %e,
                    "Upstream fetch failed, nothing cached"
                );
                metrics::record_gateway_request(provider, resource, CacheOutcome::Empty);
                V::default()
            }
        },
    }
}

fn normalize_code(raw: &str, min: usize, max: usize, allowed: fn(char) -> bool) -> Option<String> {
    let code = raw.trim();
    ((min..=max).contains(&code.len()) && code.chars().all(allowed)).then(|| code.to_ascii_uppercase())
}

/// Currency codes are 2-10 ASCII letters.
fn normalize_currency(raw: &str) -> Option<String> {
    normalize_code(raw, 2, 10, |c| c.is_ascii_alphabetic())
}

/// CoinGecko ids are lower-case slugs such as `bitcoin` or `usd-coin`.
fn normalize_coin_id(raw: &str) -> Option<String> {
    let id = raw.trim().to_ascii_lowercase();
    let valid = (1..=100).contains(&id.len())
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !id.starts_with('-');
    valid.then_some(id)
}

fn normalize_days(raw: &str) -> Option<String> {
    let days = raw.trim();
    if days.eq_ignore_ascii_case("max") {
        return Some("max".to_string());
    }
    days.parse::<u32>()
        .ok()
        .filter(|d| (1..=MAX_CHART_DAYS).contains(d))
        .map(|d| d.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(api_key: Option<&str>) -> RestPriceGateway {
        let config = GatewayConfig {
            binance_url: "http://127.0.0.1:1".to_string(),
            cryptocompare_url: "http://127.0.0.1:1".to_string(),
            coingecko_url: "http://127.0.0.1:1".to_string(),
            cryptocompare_api_key: api_key.and_then(ApiKey::new),
            http_timeout: Duration::from_millis(200),
            ..GatewayConfig::default()
        };
        RestPriceGateway::new(config, Arc::new(SymbolRegistry::default())).unwrap()
    }

    #[test]
    fn currency_validation() {
        assert_eq!(normalize_currency(" usd "), Some("USD".to_string()));
        assert_eq!(normalize_currency("eur"), Some("EUR".to_string()));
        assert_eq!(normalize_currency("u"), None);
        assert_eq!(normalize_currency("US1"), None);
        assert_eq!(normalize_currency("ABCDEFGHIJK"), None);
    }

    #[test]
    fn coin_chart_parameter_validation() {
        assert_eq!(normalize_coin_id(" Bitcoin "), Some("bitcoin".to_string()));
        assert_eq!(normalize_coin_id("usd-coin"), Some("usd-coin".to_string()));
        assert_eq!(normalize_coin_id("../admin"), None);
        assert_eq!(normalize_coin_id(""), None);
        assert_eq!(normalize_days("7"), Some("7".to_string()));
        assert_eq!(normalize_days("MAX"), Some("max".to_string()));
        assert_eq!(normalize_days("0"), None);
        assert_eq!(normalize_days("-3"), None);
        assert_eq!(normalize_days("9999"), None);
    }

    #[tokio::test]
    async fn malformed_coin_chart_request_is_empty_without_fetching() {
        let gateway = gateway(None);
        assert!(gateway.get_coin_chart("bit coin", "7").await.is_empty());
        assert!(gateway.get_coin_chart("bitcoin", "week").await.is_empty());
        assert!(gateway.charts.is_empty());
    }

    #[tokio::test]
    async fn unknown_symbols_return_empty_without_fetching() {
        let gateway = gateway(None);
        assert!(gateway.get_snapshot(&["FAKEUSDT", "???"]).await.is_empty());
        assert!(gateway.snapshots.is_empty());
    }

    #[tokio::test]
    async fn history_parameter_problems_are_unavailable() {
        let keyed = gateway(Some("key"));
        assert_eq!(
            keyed.get_history("NOPE", "USD", Granularity::Hourly, 24).await,
            HistoryResult::Unavailable(Unavailable::UnknownSymbol)
        );
        assert_eq!(
            keyed.get_history("BTC", "U$D", Granularity::Daily, 24).await,
            HistoryResult::Unavailable(Unavailable::InvalidCurrency)
        );

        let unkeyed = gateway(None);
        assert!(!unkeyed.history_enabled());
        assert_eq!(
            unkeyed.get_history("BTCUSDT", "USD", Granularity::Hourly, 24).await,
            HistoryResult::Unavailable(Unavailable::MissingApiKey)
        );
    }

    #[tokio::test]
    async fn failed_fetch_without_cache_is_empty() {
        let gateway = gateway(Some("key"));
        assert_eq!(
            gateway.get_history("ETH", "usd", Granularity::Daily, 5000).await,
            HistoryResult::Points(Vec::new())
        );
        assert!(gateway.get_market_list(0, 1000).await.is_empty());
        assert!(gateway.get_current_prices(&["BTC"], &["USD"]).await.is_empty());
        assert!(gateway.get_coin_chart("bitcoin", "7").await.is_empty());
        assert!(gateway.get_trending().await.is_empty());
    }
}
