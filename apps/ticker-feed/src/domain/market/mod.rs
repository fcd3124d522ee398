//! REST Market Data Types
//!
//! Values returned by the REST gateway: point-in-time snapshots, OHLCV
//! history, ranked market summaries, coin price charts and trending coins.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::ticker::TickerUpdate;

// =============================================================================
// Price Snapshot
// =============================================================================

/// 24h rolling snapshot for one symbol, as reported by a REST provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSnapshot {
    /// Last price.
    pub price: f64,
    /// Absolute 24h change.
    pub change_24h: f64,
    /// Percentage 24h change.
    pub change_percent_24h: f64,
    /// 24h high.
    pub high_24h: f64,
    /// 24h low.
    pub low_24h: f64,
    /// 24h base volume.
    pub volume_24h: f64,
    /// 24h quote volume.
    pub quote_volume_24h: f64,
    /// Provider timestamp of the observation.
    pub as_of: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Convert to a store update for `symbol`.
    #[must_use]
    pub fn to_update(&self, symbol: &str) -> TickerUpdate {
        TickerUpdate {
            symbol: symbol.to_string(),
            price: self.price,
            price_change: self.change_24h,
            price_change_percent: self.change_percent_24h,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            volume: self.volume_24h,
            quote_volume: self.quote_volume_24h,
            last_update: self.as_of,
        }
    }
}

// =============================================================================
// History
// =============================================================================

/// Candle width for historical data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// One candle per hour.
    Hourly,
    /// One candle per day.
    Daily,
}

impl Granularity {
    /// Parse `hourly`/`hour`/`1h` or `daily`/`day`/`1d`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" | "1h" => Some(Self::Hourly),
            "daily" | "day" | "1d" => Some(Self::Daily),
            _ => None,
        }
    }

    /// Stable lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }
}

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcvPoint {
    /// Candle open time.
    pub time: DateTime<Utc>,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Volume in the base asset.
    pub volume_from: f64,
    /// Volume in the quote currency.
    pub volume_to: f64,
}

/// Why a history request could not be served at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unavailable {
    /// The history provider needs an API key and none is configured.
    MissingApiKey,
    /// The symbol is not in the registry.
    UnknownSymbol,
    /// The quote currency code is malformed.
    InvalidCurrency,
}

impl Unavailable {
    /// Human readable reason.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::MissingApiKey => "historical data provider is not configured",
            Self::UnknownSymbol => "symbol is not supported",
            Self::InvalidCurrency => "currency code is invalid",
        }
    }
}

/// Result of a history request.
///
/// Upstream outages yield `Points` (possibly empty); only configuration and
/// parameter problems yield `Unavailable`.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryResult {
    /// Candles ordered by time, oldest first.
    Points(Vec<OhlcvPoint>),
    /// The capability cannot serve this request.
    Unavailable(Unavailable),
}

impl HistoryResult {
    /// Candles, or an empty slice when unavailable.
    #[must_use]
    pub fn points(&self) -> &[OhlcvPoint] {
        match self {
            Self::Points(points) => points,
            Self::Unavailable(_) => &[],
        }
    }
}

// =============================================================================
// Market List
// =============================================================================

/// Ranked market summary for the broader coin universe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSummary {
    /// Provider coin id, e.g. `bitcoin`.
    pub id: String,
    /// Ticker symbol, upper-cased.
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Current price in the quote currency.
    pub current_price: Option<f64>,
    /// 24h percentage change.
    pub price_change_percentage_24h: Option<f64>,
    /// 24h traded volume.
    pub total_volume: Option<f64>,
    /// Market capitalization.
    pub market_cap: Option<f64>,
    /// Logo URL.
    pub image: Option<String>,
    /// 7-day sparkline prices, oldest first.
    pub sparkline: Vec<f64>,
}

// =============================================================================
// Coin Charts and Trending
// =============================================================================

/// One price sample of a coin chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    /// Sample time.
    pub time: DateTime<Utc>,
    /// Price in the quote currency.
    pub price: f64,
}

/// A coin ranked by recent search activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendingCoin {
    /// Provider coin id, e.g. `bitcoin`.
    pub id: String,
    /// Provider numeric id.
    pub coin_id: Option<u64>,
    /// Display name.
    pub name: String,
    /// Ticker symbol, upper-cased.
    pub symbol: String,
    /// Market-cap rank, if ranked.
    pub market_cap_rank: Option<u32>,
    /// Thumbnail logo URL.
    pub thumb: Option<String>,
    /// Small logo URL.
    pub small: Option<String>,
    /// Large logo URL.
    pub large: Option<String>,
    /// URL slug.
    pub slug: Option<String>,
    /// Price quoted in BTC.
    pub price_btc: Option<f64>,
    /// Position in the trending list, 0 first.
    pub score: u32,
}
