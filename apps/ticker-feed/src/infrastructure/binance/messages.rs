//! Binance Wire Types
//!
//! Deserialization targets for Binance ticker stream frames and the REST
//! 24h ticker endpoint. Every field is optional at this layer; the codec
//! decides what is required.
//!
//! # References
//!
//! - [Individual Symbol Ticker Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#individual-symbol-ticker-streams)
//! - [24hr Ticker Price Change Statistics](https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#24hr-ticker-price-change-statistics)

use serde::Deserialize;

// =============================================================================
// Event Tags
// =============================================================================

/// `e` tag of a full rolling-window ticker.
pub const EVENT_TICKER: &str = "24hrTicker";

/// `e` tag of a mini ticker (no change fields, carries the open price).
pub const EVENT_MINI_TICKER: &str = "24hrMiniTicker";

// =============================================================================
// Numbers
// =============================================================================

/// Numeric field as sent on the wire: usually a decimal string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    /// Decimal string, e.g. `"50123.45000000"`.
    Text(String),
    /// Plain JSON number.
    Number(f64),
}

impl WireNumber {
    /// Parse to a finite float.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Text(text) => text.trim().parse::<f64>().ok()?,
            Self::Number(number) => *number,
        };
        value.is_finite().then_some(value)
    }
}

// =============================================================================
// Stream Frames
// =============================================================================

/// One ticker event from the stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickerFrame {
    /// Event type tag.
    #[serde(rename = "e")]
    pub event_type: Option<String>,
    /// Event time, epoch milliseconds.
    #[serde(rename = "E")]
    pub event_time: Option<i64>,
    /// Symbol, upper case.
    #[serde(rename = "s")]
    pub symbol: Option<String>,
    /// Close (last) price.
    #[serde(rename = "c")]
    pub close: Option<WireNumber>,
    /// Open price of the rolling window.
    #[serde(rename = "o")]
    pub open: Option<WireNumber>,
    /// Absolute price change.
    #[serde(rename = "p")]
    pub price_change: Option<WireNumber>,
    /// Percentage price change.
    #[serde(rename = "P")]
    pub price_change_percent: Option<WireNumber>,
    /// High price.
    #[serde(rename = "h")]
    pub high: Option<WireNumber>,
    /// Low price.
    #[serde(rename = "l")]
    pub low: Option<WireNumber>,
    /// Total traded base asset volume.
    #[serde(rename = "v")]
    pub volume: Option<WireNumber>,
    /// Total traded quote asset volume.
    #[serde(rename = "q")]
    pub quote_volume: Option<WireNumber>,
}

// =============================================================================
// REST
// =============================================================================

/// One element of `GET /api/v3/ticker/24hr?symbols=[..]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    /// Symbol.
    pub symbol: String,
    /// Last price.
    #[serde(alias = "price")]
    pub last_price: Option<WireNumber>,
    /// Absolute 24h change.
    pub price_change: Option<WireNumber>,
    /// Percentage 24h change.
    pub price_change_percent: Option<WireNumber>,
    /// 24h high.
    pub high_price: Option<WireNumber>,
    /// 24h low.
    pub low_price: Option<WireNumber>,
    /// 24h base volume.
    pub volume: Option<WireNumber>,
    /// 24h quote volume.
    pub quote_volume: Option<WireNumber>,
    /// Window close time, epoch milliseconds.
    pub close_time: Option<i64>,
}
