//! Binance REST Client
//!
//! Batch 24h ticker lookups used to seed the store and to serve snapshots
//! while the stream is down.

use chrono::{DateTime, Utc};
use reqwest::Client;

use super::messages::{Ticker24h, WireNumber};
use crate::domain::market::PriceSnapshot;
use crate::infrastructure::gateway::fetch::{self, Provider, ProviderError};

/// Default Binance REST base URL.
pub const DEFAULT_REST_URL: &str = "https://api.binance.com/api/v3";

/// Binance spot REST client.
#[derive(Debug, Clone)]
pub struct BinanceRestClient {
    client: Client,
    base_url: String,
}

impl BinanceRestClient {
    /// Create a client sharing `client`'s connection pool.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `GET /ticker/24hr?symbols=[...]` for all `symbols` in one request.
    ///
    /// Entries with missing or non-finite values are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the request or decode fails.
    pub async fn ticker_24h(
        &self,
        symbols: &[String],
    ) -> Result<Vec<(String, PriceSnapshot)>, ProviderError> {
        let list = serde_json::to_string(symbols).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let request = self
            .client
            .get(format!("{}/ticker/24hr", self.base_url))
            .query(&[("symbols", list)]);

        let tickers: Vec<Ticker24h> = fetch::send_json(Provider::Binance, request).await?;
        let now = Utc::now();

        Ok(tickers
            .into_iter()
            .filter_map(|ticker| {
                let symbol = ticker.symbol.to_ascii_uppercase();
                match to_snapshot(&ticker, now) {
                    Some(snapshot) => Some((symbol, snapshot)),
                    None => {
                        tracing::debug!(symbol = %symbol, "Skipping incomplete REST ticker");
                        None
                    }
                }
            })
            .collect())
    }
}

fn to_snapshot(ticker: &Ticker24h, now: DateTime<Utc>) -> Option<PriceSnapshot> {
    let value = |field: &Option<WireNumber>| field.as_ref().and_then(WireNumber::to_f64);

    let price = value(&ticker.last_price).filter(|p| *p > 0.0)?;
    Some(PriceSnapshot {
        price,
        change_24h: value(&ticker.price_change)?,
        change_percent_24h: value(&ticker.price_change_percent)?,
        high_24h: value(&ticker.high_price)?,
        low_24h: value(&ticker.low_price)?,
        volume_24h: value(&ticker.volume)?,
        quote_volume_24h: value(&ticker.quote_volume)?,
        as_of: ticker
            .close_time
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(now),
    })
}
