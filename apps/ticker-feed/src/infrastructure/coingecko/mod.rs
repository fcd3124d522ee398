//! CoinGecko Client
//!
//! Ranked market list (`/coins/markets`) for the wider coin universe, per-coin
//! price charts (`/coins/{id}/market_chart`) and the trending list
//! (`/search/trending`).

use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;

use crate::domain::market::{ChartPoint, MarketSummary, TrendingCoin};
use crate::infrastructure::gateway::fetch::{self, Provider, ProviderError};

/// Default CoinGecko API base URL.
pub const DEFAULT_API_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Deserialize)]
struct MarketEntry {
    id: String,
    symbol: String,
    name: String,
    current_price: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    total_volume: Option<f64>,
    market_cap: Option<f64>,
    image: Option<String>,
    sparkline_in_7d: Option<Sparkline>,
}

#[derive(Debug, Deserialize)]
struct Sparkline {
    #[serde(default)]
    price: Vec<Option<f64>>,
}

impl From<MarketEntry> for MarketSummary {
    fn from(entry: MarketEntry) -> Self {
        let finite = |v: Option<f64>| v.filter(|v| v.is_finite());
        Self {
            id: entry.id,
            symbol: entry.symbol.to_ascii_uppercase(),
            name: entry.name,
            current_price: finite(entry.current_price),
            price_change_percentage_24h: finite(entry.price_change_percentage_24h),
            total_volume: finite(entry.total_volume),
            market_cap: finite(entry.market_cap),
            image: entry.image,
            sparkline: entry
                .sparkline_in_7d
                .map(|s| s.price.into_iter().flatten().filter(|v| v.is_finite()).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<(f64, Option<f64>)>,
}

impl MarketChart {
    fn into_points(self) -> Vec<ChartPoint> {
        #[allow(clippy::cast_possible_truncation)]
        let mut points: Vec<ChartPoint> = self
            .prices
            .into_iter()
            .filter_map(|(millis, price)| {
                let price = price.filter(|p| p.is_finite())?;
                if !millis.is_finite() {
                    return None;
                }
                let time = DateTime::from_timestamp_millis(millis as i64)?;
                Some(ChartPoint { time, price })
            })
            .collect();
        points.sort_by_key(|point| point.time);
        points
    }
}

#[derive(Debug, Deserialize)]
struct TrendingEnvelope {
    #[serde(default)]
    coins: Vec<TrendingEntry>,
}

#[derive(Debug, Deserialize)]
struct TrendingEntry {
    item: TrendingItem,
}

#[derive(Debug, Deserialize)]
struct TrendingItem {
    id: String,
    coin_id: Option<u64>,
    name: String,
    symbol: String,
    market_cap_rank: Option<u32>,
    thumb: Option<String>,
    small: Option<String>,
    large: Option<String>,
    slug: Option<String>,
    price_btc: Option<f64>,
    #[serde(default)]
    score: u32,
}

impl From<TrendingItem> for TrendingCoin {
    fn from(item: TrendingItem) -> Self {
        Self {
            id: item.id,
            coin_id: item.coin_id,
            name: item.name,
            symbol: item.symbol.to_ascii_uppercase(),
            market_cap_rank: item.market_cap_rank,
            thumb: item.thumb,
            small: item.small,
            large: item.large,
            slug: item.slug,
            price_btc: item.price_btc.filter(|p| p.is_finite()),
            score: item.score,
        }
    }
}

/// CoinGecko API client.
#[derive(Debug, Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

impl CoinGeckoClient {
    /// Create a client sharing `client`'s connection pool.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// One page of coins ranked by market cap.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the request or decode fails.
    pub async fn markets(
        &self,
        vs_currency: &str,
        page: u32,
        per_page: u32,
        sparkline: bool,
    ) -> Result<Vec<MarketSummary>, ProviderError> {
        let request = self
            .client
            .get(format!("{}/coins/markets", self.base_url))
            .query(&[
                ("vs_currency", vs_currency.to_string()),
                ("order", "market_cap_desc".to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
                ("sparkline", sparkline.to_string()),
                ("price_change_percentage", "24h".to_string()),
            ]);

        let entries: Vec<MarketEntry> = fetch::send_json(Provider::CoinGecko, request).await?;
        Ok(entries.into_iter().map(MarketSummary::from).collect())
    }

    /// Price samples for coin `id` over the last `days`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the request or decode fails.
    pub async fn coin_chart(
        &self,
        id: &str,
        vs_currency: &str,
        days: &str,
    ) -> Result<Vec<ChartPoint>, ProviderError> {
        let request = self
            .client
            .get(format!("{}/coins/{id}/market_chart", self.base_url))
            .query(&[("vs_currency", vs_currency), ("days", days)]);

        let chart: MarketChart = fetch::send_json(Provider::CoinGecko, request).await?;
        Ok(chart.into_points())
    }

    /// Coins ranked by recent search activity.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the request or decode fails.
    pub async fn trending(&self) -> Result<Vec<TrendingCoin>, ProviderError> {
        let request = self.client.get(format!("{}/search/trending", self.base_url));

        let envelope: TrendingEnvelope = fetch::send_json(Provider::CoinGecko, request).await?;
        Ok(envelope
            .coins
            .into_iter()
            .map(|entry| TrendingCoin::from(entry.item))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullable_fields_map_to_none() {
        let entries: Vec<MarketEntry> = serde_json::from_str(
            r#"[{"id":"bitcoin","symbol":"btc","name":"Bitcoin","image":"https://x/btc.png","current_price":50000.5,"market_cap":1.0e12,"total_volume":null,"price_change_percentage_24h":-1.2,"sparkline_in_7d":{"price":[1.0,null,2.0]}},{"id":"newcoin","symbol":"new","name":"New","current_price":null}]"#,
        )
        .unwrap();
        let summaries: Vec<MarketSummary> = entries.into_iter().map(MarketSummary::from).collect();

        assert_eq!(summaries[0].symbol, "BTC");
        assert_eq!(summaries[0].current_price, Some(50_000.5));
        assert_eq!(summaries[0].total_volume, None);
        assert_eq!(summaries[0].sparkline, vec![1.0, 2.0]);
        assert_eq!(summaries[1].current_price, None);
        assert!(summaries[1].sparkline.is_empty());
        assert!(summaries[1].image.is_none());
    }

    #[test]
    fn chart_samples_skip_nulls_and_sort() {
        let chart: MarketChart = serde_json::from_str(
            r#"{"prices":[[1700003600000,51000.5],[1700000000000,50000.0],[1700007200000,null]],"market_caps":[],"total_volumes":[]}"#,
        )
        .unwrap();
        let points = chart.into_points();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].time.timestamp(), 1_700_000_000);
        assert_eq!(points[1].price, 51_000.5);
    }

    #[test]
    fn trending_items_are_unwrapped() {
        let envelope: TrendingEnvelope = serde_json::from_str(
            r#"{"coins":[{"item":{"id":"pepe","coin_id":29850,"name":"Pepe","symbol":"pepe","market_cap_rank":24,"thumb":"https://x/thumb.png","small":"https://x/small.png","large":"https://x/large.png","slug":"pepe","price_btc":1.2e-10,"score":0}},{"item":{"id":"unranked","name":"Unranked","symbol":"unr","score":1}}],"nfts":[]}"#,
        )
        .unwrap();
        let coins: Vec<TrendingCoin> = envelope.coins.into_iter().map(|e| TrendingCoin::from(e.item)).collect();

        assert_eq!(coins[0].symbol, "PEPE");
        assert_eq!(coins[0].coin_id, Some(29_850));
        assert_eq!(coins[0].market_cap_rank, Some(24));
        assert_eq!(coins[1].market_cap_rank, None);
        assert!(coins[1].thumb.is_none());
        assert_eq!(coins[1].score, 1);
    }
}
