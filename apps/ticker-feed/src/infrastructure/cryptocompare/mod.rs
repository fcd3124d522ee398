//! CryptoCompare Client
//!
//! Hourly/daily OHLCV history and the multi-symbol price matrix.
//!
//! Requests carry `authorization: Apikey <key>` when a key is configured.
//! The price matrix works without one; callers gate history on
//! [`CryptoCompareClient::has_api_key`].

use std::collections::BTreeMap;

use chrono::DateTime;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use crate::domain::market::{Granularity, OhlcvPoint};
use crate::infrastructure::gateway::fetch::{self, Provider, ProviderError};

/// Default CryptoCompare data API base URL.
pub const DEFAULT_API_URL: &str = "https://min-api.cryptocompare.com/data";

/// API key with redacted debug output.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key; blank input yields `None`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into().trim().to_string();
        (!key.is_empty()).then_some(Self(key))
    }

    fn header_value(&self) -> String {
        format!("Apikey {}", self.0)
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryEnvelope {
    response: Option<String>,
    message: Option<String>,
    data: Option<HistoryData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryData {
    #[serde(default)]
    data: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candle {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volumefrom: f64,
    #[serde(default)]
    volumeto: f64,
}

impl Candle {
    fn into_point(self) -> Option<OhlcvPoint> {
        let values = [self.open, self.high, self.low, self.close, self.volumefrom, self.volumeto];
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(OhlcvPoint {
            time: DateTime::from_timestamp(self.time, 0)?,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume_from: self.volumefrom,
            volume_to: self.volumeto,
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// CryptoCompare data API client.
#[derive(Debug, Clone)]
pub struct CryptoCompareClient {
    client: Client,
    base_url: String,
    api_key: Option<ApiKey>,
}

impl CryptoCompareClient {
    /// Create a client sharing `client`'s connection pool.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<ApiKey>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Whether requests are authenticated.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}/{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.header("authorization", key.header_value()),
            None => request,
        }
    }

    /// OHLCV candles for `base`/`quote`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` on transport failure or when the provider
    /// reports `"Response": "Error"`.
    pub async fn history(
        &self,
        base: &str,
        quote: &str,
        granularity: Granularity,
        limit: u32,
    ) -> Result<Vec<OhlcvPoint>, ProviderError> {
        let endpoint = match granularity {
            Granularity::Hourly => "histohour",
            Granularity::Daily => "histoday",
        };
        let request = self.get(&format!("v2/{endpoint}")).query(&[
            ("fsym", base.to_string()),
            ("tsym", quote.to_string()),
            ("limit", limit.to_string()),
        ]);

        let envelope: HistoryEnvelope = fetch::send_json(Provider::CryptoCompare, request).await?;
        if envelope.response.as_deref() == Some("Error") {
            return Err(ProviderError::Upstream(
                envelope.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let mut points: Vec<OhlcvPoint> = envelope
            .data
            .map(|data| data.data)
            .unwrap_or_default()
            .into_iter()
            .filter_map(Candle::into_point)
            .collect();
        points.sort_by_key(|point| point.time);
        Ok(points)
    }

    /// Current prices for every `base` in every `quote`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` on transport failure or an error envelope.
    pub async fn price_multi(
        &self,
        bases: &[String],
        quotes: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, f64>>, ProviderError> {
        let request = self
            .get("pricemulti")
            .query(&[("fsyms", bases.join(",")), ("tsyms", quotes.join(","))]);

        let value: serde_json::Value = fetch::send_json(Provider::CryptoCompare, request).await?;
        if value.get("Response").and_then(serde_json::Value::as_str) == Some("Error") {
            let message = value
                .get("Message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error");
            return Err(ProviderError::Upstream(message.to_string()));
        }

        let matrix: BTreeMap<String, BTreeMap<String, f64>> =
            serde_json::from_value(value).map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(matrix
            .into_iter()
            .map(|(base, prices)| {
                let prices = prices.into_iter().filter(|(_, p)| p.is_finite()).collect();
                (base, prices)
            })
            .collect())
    }
}
