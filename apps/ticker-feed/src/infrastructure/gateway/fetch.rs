//! Shared upstream request plumbing for the REST providers.

use std::time::Instant;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::infrastructure::metrics;

/// Longest upstream error body kept in an error.
const MAX_ERROR_BODY: usize = 256;

/// Upstream REST provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Binance spot REST API (snapshots).
    Binance,
    /// CryptoCompare data API (history, price matrix).
    CryptoCompare,
    /// CoinGecko API (market list).
    CoinGecko,
}

impl Provider {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::CryptoCompare => "cryptocompare",
            Self::CoinGecko => "coingecko",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a single upstream request.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport failure (DNS, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status code.
    #[error("upstream returned {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Truncated response body.
        body: String,
    },

    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Provider answered with an application-level error.
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl ProviderError {
    /// Short error class for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::Upstream(_) => "upstream",
        }
    }
}

/// Send `request` and decode a JSON body, recording fetch latency.
///
/// # Errors
///
/// Returns `ProviderError` on transport failure, non-2xx status, or a body
/// that does not decode into `T`.
pub async fn send_json<T: DeserializeOwned>(
    provider: Provider,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let started = Instant::now();
    let result = send_inner(request).await;
    metrics::record_gateway_fetch(provider.as_str(), started.elapsed());

    if let Err(e) = &result {
        tracing::debug!(provider = %provider, kind = e.kind(), error = %e, "Upstream request failed");
    }
    result
}

async fn send_inner<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let mut body = text;
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(ProviderError::Status { status, body });
    }

    serde_json::from_str(&text).map_err(|e| ProviderError::Decode(e.to_string()))
}
