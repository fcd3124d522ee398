//! REST Gateway Integration Tests
//!
//! Exercises the cached gateway against mocked Binance, CryptoCompare and
//! CoinGecko endpoints.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ticker_feed::{
    Granularity, GatewayConfig, HistoryResult, RestPriceGateway, SymbolRegistry, Unavailable,
};
use ticker_feed::infrastructure::cryptocompare::ApiKey;

fn setup_gateway(server: &MockServer, api_key: Option<&str>, ttl: Duration) -> RestPriceGateway {
    let config = GatewayConfig {
        binance_url: server.uri(),
        cryptocompare_url: server.uri(),
        cryptocompare_api_key: api_key.and_then(ApiKey::new),
        coingecko_url: server.uri(),
        http_timeout: Duration::from_secs(2),
        snapshot_ttl: ttl,
        history_hourly_ttl: ttl,
        history_daily_ttl: ttl,
        market_list_ttl: ttl,
        current_price_ttl: ttl,
        coin_chart_ttl: ttl,
        trending_ttl: ttl,
    };
    RestPriceGateway::new(config, Arc::new(SymbolRegistry::default())).unwrap()
}

fn binance_ticker(symbol: &str, price: &str) -> serde_json::Value {
    json!({
        "symbol": symbol,
        "lastPrice": price,
        "priceChange": "10.0",
        "priceChangePercent": "0.5",
        "highPrice": "60000",
        "lowPrice": "1",
        "volume": "100",
        "quoteVolume": "5000000",
        "closeTime": 1_700_000_000_000_i64,
    })
}

fn history_body() -> serde_json::Value {
    json!({
        "Response": "Success",
        "Message": "",
        "Data": {
            "Aggregated": false,
            "TimeFrom": 1_700_000_000,
            "TimeTo": 1_700_003_600,
            "Data": [
                {"time": 1_700_003_600, "open": 2.0, "high": 3.0, "low": 1.5, "close": 2.5, "volumefrom": 10.0, "volumeto": 25.0},
                {"time": 1_700_000_000, "open": 1.0, "high": 2.0, "low": 1.0, "close": 2.0, "volumefrom": 5.0, "volumeto": 10.0}
            ]
        }
    })
}

#[tokio::test]
async fn test_snapshot_serves_stale_value_when_upstream_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ticker/24hr"))
        .and(query_param("symbols", r#"["BTCUSDT","ETHUSDT"]"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            binance_ticker("BTCUSDT", "50000.0"),
            binance_ticker("ETHUSDT", "3000.0"),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ticker/24hr"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    // Zero TTL: every call goes upstream
    let gateway = setup_gateway(&server, None, Duration::ZERO);

    let first = gateway.get_snapshot(&["ETHUSDT", "BTCUSDT"]).await;
    assert_eq!(first.len(), 2);
    assert!((first["BTCUSDT"].price - 50_000.0).abs() < f64::EPSILON);

    let second = gateway.get_snapshot(&["BTCUSDT", "ETHUSDT"]).await;
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_snapshot_failure_without_cache_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ticker/24hr"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, None, Duration::from_secs(30));
    assert!(gateway.get_snapshot(&["BTCUSDT"]).await.is_empty());
}

#[tokio::test]
async fn test_snapshot_filters_unknown_symbols_before_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ticker/24hr"))
        .and(query_param("symbols", r#"["SOLUSDT"]"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            binance_ticker("SOLUSDT", "150.0"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, None, Duration::from_secs(30));

    assert!(gateway.get_snapshot(&["FAKEUSDT"]).await.is_empty());
    let snapshots = gateway.get_snapshot(&["FAKEUSDT", "SOLUSDT"]).await;
    assert_eq!(snapshots.keys().collect::<Vec<_>>(), ["SOLUSDT"]);
}

#[tokio::test]
async fn test_history_is_cached_within_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/histohour"))
        .and(query_param("fsym", "BTC"))
        .and(query_param("tsym", "USD"))
        .and(query_param("limit", "24"))
        .and(header("authorization", "Apikey test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, Some("test-key"), Duration::from_secs(60));

    let first = gateway.get_history("BTCUSDT", "usd", Granularity::Hourly, 24).await;
    let HistoryResult::Points(points) = &first else {
        panic!("expected points, got {first:?}");
    };
    assert_eq!(points.len(), 2);
    assert!(points[0].time < points[1].time);

    // Base asset and pair resolve to the same cache entry
    let second = gateway.get_history("btc", "USD", Granularity::Hourly, 24).await;
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_history_without_key_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v2/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body()))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, None, Duration::from_secs(60));
    assert_eq!(
        gateway.get_history("ETH", "USD", Granularity::Daily, 30).await,
        HistoryResult::Unavailable(Unavailable::MissingApiKey)
    );
}

#[tokio::test]
async fn test_history_error_envelope_yields_empty_points() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/histoday"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Response": "Error",
            "Message": "rate limit exceeded",
            "Data": {}
        })))
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, Some("test-key"), Duration::from_secs(60));
    assert_eq!(
        gateway.get_history("ETH", "USD", Granularity::Daily, 30).await,
        HistoryResult::Points(Vec::new())
    );
}

#[tokio::test]
async fn test_market_list_query_and_clamping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/markets"))
        .and(query_param("vs_currency", "usd"))
        .and(query_param("order", "market_cap_desc"))
        .and(query_param("per_page", "250"))
        .and(query_param("page", "1"))
        .and(query_param("sparkline", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "bitcoin",
                "symbol": "btc",
                "name": "Bitcoin",
                "image": "https://example.com/btc.png",
                "current_price": 50000.0,
                "market_cap": 1.0e12,
                "total_volume": 3.0e10,
                "price_change_percentage_24h": 1.5,
                "sparkline_in_7d": {"price": [49000.0, 50000.0]}
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, None, Duration::from_secs(60));
    let coins = gateway.get_market_list(0, 10_000).await;

    assert_eq!(coins.len(), 1);
    assert_eq!(coins[0].symbol, "BTC");
    assert_eq!(coins[0].sparkline, vec![49_000.0, 50_000.0]);
}

#[tokio::test]
async fn test_current_prices_matrix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pricemulti"))
        .and(query_param("fsyms", "BTC,ETH"))
        .and(query_param("tsyms", "EUR,USD"))
        .and(header("authorization", "Apikey test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "BTC": {"USD": 50000.0, "EUR": 46000.0},
            "ETH": {"USD": 3000.0, "EUR": 2760.0}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, Some("test-key"), Duration::from_secs(30));
    let prices = gateway
        .get_current_prices(&["eth", "BTC", "btc"], &["usd", "EUR", "$$"])
        .await;

    assert_eq!(prices.len(), 2);
    assert!((prices["ETH"]["USD"] - 3_000.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_current_prices_without_key_are_unauthenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pricemulti"))
        .and(query_param("fsyms", "BTC"))
        .and(query_param("tsyms", "USD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "BTC": {"USD": 50000.0}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, None, Duration::from_secs(30));
    assert!(!gateway.history_enabled());

    let prices = gateway.get_current_prices(&["btc"], &["usd"]).await;
    assert!((prices["BTC"]["USD"] - 50_000.0).abs() < f64::EPSILON);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_coin_chart_is_cached_per_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/bitcoin/market_chart"))
        .and(query_param("vs_currency", "usd"))
        .and(query_param("days", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "prices": [[1_700_086_400_000_i64, 51_000.0], [1_700_000_000_000_i64, 50_000.0]],
            "market_caps": [[1_700_000_000_000_i64, 1.0e12]],
            "total_volumes": [[1_700_000_000_000_i64, 3.0e10]]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/coins/bitcoin/market_chart"))
        .and(query_param("days", "max"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prices": []})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, None, Duration::from_secs(300));

    let chart = gateway.get_coin_chart("Bitcoin", "7").await;
    assert_eq!(chart.len(), 2);
    assert!(chart[0].time < chart[1].time);
    assert!((chart[0].price - 50_000.0).abs() < f64::EPSILON);

    assert_eq!(gateway.get_coin_chart("bitcoin", " 7 ").await, chart);
    assert!(gateway.get_coin_chart("bitcoin", "MAX").await.is_empty());
}

#[tokio::test]
async fn test_trending_serves_stale_list_when_upstream_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/trending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "coins": [
                {"item": {"id": "pepe", "coin_id": 29850, "name": "Pepe", "symbol": "pepe", "market_cap_rank": 24, "thumb": "https://example.com/pepe.png", "price_btc": 1.2e-10, "score": 0}},
                {"item": {"id": "sui", "coin_id": 26375, "name": "Sui", "symbol": "sui", "market_cap_rank": 19, "score": 1}}
            ],
            "nfts": [],
            "categories": []
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/trending"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let gateway = setup_gateway(&server, None, Duration::ZERO);

    let first = gateway.get_trending().await;
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].symbol, "PEPE");
    assert_eq!(first[1].market_cap_rank, Some(19));

    assert_eq!(gateway.get_trending().await, first);
}
