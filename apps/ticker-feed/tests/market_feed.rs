//! Market Feed Integration Tests
//!
//! Drives the shared feed end to end: REST seeding, live frames over a local
//! WebSocket server, connection sharing and refcounted teardown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

use ticker_feed::{
    ConnectionState, MarketFeed, MarketFeedConfig, PriceSnapshot, ReconnectConfig,
    SnapshotProvider, SnapshotSource, StreamClient, StreamClientConfig, SymbolRegistry,
    TickerSnapshot, TickerStore, TickerStoreConfig,
};

const WAIT: Duration = Duration::from_secs(5);

type ServerConn = (String, WebSocketStream<TcpStream>);

async fn setup_ws_server() -> (String, mpsc::UnboundedReceiver<ServerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut path = String::new();
                let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    path = req.uri().path().to_string();
                    Ok(resp)
                };
                let accepted = accept_hdr_async(stream, callback).await;
                if let Ok(ws) = accepted {
                    let _ = tx.send((path, ws));
                }
            });
        }
    });

    (format!("ws://{addr}/ws"), rx)
}

/// Fixed REST snapshots with a call counter.
#[derive(Default)]
struct StubSnapshots {
    prices: BTreeMap<String, f64>,
    calls: AtomicUsize,
}

impl StubSnapshots {
    fn with_prices(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices.iter().map(|(s, p)| ((*s).to_string(), *p)).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SnapshotProvider for StubSnapshots {
    async fn fetch_snapshots(&self, symbols: &[String]) -> BTreeMap<String, PriceSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        symbols
            .iter()
            .filter_map(|symbol| {
                let price = *self.prices.get(symbol)?;
                Some((
                    symbol.clone(),
                    PriceSnapshot {
                        price,
                        change_24h: 0.0,
                        change_percent_24h: 0.0,
                        high_24h: price,
                        low_24h: price,
                        volume_24h: 1.0,
                        quote_volume_24h: price,
                        as_of: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
                    },
                ))
            })
            .collect()
    }
}

fn setup_feed(url: &str, snapshots: Arc<StubSnapshots>) -> Arc<MarketFeed> {
    setup_feed_with(
        url,
        snapshots,
        MarketFeedConfig {
            fallback_interval: Duration::from_secs(60),
        },
    )
}

fn setup_feed_with(url: &str, snapshots: Arc<StubSnapshots>, config: MarketFeedConfig) -> Arc<MarketFeed> {
    let client = StreamClient::new(StreamClientConfig {
        reconnect: ReconnectConfig::fixed(Duration::from_millis(50)),
        ..StreamClientConfig::new(url)
    });
    MarketFeed::new(
        Arc::new(SymbolRegistry::default()),
        Arc::new(TickerStore::new(TickerStoreConfig::default())),
        client,
        snapshots,
        config,
    )
}

fn ticker_frame(symbol: &str, price: f64) -> Message {
    Message::text(format!(
        r#"{{"e":"24hrTicker","E":1700000000123,"s":"{symbol}","p":"1.5","P":"0.2","o":"{open}","c":"{price}","h":"{price}","l":"{price}","v":"100","q":"5000"}}"#,
        open = price - 1.5,
    ))
}

async fn next_connection(server: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    timeout(WAIT, server.recv())
        .await
        .expect("no connection attempt")
        .expect("server stopped")
}

/// Wait until the server side sees the client go away.
async fn wait_closed(ws: &mut WebSocketStream<TcpStream>) {
    timeout(WAIT, async {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await
    .expect("connection was not closed");
}

#[tokio::test]
async fn test_attach_seeds_from_rest_then_goes_live() {
    let (url, mut server) = setup_ws_server().await;
    let snapshots = Arc::new(StubSnapshots::with_prices(&[("BTCUSDT", 49_000.0)]));
    let feed = setup_feed(&url, Arc::clone(&snapshots));

    let mut lease = feed.attach(["btcusdt"]).await.unwrap();
    let seeded = lease.snapshot("BTCUSDT").unwrap();
    assert_eq!(seeded.source, SnapshotSource::Rest);
    assert!((seeded.price - 49_000.0).abs() < f64::EPSILON);
    assert_eq!(snapshots.calls.load(Ordering::SeqCst), 1);

    let (tx, mut rx) = mpsc::unbounded_channel::<TickerSnapshot>();
    lease.on_update(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });

    let (path, mut ws) = next_connection(&mut server).await;
    assert_eq!(path, "/ws/btcusdt@ticker");

    ws.send(ticker_frame("BTCUSDT", 50_000.0)).await.unwrap();
    let live = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(live.source, SnapshotSource::Stream);
    assert!((live.price - 50_000.0).abs() < f64::EPSILON);
    assert_eq!(lease.store().snapshot("BTCUSDT").unwrap(), live);

    lease.detach();
    wait_closed(&mut ws).await;
}

#[tokio::test]
async fn test_consumers_share_one_connection() {
    let (url, mut server) = setup_ws_server().await;
    let snapshots = Arc::new(StubSnapshots::with_prices(&[("ETHUSDT", 3_000.0)]));
    let feed = setup_feed(&url, Arc::clone(&snapshots));

    let first = feed.attach(["ETHUSDT"]).await.unwrap();
    let connection = feed.connection_id();
    let second = feed.attach(["ETHUSDT"]).await.unwrap();

    assert!(connection.is_some());
    assert_eq!(feed.connection_id(), connection);
    assert_eq!(feed.refcount("ETHUSDT"), 2);
    assert_eq!(feed.consumer_count(), 2);
    // Second attach found the symbol already loaded
    assert_eq!(snapshots.calls.load(Ordering::SeqCst), 1);

    let (_, mut ws) = next_connection(&mut server).await;

    drop(first);
    assert_eq!(feed.refcount("ETHUSDT"), 1);
    assert_eq!(feed.connection_id(), connection);
    assert!(timeout(Duration::from_millis(200), server.recv()).await.is_err());

    drop(second);
    assert_eq!(feed.connection_id(), None);
    assert_eq!(feed.connection_state(), ConnectionState::Disconnected);
    wait_closed(&mut ws).await;
}

#[tokio::test]
async fn test_connection_follows_symbol_union() {
    let (url, mut server) = setup_ws_server().await;
    let feed = setup_feed(&url, Arc::new(StubSnapshots::default()));

    let btc = feed.attach(["BTCUSDT"]).await.unwrap();
    let (path, mut btc_only) = next_connection(&mut server).await;
    assert_eq!(path, "/ws/btcusdt@ticker");

    let eth = feed.attach(["ETHUSDT"]).await.unwrap();
    assert_eq!(feed.active_symbols(), vec!["BTCUSDT", "ETHUSDT"]);
    let (path, mut union) = next_connection(&mut server).await;
    assert_eq!(path, "/ws/btcusdt@ticker/ethusdt@ticker");
    wait_closed(&mut btc_only).await;

    drop(eth);
    assert_eq!(feed.active_symbols(), vec!["BTCUSDT"]);
    let (path, _narrowed) = next_connection(&mut server).await;
    assert_eq!(path, "/ws/btcusdt@ticker");
    wait_closed(&mut union).await;

    drop(btc);
    assert!(feed.active_symbols().is_empty());
}

#[tokio::test]
async fn test_unknown_symbols_attach_nothing() {
    let (url, mut server) = setup_ws_server().await;
    let feed = setup_feed(&url, Arc::new(StubSnapshots::default()));

    assert!(feed.attach(["BTCUSDT", "NOPEUSDT"]).await.is_err());
    assert!(feed.attach(Vec::<&str>::new()).await.is_err());

    assert_eq!(feed.consumer_count(), 0);
    assert_eq!(feed.connection_id(), None);
    assert!(timeout(Duration::from_millis(200), server.recv()).await.is_err());
}

#[tokio::test]
async fn test_zero_fallback_interval_still_goes_live() {
    let (url, mut server) = setup_ws_server().await;
    let feed = setup_feed_with(
        &url,
        Arc::new(StubSnapshots::default()),
        MarketFeedConfig {
            fallback_interval: Duration::ZERO,
        },
    );

    let lease = feed.attach(["btcusdt"]).await.unwrap();
    let (_, _ws) = next_connection(&mut server).await;

    timeout(WAIT, async {
        while feed.store().connection_state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("store never saw the stream connect");
    assert!(lease.store().is_live());
}
