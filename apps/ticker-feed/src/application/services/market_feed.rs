//! Market Feed
//!
//! Shares one upstream stream connection among any number of consumers.
//!
//! Each [`MarketFeed::attach`] call returns a [`FeedLease`]. The feed keeps a
//! per-symbol refcount across all live leases and keeps exactly one
//! connection open for the union of their symbols:
//!
//! ```text
//! attach(BTC)       union {BTC}        open  btcusdt@ticker
//! attach(BTC, ETH)  union {BTC, ETH}   reopen btcusdt@ticker/ethusdt@ticker
//! drop lease 2      union {BTC}        reopen btcusdt@ticker
//! drop lease 1      union {}           close, stop fallback polling
//! ```
//!
//! While the stream is not `Connected`, a supervisor task polls REST
//! snapshots on a fixed interval and feeds them through the store's
//! fallback gate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::ticker_store::{StoreSubscription, TickerStore};
use crate::application::ports::SnapshotProvider;
use crate::domain::subscription::{ConsumerId, ConsumerTable};
use crate::domain::symbols::{SubscriptionSet, SymbolError, SymbolRegistry};
use crate::domain::ticker::{ConnectionState, PriceDelta, TickerSnapshot};
use crate::infrastructure::binance::{ListenerId, StreamClient, StreamHandle, StreamStatsSnapshot};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Shortest REST poll interval the supervisor will run.
const MIN_FALLBACK_INTERVAL: Duration = Duration::from_secs(1);

/// Feed configuration.
#[derive(Debug, Clone)]
pub struct MarketFeedConfig {
    /// REST poll interval while the stream is down. Floored at one second.
    pub fallback_interval: Duration,
}

impl Default for MarketFeedConfig {
    fn default() -> Self {
        Self {
            fallback_interval: Duration::from_secs(30),
        }
    }
}

/// Errors returned by [`MarketFeed::attach`].
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Requested symbols failed validation.
    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

// =============================================================================
// Market Feed
// =============================================================================

struct ActiveConnection {
    handle: StreamHandle,
    supervisor: CancellationToken,
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.supervisor.cancel();
        self.handle.close();
    }
}

#[derive(Default)]
struct FeedInner {
    table: ConsumerTable,
    connection: Option<ActiveConnection>,
}

/// Process-wide owner of the stream connection and the ticker store.
pub struct MarketFeed {
    registry: Arc<SymbolRegistry>,
    store: Arc<TickerStore>,
    client: StreamClient,
    snapshots: Arc<dyn SnapshotProvider>,
    config: MarketFeedConfig,
    listener: ListenerId,
    next_consumer: AtomicU64,
    inner: Mutex<FeedInner>,
}

impl std::fmt::Debug for MarketFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MarketFeed")
            .field("consumers", &inner.table.stats().consumer_count)
            .field(
                "connection",
                &inner.connection.as_ref().map(|c| c.handle.id()),
            )
            .finish_non_exhaustive()
    }
}

impl MarketFeed {
    /// Create a feed and route the client's updates into `store`.
    #[must_use]
    pub fn new(
        registry: Arc<SymbolRegistry>,
        store: Arc<TickerStore>,
        client: StreamClient,
        snapshots: Arc<dyn SnapshotProvider>,
        config: MarketFeedConfig,
    ) -> Arc<Self> {
        let sink = Arc::clone(&store);
        let listener = client.on_update(move |update| {
            let outcome = sink.ingest(update);
            metrics::record_ingest(outcome.as_str());
        });

        Arc::new(Self {
            registry,
            store,
            client,
            snapshots,
            config,
            listener,
            next_consumer: AtomicU64::new(1),
            inner: Mutex::new(FeedInner::default()),
        })
    }

    /// Attach a consumer for `symbols`.
    ///
    /// Opens or widens the shared connection if needed, then seeds any
    /// requested symbol that has no value yet from REST. The lease is live
    /// before seeding starts, so dropping this future mid-seed still
    /// releases the consumer.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Symbol` if any symbol is unknown or the list is
    /// empty; nothing is attached in that case.
    pub async fn attach<'a, I>(self: &Arc<Self>, symbols: I) -> Result<FeedLease, FeedError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let set = self.registry.subscription_set(symbols)?;
        let consumer = self.next_consumer.fetch_add(1, Ordering::Relaxed);

        {
            let mut inner = self.inner.lock();
            let change = inner.table.attach(consumer, set.symbols().iter().cloned());
            if !change.is_empty() {
                self.reconcile(&mut inner);
            }
            metrics::set_consumers(inner.table.stats().consumer_count);
        }

        tracing::info!(
            consumer_id = consumer,
            symbols = ?set.symbols(),
            "Consumer attached"
        );

        let lease = FeedLease {
            feed: Arc::clone(self),
            consumer,
            set,
            subscriptions: Vec::new(),
            released: false,
        };

        let missing: Vec<String> = lease
            .set
            .symbols()
            .iter()
            .filter(|symbol| self.store.snapshot(symbol).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            self.seed(&missing).await;
        }

        Ok(lease)
    }

    /// Release `consumer`'s symbols. Returns `false` if it was not attached.
    pub fn detach(&self, consumer: ConsumerId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.table.is_attached(consumer) {
            return false;
        }

        let change = inner.table.detach(consumer);
        if !change.is_empty() {
            self.reconcile(&mut inner);
        }
        metrics::set_consumers(inner.table.stats().consumer_count);
        drop(inner);

        tracing::info!(consumer_id = consumer, "Consumer detached");
        true
    }

    /// Shared ticker store.
    #[must_use]
    pub const fn store(&self) -> &Arc<TickerStore> {
        &self.store
    }

    /// Symbol allow-list.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SymbolRegistry> {
        &self.registry
    }

    /// Symbols carried by the open connection, empty when closed.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<String> {
        self.inner
            .lock()
            .connection
            .as_ref()
            .map(|c| c.handle.subscription_set().symbols().to_vec())
            .unwrap_or_default()
    }

    /// Number of leases holding `symbol`.
    #[must_use]
    pub fn refcount(&self, symbol: &str) -> usize {
        self.inner.lock().table.refcount(symbol)
    }

    /// Number of attached consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.inner.lock().table.stats().consumer_count
    }

    /// Identifier of the open connection, if any.
    #[must_use]
    pub fn connection_id(&self) -> Option<u64> {
        self.inner.lock().connection.as_ref().map(|c| c.handle.id())
    }

    /// State of the open connection; `Disconnected` when none is open.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner
            .lock()
            .connection
            .as_ref()
            .map_or(ConnectionState::Disconnected, |c| c.handle.state())
    }

    /// Stream client counters.
    #[must_use]
    pub fn stream_stats(&self) -> StreamStatsSnapshot {
        self.client.stats()
    }

    /// Bring the connection in line with the refcount table. Runs under the
    /// inner lock so concurrent attach/detach calls cannot interleave opens.
    fn reconcile(&self, inner: &mut FeedInner) {
        let active = inner.table.active_symbols();
        if active.is_empty() {
            if let Some(connection) = inner.connection.take() {
                tracing::info!(connection_id = connection.handle.id(), "Last consumer gone, closing stream");
                drop(connection);
                self.store.observe_connection(ConnectionState::Disconnected);
            }
            return;
        }

        let set = match self.registry.subscription_set(active.iter().map(String::as_str)) {
            Ok(set) => set,
            Err(e) => {
                tracing::error!(error = %e, "Attached symbols failed validation");
                return;
            }
        };

        if inner
            .connection
            .as_ref()
            .is_some_and(|c| c.handle.subscription_set() == &set)
        {
            return;
        }

        // Without a runtime (e.g. a lease dropped during shutdown) the
        // current connection, a superset, stays in place.
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!("No runtime available, keeping current stream");
            return;
        }

        // Close the old connection first so its final state cannot land
        // after the new connection has reported its own.
        if let Some(previous) = inner.connection.take() {
            tracing::debug!(connection_id = previous.handle.id(), "Replacing ticker stream");
            drop(previous);
        }

        let handle = self.client.open(set);
        let supervisor = CancellationToken::new();
        tracing::info!(
            connection_id = handle.id(),
            symbols = ?handle.subscription_set().symbols(),
            "Opening shared ticker stream"
        );

        tokio::spawn(supervise(
            Arc::clone(&self.store),
            Arc::clone(&self.snapshots),
            handle.subscription_set().symbols().to_vec(),
            handle.state_changes(),
            supervisor.clone(),
            self.config.fallback_interval,
        ));

        inner.connection = Some(ActiveConnection { handle, supervisor });
    }

    async fn seed(&self, symbols: &[String]) {
        let snapshots = self.snapshots.fetch_snapshots(symbols).await;
        let mut seeded = 0_usize;
        for (symbol, snapshot) in snapshots {
            if !symbols.contains(&symbol) {
                continue;
            }
            let outcome = self.store.seed(&snapshot.to_update(&symbol));
            metrics::record_ingest(outcome.as_str());
            if outcome.is_applied() {
                seeded += 1;
            }
        }
        tracing::debug!(requested = symbols.len(), seeded, "Seeded store from REST");
    }
}

impl Drop for MarketFeed {
    fn drop(&mut self) {
        self.client.remove_listener(self.listener);
    }
}

/// Mirror connection state into the store and poll REST while not live.
async fn supervise(
    store: Arc<TickerStore>,
    snapshots: Arc<dyn SnapshotProvider>,
    symbols: Vec<String>,
    mut state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    fallback_interval: Duration,
) {
    store.observe_connection(*state_rx.borrow_and_update());

    let period = fallback_interval.max(MIN_FALLBACK_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = state_rx.changed() => {
                if changed.is_err() || cancel.is_cancelled() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                store.observe_connection(state);
                tracing::info!(state = state.as_str(), "Ticker stream state changed");
            }
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    break;
                }
                store.observe_connection(*state_rx.borrow());
                if store.is_live() {
                    continue;
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = poll_fallback(&store, snapshots.as_ref(), &symbols) => {}
                }
            }
        }
    }
}

async fn poll_fallback(store: &TickerStore, snapshots: &dyn SnapshotProvider, symbols: &[String]) {
    let fetched = snapshots.fetch_snapshots(symbols).await;
    let mut applied = 0_usize;
    for (symbol, snapshot) in &fetched {
        if !symbols.contains(symbol) {
            continue;
        }
        let outcome = store.apply_fallback(&snapshot.to_update(symbol));
        metrics::record_ingest(outcome.as_str());
        if outcome.is_applied() {
            applied += 1;
        }
    }
    tracing::debug!(fetched = fetched.len(), applied, "Fallback poll complete");
}

// =============================================================================
// Lease
// =============================================================================

/// A consumer's attachment to the feed. Dropping it detaches.
pub struct FeedLease {
    feed: Arc<MarketFeed>,
    consumer: ConsumerId,
    set: SubscriptionSet,
    subscriptions: Vec<StoreSubscription>,
    released: bool,
}

impl std::fmt::Debug for FeedLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedLease")
            .field("consumer", &self.consumer)
            .field("symbols", &self.set.symbols())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl FeedLease {
    /// Consumer identifier.
    #[must_use]
    pub const fn consumer_id(&self) -> ConsumerId {
        self.consumer
    }

    /// Symbols this lease holds, in registry order.
    #[must_use]
    pub fn symbols(&self) -> &[String] {
        self.set.symbols()
    }

    /// The feed's shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<TickerStore> {
        self.feed.store()
    }

    /// Latest snapshot for one of this lease's symbols.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<TickerSnapshot> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if !self.set.contains(&symbol) {
            return None;
        }
        self.feed.store.snapshot(&symbol)
    }

    /// Latest snapshots for this lease's symbols that have data.
    #[must_use]
    pub fn snapshots(&self) -> BTreeMap<String, TickerSnapshot> {
        self.set
            .symbols()
            .iter()
            .filter_map(|symbol| {
                self.feed
                    .store
                    .snapshot(symbol)
                    .map(|snapshot| (symbol.clone(), snapshot))
            })
            .collect()
    }

    /// Current flash direction for one of this lease's symbols.
    #[must_use]
    pub fn delta(&self, symbol: &str) -> PriceDelta {
        let symbol = symbol.trim().to_ascii_uppercase();
        if !self.set.contains(&symbol) {
            return PriceDelta::None;
        }
        self.feed.store.delta(&symbol)
    }

    /// Call `callback` for every applied update to this lease's symbols,
    /// until the lease is released.
    pub fn on_update<F>(&mut self, callback: F)
    where
        F: Fn(&TickerSnapshot) + Send + Sync + 'static,
    {
        let set = self.set.clone();
        let subscription = self.feed.store.subscribe(move |snapshot| {
            if set.contains(&snapshot.symbol) {
                callback(snapshot);
            }
        });
        self.subscriptions.push(subscription);
    }

    /// State of the shared connection.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.feed.connection_state()
    }

    /// Release the lease now.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.subscriptions.clear();
        self.feed.detach(self.consumer);
    }
}

impl Drop for FeedLease {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Tests
// =============================================================================
