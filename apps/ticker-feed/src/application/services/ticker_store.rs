//! Ticker Store
//!
//! The single in-process source of truth for the latest price per symbol.
//!
//! # Write rules
//!
//! - An update is applied only if its `last_update` is `>=` the stored one.
//! - Invalid values (non-finite, `price <= 0`) are rejected without touching state.
//! - REST seeds only fill symbols that have no value yet.
//! - REST fallback writes are ignored while the stream is connected.
//!
//! Subscribers are called after the entry lock is released, with a clone of
//! the fully-applied snapshot. Writes and their notifications are serialized,
//! so every subscriber sees applied snapshots in apply order even with
//! several writers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{ReentrantMutex, RwLock};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use crate::domain::ticker::{
    ConnectionState, PriceDelta, SnapshotSource, TickerSnapshot, TickerUpdate,
};

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration.
#[derive(Debug, Clone)]
pub struct TickerStoreConfig {
    /// How long an up/down flash stays visible after a price move.
    pub flash_window: Duration,
    /// Capacity of the async update broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for TickerStoreConfig {
    fn default() -> Self {
        Self {
            flash_window: Duration::from_millis(500),
            broadcast_capacity: 1024,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of offering an update to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The update was written and subscribers were notified.
    Applied,
    /// Older than the stored value; ignored.
    Stale,
    /// Failed numeric validation; ignored.
    Rejected,
    /// Not applicable in the current state (seed over existing data,
    /// fallback while live).
    Skipped,
}

impl IngestOutcome {
    /// Stable label for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Stale => "stale",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }

    /// Whether the store changed.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Stream,
    Seed,
    Fallback,
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Flash {
    direction: PriceDelta,
    at: Instant,
}

#[derive(Debug)]
struct Entry {
    snapshot: TickerSnapshot,
    flash: Option<Flash>,
}

/// Identifier of a registered store subscriber.
pub type SubscriberId = u64;

type Callback = Arc<dyn Fn(&TickerSnapshot) + Send + Sync>;
type SubscriberList = RwLock<Vec<(SubscriberId, Callback)>>;

// =============================================================================
// Ticker Store
// =============================================================================

/// Shared latest-value store with flash detection and fan-out.
pub struct TickerStore {
    config: TickerStoreConfig,
    entries: RwLock<HashMap<String, Entry>>,
    // Held from the write through notification. Reentrant so a subscriber
    // may write back into the store.
    publish: ReentrantMutex<()>,
    subscribers: Arc<SubscriberList>,
    next_subscriber: AtomicU64,
    updates_tx: broadcast::Sender<TickerSnapshot>,
    connection: RwLock<ConnectionState>,
}

impl Default for TickerStore {
    fn default() -> Self {
        Self::new(TickerStoreConfig::default())
    }
}

impl std::fmt::Debug for TickerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerStore")
            .field("symbols", &self.entries.read().len())
            .field("subscribers", &self.subscriber_count())
            .field("connection", &*self.connection.read())
            .finish_non_exhaustive()
    }
}

impl TickerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(config: TickerStoreConfig) -> Self {
        let (updates_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            publish: ReentrantMutex::new(()),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_subscriber: AtomicU64::new(1),
            updates_tx,
            connection: RwLock::new(ConnectionState::Disconnected),
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Apply a streamed update if it is not older than the stored value.
    pub fn ingest(&self, update: &TickerUpdate) -> IngestOutcome {
        self.write(update, SnapshotSource::Stream, WriteMode::Stream)
    }

    /// Cold-start seed from REST; only fills symbols with no value yet.
    pub fn seed(&self, update: &TickerUpdate) -> IngestOutcome {
        self.write(update, SnapshotSource::Rest, WriteMode::Seed)
    }

    /// Degraded-mode REST write, ignored while the stream is connected.
    pub fn apply_fallback(&self, update: &TickerUpdate) -> IngestOutcome {
        if self.is_live() {
            return IngestOutcome::Skipped;
        }
        self.write(update, SnapshotSource::Rest, WriteMode::Fallback)
    }

    fn write(
        &self,
        update: &TickerUpdate,
        source: SnapshotSource,
        mode: WriteMode,
    ) -> IngestOutcome {
        if !update.is_valid() {
            return IngestOutcome::Rejected;
        }

        let _publish = self.publish.lock();
        let applied = {
            let mut entries = self.entries.write();
            if let Some(entry) = entries.get_mut(&update.symbol) {
                if mode == WriteMode::Seed {
                    return IngestOutcome::Skipped;
                }
                if update.last_update < entry.snapshot.last_update {
                    return IngestOutcome::Stale;
                }

                let direction = PriceDelta::between(entry.snapshot.price, update.price);
                if direction != PriceDelta::None {
                    entry.flash = Some(Flash {
                        direction,
                        at: Instant::now(),
                    });
                }
                entry.snapshot = TickerSnapshot::from_update(update, source);
                entry.snapshot.clone()
            } else {
                let snapshot = TickerSnapshot::from_update(update, source);
                entries.insert(
                    update.symbol.clone(),
                    Entry {
                        snapshot: snapshot.clone(),
                        flash: None,
                    },
                );
                snapshot
            }
        };

        self.notify(&applied);
        IngestOutcome::Applied
    }

    fn notify(&self, snapshot: &TickerSnapshot) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(snapshot);
        }

        // No receivers is fine.
        let _ = self.updates_tx.send(snapshot.clone());
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Latest snapshot for a symbol; `None` means "not loaded yet".
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<TickerSnapshot> {
        self.entries.read().get(symbol).map(|e| e.snapshot.clone())
    }

    /// Every known snapshot, keyed by symbol.
    #[must_use]
    pub fn snapshot_all(&self) -> BTreeMap<String, TickerSnapshot> {
        self.entries
            .read()
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.snapshot.clone()))
            .collect()
    }

    /// Current flash direction; reverts to `None` once the window elapses.
    #[must_use]
    pub fn delta(&self, symbol: &str) -> PriceDelta {
        self.entries
            .read()
            .get(symbol)
            .and_then(|entry| entry.flash)
            .filter(|flash| flash.at.elapsed() < self.config.flash_window)
            .map_or(PriceDelta::None, |flash| flash.direction)
    }

    /// Number of symbols with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no symbol has a value yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // -------------------------------------------------------------------------
    // Connection observation
    // -------------------------------------------------------------------------

    /// Record the stream connection state.
    pub fn observe_connection(&self, state: ConnectionState) {
        *self.connection.write() = state;
    }

    /// Last observed stream connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.read()
    }

    /// Whether streamed data is currently trusted.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Register a callback invoked after every applied write.
    ///
    /// The callback stays registered until the returned handle is dropped or
    /// [`StoreSubscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, callback: F) -> StoreSubscription
    where
        F: Fn(&TickerSnapshot) + Send + Sync + 'static,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, Arc::new(callback)));
        StoreSubscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
            active: true,
        }
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Async receiver of applied snapshots.
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<TickerSnapshot> {
        self.updates_tx.subscribe()
    }

    /// [`Self::updates`] as a `Stream`; lagged receivers yield an error item.
    #[must_use]
    pub fn update_stream(&self) -> BroadcastStream<TickerSnapshot> {
        BroadcastStream::new(self.updates())
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Registration handle for a store callback; deregisters on drop.
#[derive(Debug)]
pub struct StoreSubscription {
    id: SubscriberId,
    subscribers: Weak<SubscriberList>,
    active: bool,
}

impl StoreSubscription {
    /// Subscriber identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Deregister the callback now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn tick(symbol: &str, price: f64, millis: i64) -> TickerUpdate {
        TickerUpdate {
            symbol: symbol.to_string(),
            price,
            price_change: 10.0,
            price_change_percent: 0.5,
            high_24h: price * 1.01,
            low_24h: price * 0.99,
            volume: 100.0,
            quote_volume: price * 100.0,
            last_update: at(millis),
        }
    }

    #[test]
    fn concurrent_writers_notify_in_apply_order() {
        let store = TickerStore::default();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = store.subscribe(move |snapshot| {
            sink.lock().push(snapshot.last_update);
        });

        let clock = std::sync::atomic::AtomicI64::new(1);
        std::thread::scope(|scope| {
            for worker in 0..4_u32 {
                let store = &store;
                let clock = &clock;
                scope.spawn(move || {
                    for _ in 0..250 {
                        let millis = clock.fetch_add(1, Ordering::SeqCst);
                        let _ = store.ingest(&tick("BTCUSDT", 100.0 + f64::from(worker), millis));
                    }
                });
            }
        });

        let seen = seen.lock();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(seen.last().copied(), store.snapshot("BTCUSDT").map(|s| s.last_update));
    }

    #[tokio::test]
    async fn ingest_scenario_btc_then_eth_absent() {
        let store = TickerStore::default();

        assert_eq!(store.ingest(&tick("BTCUSDT", 50_000.0, 1)), IngestOutcome::Applied);
        assert_eq!(store.ingest(&tick("BTCUSDT", 50_100.0, 2)), IngestOutcome::Applied);

        assert_eq!(store.snapshot("BTCUSDT").unwrap().price, 50_100.0);
        assert_eq!(store.delta("BTCUSDT"), PriceDelta::Up);
        assert!(store.snapshot("ETHUSDT").is_none());
        assert_eq!(store.delta("ETHUSDT"), PriceDelta::None);
    }

    #[test]
    fn out_of_order_update_leaves_snapshot_unchanged() {
        let store = TickerStore::default();
        store.ingest(&tick("ETHUSDT", 3_000.0, 20));

        let before = store.snapshot("ETHUSDT").unwrap();
        assert_eq!(store.ingest(&tick("ETHUSDT", 2_900.0, 19)), IngestOutcome::Stale);
        assert_eq!(store.snapshot("ETHUSDT").unwrap(), before);
    }

    #[test]
    fn equal_timestamp_is_applied() {
        let store = TickerStore::default();
        store.ingest(&tick("ETHUSDT", 3_000.0, 20));
        assert_eq!(store.ingest(&tick("ETHUSDT", 3_001.0, 20)), IngestOutcome::Applied);
        assert_eq!(store.snapshot("ETHUSDT").unwrap().price, 3_001.0);
    }

    #[test]
    fn invalid_update_is_rejected_without_mutation() {
        let store = TickerStore::default();
        assert_eq!(store.ingest(&tick("BTCUSDT", 0.0, 1)), IngestOutcome::Rejected);
        assert_eq!(store.ingest(&tick("BTCUSDT", f64::NAN, 1)), IngestOutcome::Rejected);
        assert!(store.is_empty());
    }

    #[test]
    fn seed_fills_only_missing_symbols() {
        let store = TickerStore::default();
        store.ingest(&tick("BTCUSDT", 50_000.0, 5));

        assert_eq!(store.seed(&tick("BTCUSDT", 1.0, 10)), IngestOutcome::Skipped);
        assert_eq!(store.seed(&tick("ETHUSDT", 3_000.0, 1)), IngestOutcome::Applied);

        assert_eq!(store.snapshot("BTCUSDT").unwrap().source, SnapshotSource::Stream);
        assert_eq!(store.snapshot("ETHUSDT").unwrap().source, SnapshotSource::Rest);
        assert_eq!(store.delta("ETHUSDT"), PriceDelta::None);
    }

    #[test]
    fn fallback_is_ignored_while_live() {
        let store = TickerStore::default();
        store.ingest(&tick("BTCUSDT", 50_000.0, 5));

        store.observe_connection(ConnectionState::Connected);
        assert_eq!(
            store.apply_fallback(&tick("BTCUSDT", 49_000.0, 6)),
            IngestOutcome::Skipped
        );

        store.observe_connection(ConnectionState::Reconnecting);
        assert_eq!(
            store.apply_fallback(&tick("BTCUSDT", 49_000.0, 6)),
            IngestOutcome::Applied
        );
        let snapshot = store.snapshot("BTCUSDT").unwrap();
        assert_eq!(snapshot.price, 49_000.0);
        assert_eq!(snapshot.source, SnapshotSource::Rest);
    }

    #[tokio::test(start_paused = true)]
    async fn flash_decays_without_further_updates() {
        let store = TickerStore::default();
        store.ingest(&tick("SOLUSDT", 150.0, 1));
        store.ingest(&tick("SOLUSDT", 149.0, 2));
        assert_eq!(store.delta("SOLUSDT"), PriceDelta::Down);

        tokio::time::advance(Duration::from_millis(499)).await;
        assert_eq!(store.delta("SOLUSDT"), PriceDelta::Down);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(store.delta("SOLUSDT"), PriceDelta::None);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_price_keeps_existing_flash_window() {
        let store = TickerStore::default();
        store.ingest(&tick("SOLUSDT", 150.0, 1));
        store.ingest(&tick("SOLUSDT", 151.0, 2));

        tokio::time::advance(Duration::from_millis(300)).await;
        store.ingest(&tick("SOLUSDT", 151.0, 3));
        assert_eq!(store.delta("SOLUSDT"), PriceDelta::Up);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(store.delta("SOLUSDT"), PriceDelta::None);
    }

    #[test]
    fn subscribers_see_fully_applied_snapshot() {
        let store = Arc::new(TickerStore::default());
        let seen = Arc::new(AtomicUsize::new(0));

        let reader = Arc::clone(&store);
        let counter = Arc::clone(&seen);
        let subscription = store.subscribe(move |snapshot| {
            assert_eq!(reader.snapshot(&snapshot.symbol).as_ref(), Some(snapshot));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.ingest(&tick("BTCUSDT", 1.0, 1));
        store.ingest(&tick("BTCUSDT", 2.0, 0));
        store.ingest(&tick("BTCUSDT", 3.0, 2));
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        store.ingest(&tick("BTCUSDT", 4.0, 3));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn dropping_subscription_deregisters() {
        let store = TickerStore::default();
        {
            let _a = store.subscribe(|_| {});
            let _b = store.subscribe(|_| {});
            assert_eq!(store.subscriber_count(), 2);
        }
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_receivers_get_applied_snapshots() {
        let store = TickerStore::default();
        let mut rx = store.updates();

        store.ingest(&tick("ADAUSDT", 0.45, 1));
        store.ingest(&tick("ADAUSDT", 0.44, 0));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.price, 0.45);
        assert!(rx.try_recv().is_err());
    }

    proptest! {
        #[test]
        fn latest_timestamp_wins_regardless_of_order(
            ticks in prop::collection::btree_map(0i64..100_000, 1.0f64..100_000.0, 1..40)
                .prop_map(|m| m.into_iter().collect::<Vec<_>>())
                .prop_shuffle()
        ) {
            let store = TickerStore::default();
            for (millis, price) in &ticks {
                store.ingest(&tick("BTCUSDT", *price, *millis));
            }

            let (latest_millis, latest_price) = ticks
                .iter()
                .max_by_key(|(millis, _)| *millis)
                .copied()
                .unwrap();
            let snapshot = store.snapshot("BTCUSDT").unwrap();
            prop_assert_eq!(snapshot.last_update, at(latest_millis));
            prop_assert_eq!(snapshot.price, latest_price);
        }
    }
}
