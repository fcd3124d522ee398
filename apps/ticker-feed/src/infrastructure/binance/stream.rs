//! Ticker Stream Client
//!
//! Maintains one multiplexed WebSocket connection per [`SubscriptionSet`]
//! and hands validated [`TickerUpdate`]s to registered listeners.
//!
//! # Stream URL
//!
//! - Production: `wss://stream.binance.com:9443/ws/btcusdt@ticker/ethusdt@ticker`
//!
//! One lower-case stream name per symbol, joined by `/`. The set is fixed for
//! the lifetime of a connection; a different set means a new [`StreamHandle`].
//!
//! # State Machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                    ^   |         |
//!                    |   v         v  (close / error / idle timeout)
//!                 Reconnecting <---+
//!
//! any state -> Disconnected on close()
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{Frame, FrameCodec, FrameError};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::symbols::SubscriptionSet;
use crate::domain::ticker::{ConnectionState, TickerUpdate};
use crate::infrastructure::metrics;

/// Default Binance raw-stream endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Default per-symbol stream suffix.
pub const DEFAULT_STREAM_SUFFIX: &str = "@ticker";

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a single connection attempt. All of them lead to a
/// reconnect; none escape the client.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// No frame arrived within the idle window.
    #[error("no frames for {0:?}")]
    IdleTimeout(Duration),

    /// Connection closed by the server or the transport.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Base WebSocket URL; stream names are appended as path segments.
    pub base_url: String,
    /// Suffix appended to each lower-case symbol.
    pub stream_suffix: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Treat the connection as dead after this long without a frame.
    pub idle_timeout: Duration,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_STREAM_URL.to_string(),
            stream_suffix: DEFAULT_STREAM_SUFFIX.to_string(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl StreamClientConfig {
    /// Create a configuration for a custom endpoint.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Full connection URL for a subscription set.
    #[must_use]
    pub fn stream_url(&self, set: &SubscriptionSet) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            set.stream_names(&self.stream_suffix).join("/")
        )
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct StreamStats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    reconnects: AtomicU64,
    connections: AtomicU64,
}

/// Point-in-time copy of client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    /// Text frames received.
    pub frames_received: u64,
    /// Frames dropped during validation.
    pub frames_dropped: u64,
    /// Reconnect attempts scheduled.
    pub reconnects: u64,
    /// Successful handshakes.
    pub connections: u64,
}

// =============================================================================
// Stream Client
// =============================================================================

/// Identifier of a registered update listener.
pub type ListenerId = u64;

type UpdateListener = Arc<dyn Fn(&TickerUpdate) + Send + Sync>;

struct Shared {
    config: StreamClientConfig,
    codec: FrameCodec,
    listeners: RwLock<Vec<(ListenerId, UpdateListener)>>,
    next_listener: AtomicU64,
    next_connection: AtomicU64,
    stats: StreamStats,
}

impl Shared {
    fn dispatch(&self, update: &TickerUpdate) {
        let listeners: Vec<UpdateListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(update);
        }
    }

    fn record_drop(&self, error: &FrameError) {
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_dropped(error.reason());
        tracing::debug!(error = %error, "Dropping ticker frame");
    }
}

/// Ticker stream client. Cheap to clone; clones share listeners and stats.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("base_url", &self.shared.config.base_url)
            .field("listeners", &self.shared.listeners.read().len())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a new client.
    #[must_use]
    pub fn new(config: StreamClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                codec: FrameCodec::new(),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                next_connection: AtomicU64::new(1),
                stats: StreamStats::default(),
            }),
        }
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &StreamClientConfig {
        &self.shared.config
    }

    /// Register a listener called once per valid frame, on every connection
    /// opened by this client.
    pub fn on_update<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TickerUpdate) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> StreamStatsSnapshot {
        let stats = &self.shared.stats;
        StreamStatsSnapshot {
            frames_received: stats.frames_received.load(Ordering::Relaxed),
            frames_dropped: stats.frames_dropped.load(Ordering::Relaxed),
            reconnects: stats.reconnects.load(Ordering::Relaxed),
            connections: stats.connections.load(Ordering::Relaxed),
        }
    }

    /// Open a connection for `set`.
    ///
    /// Returns immediately; connect failures surface as `Reconnecting`.
    /// Must be called from within a tokio runtime.
    #[must_use = "dropping the handle closes the connection"]
    pub fn open(&self, set: SubscriptionSet) -> StreamHandle {
        let id = self.shared.next_connection.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let state = Arc::new(StateCell {
            tx: state_tx,
            cancel: cancel.clone(),
            lock: Mutex::new(()),
        });

        let connection = Connection {
            id,
            url: self.shared.config.stream_url(&set),
            set: set.clone(),
            shared: Arc::clone(&self.shared),
            state: Arc::clone(&state),
            cancel,
        };
        let task = tokio::spawn(connection.run());

        StreamHandle {
            id,
            set,
            state,
            state_rx,
            task: Mutex::new(Some(task)),
        }
    }
}

// =============================================================================
// Connection State Cell
// =============================================================================

/// Serializes state transitions against `close()` so a connection task can
/// never publish a state after the handle was closed.
struct StateCell {
    tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    lock: Mutex<()>,
}

impl StateCell {
    fn transition(&self, next: ConnectionState) -> bool {
        let _guard = self.lock.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send_replace(next);
        metrics::set_connection_state(next);
        true
    }

    fn close(&self) {
        let _guard = self.lock.lock();
        self.cancel.cancel();
        if self.tx.send_replace(ConnectionState::Disconnected) != ConnectionState::Disconnected {
            metrics::set_connection_state(ConnectionState::Disconnected);
        }
    }
}

// =============================================================================
// Stream Handle
// =============================================================================

/// Owner of one open connection. Dropping it closes the connection.
pub struct StreamHandle {
    id: u64,
    set: SubscriptionSet,
    state: Arc<StateCell>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("symbols", &self.set.symbols())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    /// Connection identifier, unique per client.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Symbols carried by this connection.
    #[must_use]
    pub const fn subscription_set(&self) -> &SubscriptionSet {
        &self.set
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// Close the connection and cancel any pending reconnect. Idempotent.
    pub fn close(&self) {
        if !self.is_closed() {
            tracing::debug!(connection_id = self.id, "Closing ticker stream");
        }
        self.state.close();
    }

    /// Close and wait for the connection task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(connection_id = self.id, error = %e, "Ticker stream task failed");
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.state.close();
    }
}

// =============================================================================
// Connection Task
// =============================================================================

struct Connection {
    id: u64,
    url: String,
    set: SubscriptionSet,
    shared: Arc<Shared>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
}

impl Connection {
    async fn run(self) {
        let mut policy = ReconnectPolicy::new(self.shared.config.reconnect.clone());

        loop {
            if !self.state.transition(ConnectionState::Connecting) {
                break;
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(connection_id = self.id, error = %e, "Ticker stream connection error");

                    if !self.state.transition(ConnectionState::Reconnecting) {
                        break;
                    }

                    let delay = policy.next_delay();
                    self.shared.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::record_reconnect();
                    tracing::info!(
                        connection_id = self.id,
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting to ticker stream"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::debug!(connection_id = self.id, "Ticker stream task stopped");
    }

    /// Connect and pump frames until cancelled (`Ok`) or the transport fails.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), StreamClientError> {
        let config = &self.shared.config;
        tracing::info!(
            connection_id = self.id,
            url = %self.url,
            symbols = self.set.len(),
            "Connecting to ticker stream"
        );

        let connect = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        );
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = connect => result
                .map_err(|_| StreamClientError::ConnectTimeout(config.connect_timeout))??,
        };

        if !self.state.transition(ConnectionState::Connected) {
            return Ok(());
        }
        policy.reset();
        self.shared.stats.connections.fetch_add(1, Ordering::Relaxed);
        tracing::info!(connection_id = self.id, "Ticker stream connected");

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                next = tokio::time::timeout(config.idle_timeout, read.next()) => {
                    let Ok(msg) = next else {
                        return Err(StreamClientError::IdleTimeout(config.idle_timeout));
                    };
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!(connection_id = self.id, "Server sent close frame");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Binary and pong frames carry no ticker data
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!(connection_id = self.id, "WebSocket stream ended");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.shared.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_received();

        match self.shared.codec.decode(text, Utc::now()) {
            Ok(Frame::Ticker(update)) => {
                if self.set.contains(&update.symbol) {
                    self.shared.dispatch(&update);
                } else {
                    self.shared
                        .record_drop(&FrameError::UnsubscribedSymbol(update.symbol));
                }
            }
            Ok(Frame::Control) => {
                tracing::debug!(connection_id = self.id, "Ignoring control frame");
            }
            Err(e) => self.shared.record_drop(&e),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
