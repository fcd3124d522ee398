//! Ticker Types
//!
//! Canonical representation of a 24h rolling ticker observation, shared by
//! the stream codec, the REST gateway and the store.

use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// Ticker Update
// =============================================================================

/// A single validated price observation for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerUpdate {
    /// Exchange pair, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Last trade / close price.
    pub price: f64,
    /// Absolute price change over the rolling 24h window.
    pub price_change: f64,
    /// Percentage price change over the rolling 24h window.
    pub price_change_percent: f64,
    /// 24h high.
    pub high_24h: f64,
    /// 24h low.
    pub low_24h: f64,
    /// 24h base asset volume.
    pub volume: f64,
    /// 24h quote asset volume.
    pub quote_volume: f64,
    /// Exchange event time, or arrival time when the frame carries none.
    pub last_update: DateTime<Utc>,
}

impl TickerUpdate {
    /// Check the numeric invariants: finite values, `price > 0`, and
    /// non-negative high/low/volumes.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let non_negative = [self.high_24h, self.low_24h, self.volume, self.quote_volume];
        !self.symbol.is_empty()
            && self.price.is_finite()
            && self.price > 0.0
            && self.price_change.is_finite()
            && self.price_change_percent.is_finite()
            && non_negative.iter().all(|v| v.is_finite() && *v >= 0.0)
    }
}

// =============================================================================
// Ticker Snapshot
// =============================================================================

/// Which path produced the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Pushed by the streaming connection.
    Stream,
    /// Fetched from a REST provider (cold start or degraded fallback).
    Rest,
}

/// Latest known state for one symbol, as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerSnapshot {
    /// Exchange pair.
    pub symbol: String,
    /// Last trade / close price.
    pub price: f64,
    /// Absolute 24h change.
    pub price_change: f64,
    /// Percentage 24h change.
    pub price_change_percent: f64,
    /// 24h high.
    pub high_24h: f64,
    /// 24h low.
    pub low_24h: f64,
    /// 24h base volume.
    pub volume: f64,
    /// 24h quote volume.
    pub quote_volume: f64,
    /// Time of the applied observation; never decreases per symbol.
    pub last_update: DateTime<Utc>,
    /// Origin of the value.
    pub source: SnapshotSource,
}

impl TickerSnapshot {
    /// Build a snapshot from an update and its origin.
    #[must_use]
    pub fn from_update(update: &TickerUpdate, source: SnapshotSource) -> Self {
        Self {
            symbol: update.symbol.clone(),
            price: update.price,
            price_change: update.price_change,
            price_change_percent: update.price_change_percent,
            high_24h: update.high_24h,
            low_24h: update.low_24h,
            volume: update.volume,
            quote_volume: update.quote_volume,
            last_update: update.last_update,
            source,
        }
    }
}

// =============================================================================
// Price Delta
// =============================================================================

/// Transient direction of the most recent price move ("flash" state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDelta {
    /// Price rose on the last applied update.
    Up,
    /// Price fell on the last applied update.
    Down,
    /// No recent move, or the flash window has elapsed.
    #[default]
    None,
}

impl PriceDelta {
    /// Direction of a move from `previous` to `current`.
    #[must_use]
    pub fn between(previous: f64, current: f64) -> Self {
        if current > previous {
            Self::Up
        } else if current < previous {
            Self::Down
        } else {
            Self::None
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake complete; frames are flowing.
    Connected,
    /// Waiting out the reconnect delay after a transport failure.
    Reconnecting,
}

impl ConnectionState {
    /// Stable lower-case name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Numeric encoding used by the connection state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
        }
    }
}
