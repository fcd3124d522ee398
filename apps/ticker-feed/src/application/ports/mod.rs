//! Port Interfaces
//!
//! Contracts the application services depend on, implemented by
//! infrastructure adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SnapshotProvider`: point-in-time REST snapshots used to seed the store
//!   and to poll while the stream is down

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::market::PriceSnapshot;

/// Source of REST price snapshots.
///
/// Implementations absorb upstream failures: an unreachable provider yields
/// an empty (or partial) map, never an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Snapshots for the known subset of `symbols`, keyed by symbol.
    async fn fetch_snapshots(&self, symbols: &[String]) -> BTreeMap<String, PriceSnapshot>;
}
