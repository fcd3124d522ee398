//! Domain Layer - Core market data types.
//!
//! Pure types with no I/O: the symbol allow-list, ticker values, REST
//! result types, and consumer refcounting.

/// Symbol allow-list and subscription sets.
pub mod symbols;

/// Ticker updates, snapshots, flash direction and connection state.
pub mod ticker;

/// Snapshot, history and market-list values returned by REST providers.
pub mod market;

/// Consumer attachment refcounting.
pub mod subscription;
