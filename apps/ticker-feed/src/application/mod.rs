//! Application Layer - Use cases and port definitions.
//!
//! This layer wires the domain to the outside world: the ticker store, the
//! shared market feed, and the ports they consume.

/// Port interfaces for external systems (REST snapshots).
pub mod ports;

/// Application services for price state and consumer attachment.
pub mod services;
