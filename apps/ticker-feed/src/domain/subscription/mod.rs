//! Consumer Attachment Tracking
//!
//! Reference counts the symbols requested by each attached consumer so that
//! many consumers share one upstream connection.
//!
//! The table reports which symbols crossed 0→1 or 1→0 on every change; the
//! caller reopens the connection only when that set is non-empty.

use std::collections::{BTreeSet, HashMap, HashSet};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for an attached consumer.
pub type ConsumerId = u64;

/// Upstream symbol changes caused by an attach or detach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetChange {
    /// Symbols whose refcount went 0→1.
    pub added: BTreeSet<String>,
    /// Symbols whose refcount went 1→0.
    pub removed: BTreeSet<String>,
}

impl SetChange {
    /// Whether the upstream symbol set is unchanged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Snapshot of table occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentStats {
    /// Attached consumers.
    pub consumer_count: usize,
    /// Distinct symbols with a non-zero refcount.
    pub symbol_count: usize,
}

// =============================================================================
// Consumer Table
// =============================================================================

/// Per-consumer symbol sets with per-symbol reference counts.
///
/// Not synchronized; the owner guards it together with the connection it
/// controls.
#[derive(Debug, Default)]
pub struct ConsumerTable {
    consumer_symbols: HashMap<ConsumerId, HashSet<String>>,
    symbol_refcount: HashMap<String, usize>,
}

impl ConsumerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `symbols` for `consumer`; repeated symbols count once.
    pub fn attach<I, S>(&mut self, consumer: ConsumerId, symbols: I) -> SetChange
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let consumer_set = self.consumer_symbols.entry(consumer).or_default();
        let mut change = SetChange::default();

        for symbol in symbols {
            let symbol = symbol.into();
            if !consumer_set.insert(symbol.clone()) {
                continue;
            }

            let refcount = self.symbol_refcount.entry(symbol.clone()).or_insert(0);
            *refcount += 1;
            if *refcount == 1 {
                change.added.insert(symbol);
            }
        }

        change
    }

    /// Remove every symbol held by `consumer`.
    pub fn detach(&mut self, consumer: ConsumerId) -> SetChange {
        let Some(consumer_set) = self.consumer_symbols.remove(&consumer) else {
            return SetChange::default();
        };

        let mut change = SetChange::default();
        for symbol in consumer_set {
            if let Some(refcount) = self.symbol_refcount.get_mut(&symbol) {
                *refcount = refcount.saturating_sub(1);
                if *refcount == 0 {
                    self.symbol_refcount.remove(&symbol);
                    change.removed.insert(symbol);
                }
            }
        }

        change
    }

    /// Union of every consumer's symbols.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<String> {
        self.symbol_refcount.keys().cloned().collect()
    }

    /// Number of consumers holding `symbol`.
    #[must_use]
    pub fn refcount(&self, symbol: &str) -> usize {
        self.symbol_refcount.get(symbol).copied().unwrap_or(0)
    }

    /// Whether `consumer` is attached.
    #[must_use]
    pub fn is_attached(&self, consumer: ConsumerId) -> bool {
        self.consumer_symbols.contains_key(&consumer)
    }

    /// Whether no consumer is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumer_symbols.is_empty()
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> AttachmentStats {
        AttachmentStats {
            consumer_count: self.consumer_symbols.len(),
            symbol_count: self.symbol_refcount.len(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn set(symbols: &[&str]) -> BTreeSet<String> {
        symbols.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn first_attach_adds_upstream_symbols() {
        let mut table = ConsumerTable::new();
        let change = table.attach(1, ["BTCUSDT", "ETHUSDT"]);
        assert_eq!(change.added, set(&["BTCUSDT", "ETHUSDT"]));
        assert!(change.removed.is_empty());
    }

    #[test]
    fn overlapping_attach_only_adds_new_symbols() {
        let mut table = ConsumerTable::new();
        table.attach(1, ["BTCUSDT", "ETHUSDT"]);

        let change = table.attach(2, ["ETHUSDT", "SOLUSDT"]);
        assert_eq!(change.added, set(&["SOLUSDT"]));
        assert_eq!(table.refcount("ETHUSDT"), 2);
    }

    #[test]
    fn repeated_symbol_for_same_consumer_counts_once() {
        let mut table = ConsumerTable::new();
        table.attach(1, ["BTCUSDT", "BTCUSDT"]);
        let change = table.attach(1, ["BTCUSDT"]);
        assert!(change.is_empty());
        assert_eq!(table.refcount("BTCUSDT"), 1);
    }

    #[test]
    fn detach_releases_only_unshared_symbols() {
        let mut table = ConsumerTable::new();
        table.attach(1, ["BTCUSDT", "ETHUSDT"]);
        table.attach(2, ["ETHUSDT"]);

        let change = table.detach(1);
        assert_eq!(change.removed, set(&["BTCUSDT"]));
        assert_eq!(table.active_symbols(), vec!["ETHUSDT".to_string()]);

        let change = table.detach(2);
        assert_eq!(change.removed, set(&["ETHUSDT"]));
        assert!(table.is_empty());
    }

    #[test]
    fn detach_unknown_consumer_is_noop() {
        let mut table = ConsumerTable::new();
        table.attach(1, ["BTCUSDT"]);
        assert!(table.detach(99).is_empty());
        assert_eq!(
            table.stats(),
            AttachmentStats {
                consumer_count: 1,
                symbol_count: 1
            }
        );
    }
}
