//! Symbol Registry
//!
//! Static allow-list of tradable symbols and their display metadata.
//!
//! Every symbol that reaches the stream client or the REST gateway is
//! validated here first. Symbols are exchange pairs such as `BTCUSDT`; the
//! registry also resolves bare base assets (`BTC`) for providers that are
//! keyed by asset rather than pair.

use std::collections::{HashMap, HashSet};

// =============================================================================
// Constants
// =============================================================================

/// Symbols tracked when no explicit list is configured.
pub const DEFAULT_SYMBOLS: [&str; 10] = [
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "DOGEUSDT", "ADAUSDT", "AVAXUSDT",
    "DOTUSDT", "LINKUSDT",
];

/// Icon used for symbols without built-in metadata.
pub const FALLBACK_ICON: &str = "○";

/// Known display metadata: (symbol, name, icon).
const KNOWN_METADATA: [(&str, &str, &str); 10] = [
    ("BTCUSDT", "Bitcoin", "₿"),
    ("ETHUSDT", "Ethereum", "Ξ"),
    ("BNBUSDT", "BNB", "◆"),
    ("SOLUSDT", "Solana", "◎"),
    ("XRPUSDT", "XRP", "✕"),
    ("DOGEUSDT", "Dogecoin", "Ð"),
    ("ADAUSDT", "Cardano", "₳"),
    ("AVAXUSDT", "Avalanche", "▲"),
    ("DOTUSDT", "Polkadot", "●"),
    ("LINKUSDT", "Chainlink", "⬡"),
];

/// Quote assets stripped to derive the base asset, longest first.
const QUOTE_ASSETS: [&str; 7] = ["FDUSD", "USDT", "USDC", "BUSD", "TUSD", "EUR", "BTC"];

const MAX_SYMBOL_LEN: usize = 20;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised when a symbol fails registry validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol is well-formed but not in the allow-list.
    #[error("symbol not in registry: {0}")]
    Unknown(String),

    /// Symbol contains characters outside `[A-Z0-9]` or has a bad length.
    #[error("malformed symbol: {0:?}")]
    Malformed(String),

    /// An empty symbol list was supplied where at least one is required.
    #[error("symbol list is empty")]
    Empty,
}

// =============================================================================
// Symbol Metadata
// =============================================================================

/// Display metadata for a tradable symbol.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SymbolInfo {
    /// Exchange pair, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Base asset code, e.g. `BTC`.
    pub short: String,
    /// Human readable name, e.g. `Bitcoin`.
    pub name: String,
    /// Single glyph used by compact ticker displays.
    pub icon: String,
}

impl SymbolInfo {
    fn for_symbol(symbol: &str) -> Self {
        let short = base_asset(symbol).to_string();
        KNOWN_METADATA
            .iter()
            .find(|(known, _, _)| *known == symbol)
            .map_or_else(
                || Self {
                    symbol: symbol.to_string(),
                    name: short.clone(),
                    short: short.clone(),
                    icon: FALLBACK_ICON.to_string(),
                },
                |(_, name, icon)| Self {
                    symbol: symbol.to_string(),
                    short: short.clone(),
                    name: (*name).to_string(),
                    icon: (*icon).to_string(),
                },
            )
    }
}

/// Strip a known quote asset suffix, returning the base asset.
fn base_asset(symbol: &str) -> &str {
    QUOTE_ASSETS
        .iter()
        .find_map(|quote| {
            symbol
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
        })
        .unwrap_or(symbol)
}

/// Normalize user input to the canonical upper-case form and validate it.
///
/// # Errors
///
/// Returns `SymbolError::Malformed` if the input is empty, too long, or
/// contains anything other than ASCII letters and digits.
pub fn normalize_symbol(raw: &str) -> Result<String, SymbolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.len() > MAX_SYMBOL_LEN
        || !trimmed.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(SymbolError::Malformed(raw.to_string()));
    }
    Ok(trimmed.to_ascii_uppercase())
}

// =============================================================================
// Registry
// =============================================================================

/// Allow-list of tradable symbols, in configured order.
#[derive(Debug, Clone)]
pub struct SymbolRegistry {
    entries: Vec<SymbolInfo>,
    by_symbol: HashMap<String, usize>,
    by_base: HashMap<String, usize>,
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::from_valid(DEFAULT_SYMBOLS.iter().map(|s| (*s).to_string()))
    }
}

impl SymbolRegistry {
    /// Build a registry from a configured symbol list.
    ///
    /// Input is normalized to upper case and de-duplicated, keeping the
    /// first occurrence.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::Malformed` for an invalid entry and
    /// `SymbolError::Empty` if no symbols remain.
    pub fn new<I, S>(symbols: I) -> Result<Self, SymbolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized = symbols
            .into_iter()
            .map(|s| normalize_symbol(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }

        Ok(Self::from_valid(normalized))
    }

    fn from_valid(symbols: impl IntoIterator<Item = String>) -> Self {
        let mut entries = Vec::new();
        let mut by_symbol = HashMap::new();
        let mut by_base = HashMap::new();

        for symbol in symbols {
            if by_symbol.contains_key(&symbol) {
                continue;
            }
            let info = SymbolInfo::for_symbol(&symbol);
            let index = entries.len();
            // First pair wins for a shared base asset (e.g. BTCUSDT before BTCEUR).
            by_base.entry(info.short.clone()).or_insert(index);
            by_symbol.insert(symbol, index);
            entries.push(info);
        }

        Self {
            entries,
            by_symbol,
            by_base,
        }
    }

    /// Look up a symbol (case-insensitive).
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&SymbolInfo> {
        let key = symbol.trim().to_ascii_uppercase();
        self.by_symbol.get(&key).map(|&i| &self.entries[i])
    }

    /// Check whether a symbol is in the allow-list.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    /// Resolve either a pair (`BTCUSDT`) or a base asset (`BTC`).
    #[must_use]
    pub fn resolve_asset(&self, asset: &str) -> Option<&SymbolInfo> {
        let key = asset.trim().to_ascii_uppercase();
        self.by_symbol
            .get(&key)
            .or_else(|| self.by_base.get(&key))
            .map(|&i| &self.entries[i])
    }

    /// Keep only allow-listed symbols, canonicalized and de-duplicated.
    ///
    /// Unknown or malformed entries are dropped silently; input order is kept.
    #[must_use]
    pub fn filter_known<'a, I>(&self, symbols: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        symbols
            .into_iter()
            .filter_map(|s| self.get(s))
            .filter(|info| seen.insert(info.symbol.clone()))
            .map(|info| info.symbol.clone())
            .collect()
    }

    /// Build a subscription set from the given symbols.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::Unknown` for the first symbol not in the
    /// registry and `SymbolError::Empty` for an empty input.
    pub fn subscription_set<'a, I>(&self, symbols: I) -> Result<SubscriptionSet, SymbolError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut indices = Vec::new();
        for symbol in symbols {
            let key = normalize_symbol(symbol)?;
            let index = *self
                .by_symbol
                .get(&key)
                .ok_or_else(|| SymbolError::Unknown(key.clone()))?;
            indices.push(index);
        }

        if indices.is_empty() {
            return Err(SymbolError::Empty);
        }

        // Registry order makes equal sets compare (and connect) identically.
        indices.sort_unstable();
        indices.dedup();

        Ok(SubscriptionSet {
            symbols: indices
                .into_iter()
                .map(|i| self.entries[i].symbol.clone())
                .collect(),
        })
    }

    /// Subscription set covering the whole registry.
    #[must_use]
    pub fn full_set(&self) -> SubscriptionSet {
        SubscriptionSet {
            symbols: self.symbols(),
        }
    }

    /// All symbols in configured order.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.symbol.clone()).collect()
    }

    /// Iterate over symbol metadata in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolInfo> {
        self.entries.iter()
    }

    /// Number of registered symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty (never true for a constructed registry).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Subscription Set
// =============================================================================

/// Ordered, de-duplicated set of registry symbols carried by one connection.
///
/// Only constructible through [`SymbolRegistry::subscription_set`] or
/// [`SymbolRegistry::full_set`], so every member is known to be valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionSet {
    symbols: Vec<String>,
}

impl SubscriptionSet {
    /// Symbols in the set.
    #[must_use]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Whether the set includes `symbol` (exact, upper-case match).
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Per-symbol stream names: lower-case symbol followed by `suffix`.
    #[must_use]
    pub fn stream_names(&self, suffix: &str) -> Vec<String> {
        self.symbols
            .iter()
            .map(|s| format!("{}{suffix}", s.to_ascii_lowercase()))
            .collect()
    }
}
