//! Application Services
//!
//! - `TickerStore`: latest price per symbol with flash state and fan-out
//! - `MarketFeed`: refcounted consumer attachment over one shared stream

pub mod market_feed;
pub mod ticker_store;

pub use market_feed::{FeedError, FeedLease, MarketFeed, MarketFeedConfig};
pub use ticker_store::{IngestOutcome, StoreSubscription, TickerStore, TickerStoreConfig};
