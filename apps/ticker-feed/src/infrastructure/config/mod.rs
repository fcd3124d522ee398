//! Configuration Module
//!
//! Configuration loading for the ticker feed service.

mod settings;

pub use settings::{
    ConfigError, FeedConfig, GatewaySettings, ServerSettings, StoreSettings, StreamSettings,
};
