//! Binance Adapter
//!
//! WebSocket ticker stream plus the 24h REST ticker endpoint.
//!
//! # Endpoints
//!
//! | Purpose | URL |
//! |---------|-----|
//! | Ticker stream | `wss://stream.binance.com:9443/ws/<symbol>@ticker/...` |
//! | 24h snapshot | `https://api.binance.com/api/v3/ticker/24hr?symbols=[...]` |

pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod rest;
pub mod stream;

pub use codec::{Frame, FrameCodec, FrameError};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::BinanceRestClient;
pub use stream::{
    ListenerId, StreamClient, StreamClientConfig, StreamClientError, StreamHandle,
    StreamStatsSnapshot,
};
