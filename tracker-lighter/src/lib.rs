//! Lighter exchange integration
//!
//! Two interchangeable trade sources feed the tracker engine: a persistent
//! WebSocket stream of the tracked account's fills, and a windowed HTTP poll
//! against the aggregator API. Both produce [`tracker_core::NormalizedTrade`]
//! values via the normalizer in [`types`].

pub mod client;
pub mod types;
pub mod websocket;

pub use client::{LighterApiError, LighterHttpClient, LighterHttpClientConfig};
pub use types::{RawPolledTrade, RawStreamTrade, StreamCommand, StreamMessage, TradesResponse};
pub use websocket::{
    BackoffConfig, LighterUpdate, LighterWebSocket, LighterWebSocketConfig, LighterWsError,
};
