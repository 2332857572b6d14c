//! Coinbase-class venue: full-feed websocket with REST snapshot sync keyed
//! by the `sequence` integer; order lifecycle on the same websocket.

pub mod client;
pub mod codec;
pub mod feed;

pub use client::{CoinbaseClient, DEFAULT_REST_URL, DEFAULT_WS_URL};
pub use feed::CoinbaseFeed;
