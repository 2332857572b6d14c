//! Binance-class venue: depth-diff websocket synced against the REST
//! `v1/depth` snapshot via `lastUpdateId`; order lifecycle lives behind
//! separate signed REST endpoints.

pub mod client;
pub mod codec;
pub mod feed;

pub use client::{BinanceClient, DEFAULT_REST_URL, DEFAULT_WS_URL};
pub use feed::BinanceFeed;
