//! Kraken-class venue: no streaming source. Books are polled from
//! `public/Depth` (each poll a fresh snapshot) and order lifecycle from
//! `private/OpenOrders`, both through the rotating `MultiPoller`.

pub mod client;
pub mod codec;

pub use client::{DEFAULT_REST_URL, KrakenClient};
