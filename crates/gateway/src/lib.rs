//! Venue connectivity: transports, codecs, and live feed workers.
//!
//! Layers:
//! - transport: `ws`, per-venue REST clients with signing, `limiter`
//! - normalization: `venues::*::codec` into the tidebook-core model
//! - delivery: `queue`/`feed`/`poll` produce the consumer-facing
//!   [`FeedEvent`] stream; `sink` wires the stream synchronizer to a book;
//!   `mirror` republishes book state for lock-free readers.

pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod limiter;
pub mod mirror;
pub mod poll;
pub mod queue;
pub mod sink;
pub mod venues;
pub mod ws;

pub use adapter::{Balances, OrderFlag, VenueAdapter};
pub use config::{
    ConfigError, Credentials, GatewayConfigFile, Secret, VenueConfig, load_config,
    load_config_from_str,
};
pub use error::TransportError;
pub use events::{
    DoneReason, FeedEvent, MatchInfo, OrderStateChange, TradeClock, TradeDirection, TradeTick,
    WireOrderStatus,
};
pub use feed::{FeedSession, LiveFeed, QUEUE_CAPACITY, QUEUE_TIMEOUT, RECONNECT_BACKOFF};
pub use limiter::RateLimiter;
pub use mirror::BookMirror;
pub use poll::MultiPoller;
pub use queue::EventQueue;
pub use sink::BookSink;
