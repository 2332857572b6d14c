pub mod book;
pub mod currency;
pub mod delta;
pub mod error;
pub mod events;
pub mod instrument;
pub mod order;
pub mod side;
pub mod sync;
pub mod update;
pub mod venue;

// Re-export the domain vocabulary at the crate root for convenience
pub use book::{BookDepth, OrderBook, PriceLevel, TRADE_RING_CAPACITY};
pub use currency::{Currency, CurrencyPair};
pub use delta::{DeltaFields, MarketDelta};
pub use error::CoreError;
pub use events::{OrderEvent, OrderEventKind};
pub use instrument::FloatTraits;
pub use order::{Order, OrderAction, OrderExecutionInfo, OrderKind, OrderState};
pub use side::Side;
pub use sync::{StreamSynchronizer, SyncSink, SyncState};
pub use update::{MarketData, MarketSnapshot, MarketUpdate};
pub use venue::VenueId;

pub type Timestamp = chrono::DateTime<chrono::Utc>;
