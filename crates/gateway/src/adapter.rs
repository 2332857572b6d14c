use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use tidebook_core::{Currency, CurrencyPair, FloatTraits, MarketSnapshot, Order, Side, VenueId};

use crate::error::TransportError;
use crate::events::OrderStateChange;

/// Free balance per currency.
pub type Balances = HashMap<Currency, Decimal>;

/// Time-in-force and post flags an adapter may pass through to its venue.
/// Venues answer flags they cannot express with `UnsupportedFlag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFlag {
    GoodTillCanceled,
    ImmediateOrCancel,
    FillOrKill,
    PostOnly,
    /// Cancel after the given number of seconds.
    GoodTillTime(u32),
}

/// The capability surface every venue adapter exposes: public market data,
/// private account state, and order entry, all in the normalized model.
/// Signing, rate limiting and symbol translation stay behind this trait.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> VenueId;

    /// Taker fee rate used for the internal fee model.
    fn fee_rate(&self) -> Decimal {
        // 25 bps, the venues' common taker tier
        Decimal::new(25, 4)
    }

    async fn book_snapshot(&self, symbol: CurrencyPair)
    -> Result<MarketSnapshot, TransportError>;

    async fn balances(&self) -> Result<Balances, TransportError>;

    async fn limit_order(
        &self,
        side: Side,
        price: Decimal,
        size: Decimal,
        symbol: CurrencyPair,
        flags: &[OrderFlag],
    ) -> Result<String, TransportError>;

    async fn market_order(
        &self,
        side: Side,
        size: Decimal,
        symbol: CurrencyPair,
    ) -> Result<String, TransportError>;

    /// Cancel by venue order id. Cancelling an already-terminal order yields
    /// `NotActive`, which callers treat as recoverable.
    async fn cancel(&self, venue_order_id: &str) -> Result<(), TransportError>;

    async fn open_orders(
        &self,
        symbol: Option<CurrencyPair>,
    ) -> Result<Vec<Order>, TransportError>;

    async fn closed_orders(
        &self,
        since: DateTime<Utc>,
        symbols: Option<&[CurrencyPair]>,
    ) -> Result<Vec<Order>, TransportError>;

    async fn instrument_traits(
        &self,
    ) -> Result<HashMap<CurrencyPair, FloatTraits>, TransportError>;

    /// Current status of one order, where the venue can report it; used by
    /// the broker to confirm submissions and by pollers to synthesize
    /// lifecycle events.
    async fn order_status(
        &self,
        venue_order_id: &str,
    ) -> Result<Option<OrderStateChange>, TransportError>;
}
