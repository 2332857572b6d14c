use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::currency::CurrencyPair;
use crate::delta::{DeltaFields, MarketDelta};
use crate::error::CoreError;
use crate::side::Side;
use crate::update::{MarketData, MarketSnapshot};
use crate::venue::VenueId;

/// How many recent trades the book retains; index 0 is the most recent.
pub const TRADE_RING_CAPACITY: usize = 100;

/// One price level of the book.
///
/// Invariant: a stored level always has size > 0; size 0 means "absent".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        PriceLevel { price, size }
    }
}

/// Top-n levels per side, bids descending, asks ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct BookDepth {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// A per-venue, per-symbol limit-order book at price-level granularity.
///
/// The book understands only the normalized delta vocabulary; venue wire
/// formats are decoded before they reach it. There is no per-order identity
/// inside the book.
#[derive(Debug, Clone)]
pub struct OrderBook {
    venue: VenueId,
    symbol: CurrencyPair,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    trades: VecDeque<DeltaFields>,
    last: Option<MarketData>,
    syncpoint: u64,
}

impl OrderBook {
    pub fn new(venue: VenueId, symbol: CurrencyPair) -> Self {
        OrderBook {
            venue,
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            trades: VecDeque::with_capacity(TRADE_RING_CAPACITY),
            last: None,
            syncpoint: 0,
        }
    }

    /// Build a book directly from a snapshot.
    pub fn from_snapshot(snapshot: MarketSnapshot) -> Result<Self, CoreError> {
        let mut book = OrderBook::new(snapshot.venue.clone(), snapshot.symbol);
        book.apply(snapshot.into())?;
        Ok(book)
    }

    pub fn venue(&self) -> &VenueId {
        &self.venue
    }

    pub fn symbol(&self) -> CurrencyPair {
        self.symbol
    }

    /// True until the first batch is applied.
    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    pub fn last(&self) -> Option<&MarketData> {
        self.last.as_ref()
    }

    pub fn syncpoint(&self) -> u64 {
        self.syncpoint
    }

    /// Recent trades, most recent first.
    pub fn trades(&self) -> impl Iterator<Item = &DeltaFields> {
        self.trades.iter()
    }

    fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.trades.clear();
        self.last = None;
    }

    /// Apply a batch. Snapshots reset the book first; updates apply their
    /// deltas in wire order. Afterwards the batch is recorded as `last` and
    /// the syncpoint advances to the largest rts observed.
    pub fn apply(&mut self, data: MarketData) -> Result<(), CoreError> {
        if matches!(data, MarketData::Snapshot(_)) {
            self.reset();
            self.syncpoint = 0;
        }

        for delta in data.deltas() {
            self.apply_delta(delta);
        }

        if let Some(max_rts) = data.deltas().iter().map(MarketDelta::rts).max()
            && max_rts > self.syncpoint
        {
            self.syncpoint = max_rts;
        }
        self.last = Some(data);

        if self.is_crossed() {
            tracing::warn!(
                venue = %self.venue,
                symbol = %self.symbol,
                "book is crossed after apply"
            );
        }
        Ok(())
    }

    fn apply_delta(&mut self, delta: &MarketDelta) {
        if let MarketDelta::Trade(fields) = delta {
            if self.trades.len() == TRADE_RING_CAPACITY {
                self.trades.pop_back();
            }
            self.trades.push_front(fields.clone());
            return;
        }

        let fields = delta.fields();
        let side = match fields.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        let current = side.get(&fields.price).copied().unwrap_or(Decimal::ZERO);
        let size = match delta {
            MarketDelta::Assign(_) => fields.size,
            MarketDelta::Increase(_) => current + fields.size,
            MarketDelta::Decrease(_) => (current - fields.size).max(Decimal::ZERO),
            MarketDelta::Trade(_) => unreachable!(),
        };
        if size > Decimal::ZERO {
            side.insert(fields.price, size);
        } else {
            side.remove(&fields.price);
        }
    }

    /// Best bid, or EmptyBook.
    pub fn inside_bid(&self) -> Result<PriceLevel, CoreError> {
        self.bids
            .iter()
            .next_back()
            .map(|(p, s)| PriceLevel::new(*p, *s))
            .ok_or_else(|| self.empty(Side::Bid))
    }

    /// Best ask, or EmptyBook.
    pub fn inside_ask(&self) -> Result<PriceLevel, CoreError> {
        self.asks
            .iter()
            .next()
            .map(|(p, s)| PriceLevel::new(*p, *s))
            .ok_or_else(|| self.empty(Side::Ask))
    }

    fn empty(&self, side: Side) -> CoreError {
        CoreError::EmptyBook {
            venue: self.venue.to_string(),
            symbol: self.symbol.to_string(),
            side,
        }
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.bids.iter().next_back()?.0;
        let ask = self.asks.iter().next()?.0;
        Some((bid + ask) / Decimal::TWO)
    }

    pub fn spread(&self) -> Option<Decimal> {
        let bid = self.bids.iter().next_back()?.0;
        let ask = self.asks.iter().next()?.0;
        Some(ask - bid)
    }

    /// Top-n levels per side in price priority. `usize::MAX` for the whole book.
    pub fn depth(&self, n: usize) -> BookDepth {
        BookDepth {
            bids: self
                .bids
                .iter()
                .rev()
                .take(n)
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect(),
            asks: self
                .asks
                .iter()
                .take(n)
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect(),
        }
    }

    /// Cost of sweeping `size` units from side `side` of the book, walking
    /// levels in price priority. Short-fills when liquidity runs out: the
    /// returned value covers only the size that was available.
    ///
    /// Note the side named is the side walked, not the side an order of that
    /// direction would consume.
    pub fn price_for_size(&self, side: Side, size: Decimal) -> Decimal {
        let mut size_left = size;
        let mut value = Decimal::ZERO;
        for level in self.side_levels(side) {
            let take = size_left.min(level.size);
            value += take * level.price;
            size_left -= take;
            if size_left.is_zero() {
                break;
            }
        }
        value
    }

    /// Dual of `price_for_size`: the total size obtainable on side `side` by
    /// spending at most `budget`.
    pub fn size_for_price(&self, side: Side, budget: Decimal) -> Decimal {
        let mut budget_left = budget;
        let mut size = Decimal::ZERO;
        for level in self.side_levels(side) {
            let cost = level.price * level.size;
            if cost <= budget_left {
                size += level.size;
                budget_left -= cost;
            } else {
                size += budget_left / level.price;
                break;
            }
        }
        size
    }

    /// Ratio of the bid-side to ask-side sweep cost for `size` units; a cheap
    /// directional-pressure measure.
    pub fn book_pressure(&self, size: Decimal) -> Result<Decimal, CoreError> {
        let ask_cost = self.price_for_size(Side::Ask, size);
        if ask_cost.is_zero() {
            return Err(self.empty(Side::Ask));
        }
        Ok(self.price_for_size(Side::Bid, size) / ask_cost)
    }

    fn side_levels(&self, side: Side) -> Box<dyn Iterator<Item = PriceLevel> + '_> {
        match side {
            Side::Bid => Box::new(
                self.bids
                    .iter()
                    .rev()
                    .map(|(p, s)| PriceLevel::new(*p, *s)),
            ),
            Side::Ask => Box::new(self.asks.iter().map(|(p, s)| PriceLevel::new(*p, *s))),
        }
    }

    /// A crossed book has max(bid) >= min(ask). Violations from the wire are
    /// surfaced (logged at apply time), never silently corrected.
    pub fn is_crossed(&self) -> bool {
        match (self.bids.iter().next_back(), self.asks.iter().next()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// A full-book snapshot: one Assign per stored level, stamped with the
    /// current wall clock and the book's syncpoint.
    pub fn market_snapshot(&self) -> MarketSnapshot {
        let assign = |price: &Decimal, size: &Decimal, side: Side| {
            MarketDelta::Assign(DeltaFields {
                rts: self.syncpoint,
                venue: self.venue.clone(),
                symbol: self.symbol,
                price: *price,
                size: *size,
                side,
            })
        };
        let deltas = self
            .bids
            .iter()
            .rev()
            .map(|(p, s)| assign(p, s, Side::Bid))
            .chain(self.asks.iter().map(|(p, s)| assign(p, s, Side::Ask)))
            .collect();
        MarketSnapshot {
            ts: Utc::now(),
            venue: self.venue.clone(),
            symbol: self.symbol,
            deltas,
        }
    }
}
