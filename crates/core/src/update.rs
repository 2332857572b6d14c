use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::currency::CurrencyPair;
use crate::delta::MarketDelta;
use crate::venue::VenueId;

/// An ordered batch of deltas from one (venue, symbol) stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub ts: DateTime<Utc>,
    pub venue: VenueId,
    pub symbol: CurrencyPair,
    pub deltas: Vec<MarketDelta>,
}

/// A complete statement of a book at one syncpoint.
///
/// Semantically: the book equals exactly the Assigns contained here; all
/// prior state is discarded when the snapshot is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ts: DateTime<Utc>,
    pub venue: VenueId,
    pub symbol: CurrencyPair,
    pub deltas: Vec<MarketDelta>,
}

impl MarketUpdate {
    pub fn new(venue: VenueId, symbol: CurrencyPair, deltas: Vec<MarketDelta>) -> Self {
        MarketUpdate {
            ts: Utc::now(),
            venue,
            symbol,
            deltas,
        }
    }

    /// Smallest rts in the batch, if any.
    pub fn min_rts(&self) -> Option<u64> {
        self.deltas.iter().map(MarketDelta::rts).min()
    }

    /// Largest rts in the batch, if any.
    pub fn max_rts(&self) -> Option<u64> {
        self.deltas.iter().map(MarketDelta::rts).max()
    }
}

impl MarketSnapshot {
    pub fn new(venue: VenueId, symbol: CurrencyPair, deltas: Vec<MarketDelta>) -> Self {
        MarketSnapshot {
            ts: Utc::now(),
            venue,
            symbol,
            deltas,
        }
    }

    /// The snapshot's syncpoint: the largest rts among its assigns.
    pub fn syncpoint(&self) -> Option<u64> {
        self.deltas.iter().map(MarketDelta::rts).max()
    }
}

/// Either kind of batch, for the book's single apply entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketData {
    Update(MarketUpdate),
    Snapshot(MarketSnapshot),
}

impl MarketData {
    pub fn deltas(&self) -> &[MarketDelta] {
        match self {
            MarketData::Update(u) => &u.deltas,
            MarketData::Snapshot(s) => &s.deltas,
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            MarketData::Update(u) => u.ts,
            MarketData::Snapshot(s) => s.ts,
        }
    }
}

impl From<MarketUpdate> for MarketData {
    fn from(u: MarketUpdate) -> Self {
        MarketData::Update(u)
    }
}

impl From<MarketSnapshot> for MarketData {
    fn from(s: MarketSnapshot) -> Self {
        MarketData::Snapshot(s)
    }
}
