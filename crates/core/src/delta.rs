use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::CurrencyPair;
use crate::side::Side;
use crate::venue::VenueId;

/// The fields every market-data delta carries.
///
/// `rts` is the venue's remote timestamp or sequence number, the syncpoint.
/// It must be monotone non-decreasing within one (venue, symbol) stream and
/// totally ordered against the snapshot sequence for the same stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaFields {
    pub rts: u64,
    pub venue: VenueId,
    pub symbol: CurrencyPair,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
}

/// An incremental book modification or an executed trade.
///
/// Closed union by design: the book-apply hot path matches on the variant,
/// never dispatches dynamically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MarketDelta {
    /// Replace the level's size (size 0 removes the level).
    Assign(DeltaFields),
    /// Add to the level's size (a missing level starts at 0).
    Increase(DeltaFields),
    /// Subtract from the level's size, clamped at 0 (0 removes the level).
    Decrease(DeltaFields),
    /// An executed trade; recorded in the trade ring, book sides untouched.
    Trade(DeltaFields),
}

impl MarketDelta {
    pub fn fields(&self) -> &DeltaFields {
        match self {
            MarketDelta::Assign(f)
            | MarketDelta::Increase(f)
            | MarketDelta::Decrease(f)
            | MarketDelta::Trade(f) => f,
        }
    }

    pub fn rts(&self) -> u64 {
        self.fields().rts
    }

    pub fn side(&self) -> Side {
        self.fields().side
    }

    pub fn is_trade(&self) -> bool {
        matches!(self, MarketDelta::Trade(_))
    }
}
