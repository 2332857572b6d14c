use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;

use tidebook_core::{CurrencyPair, OrderBook, VenueId};

/// Lock-free read access to the latest book state per (venue, symbol).
///
/// The feed worker remains the book's only writer; after each applied batch
/// it stores a value copy here. Readers load whole-book snapshots without
/// ever blocking the worker.
#[derive(Default)]
pub struct BookMirror {
    books: DashMap<(VenueId, CurrencyPair), Arc<ArcSwap<OrderBook>>>,
}

impl BookMirror {
    pub fn new() -> Self {
        BookMirror::default()
    }

    /// Publish the current state of a book (copy-on-write swap).
    pub fn store(&self, book: OrderBook) {
        let key = (book.venue().clone(), book.symbol());
        match self.books.get(&key) {
            Some(entry) => entry.store(Arc::new(book)),
            None => {
                self.books
                    .entry(key)
                    .or_insert_with(|| Arc::new(ArcSwap::from_pointee(book.clone())))
                    .store(Arc::new(book));
            }
        }
    }

    /// The latest published state, if the feed has produced one.
    pub fn load(&self, venue: &VenueId, symbol: CurrencyPair) -> Option<Arc<OrderBook>> {
        self.books
            .get(&(venue.clone(), symbol))
            .map(|entry| entry.load_full())
    }

    /// All (venue, symbol) streams with published state.
    pub fn keys(&self) -> Vec<(VenueId, CurrencyPair)> {
        self.books.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tidebook_core::{DeltaFields, MarketDelta, MarketUpdate, Side};

    fn book_with_bid(price: rust_decimal::Decimal) -> OrderBook {
        let mut book = OrderBook::new(VenueId::coinbase(), CurrencyPair::BTC_USD);
        book.apply(
            MarketUpdate::new(
                VenueId::coinbase(),
                CurrencyPair::BTC_USD,
                vec![MarketDelta::Assign(DeltaFields {
                    rts: 1,
                    venue: VenueId::coinbase(),
                    symbol: CurrencyPair::BTC_USD,
                    price,
                    size: dec!(1),
                    side: Side::Bid,
                })],
            )
            .into(),
        )
        .unwrap();
        book
    }

    #[test]
    fn test_store_and_load() {
        let mirror = BookMirror::new();
        assert!(mirror.load(&VenueId::coinbase(), CurrencyPair::BTC_USD).is_none());

        mirror.store(book_with_bid(dec!(100)));
        let loaded = mirror
            .load(&VenueId::coinbase(), CurrencyPair::BTC_USD)
            .unwrap();
        assert_eq!(loaded.inside_bid().unwrap().price, dec!(100));

        // A later store replaces the published state.
        mirror.store(book_with_bid(dec!(101)));
        let loaded = mirror
            .load(&VenueId::coinbase(), CurrencyPair::BTC_USD)
            .unwrap();
        assert_eq!(loaded.inside_bid().unwrap().price, dec!(101));
        assert_eq!(mirror.keys().len(), 1);
    }
}
