use std::sync::Arc;

use tidebook_core::{CoreError, MarketSnapshot, MarketUpdate, OrderBook, SyncSink};

use crate::events::FeedEvent;
use crate::mirror::BookMirror;
use crate::queue::EventQueue;

/// The synchronizer's landing zone for one (venue, symbol) stream: owns the
/// book, publishes to the mirror, and emits an OrderBookUpdate event after
/// every applied batch.
pub struct BookSink {
    book: OrderBook,
    events: Arc<EventQueue<FeedEvent>>,
    mirror: Option<Arc<BookMirror>>,
}

impl BookSink {
    pub fn new(
        book: OrderBook,
        events: Arc<EventQueue<FeedEvent>>,
        mirror: Option<Arc<BookMirror>>,
    ) -> Self {
        BookSink {
            book,
            events,
            mirror,
        }
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    fn publish(&self) {
        if let Some(mirror) = &self.mirror {
            mirror.store(self.book.clone());
        }
    }
}

impl SyncSink for BookSink {
    type Update = MarketUpdate;
    type Snapshot = MarketSnapshot;

    fn syncpoint_of(&self, update: &MarketUpdate) -> Option<u64> {
        update.min_rts()
    }

    /// A batch is newer than the snapshot when any of its deltas is.
    fn newer_than(&self, syncpoint: u64, update: &MarketUpdate) -> bool {
        update.max_rts().is_some_and(|rts| rts > syncpoint)
    }

    fn apply_update(&mut self, update: MarketUpdate) -> Result<(), CoreError> {
        self.book.apply(update.into())?;
        self.publish();
        self.events
            .push(FeedEvent::OrderBookUpdate(self.book.market_snapshot()));
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: MarketSnapshot) -> Result<u64, CoreError> {
        self.book.apply(snapshot.into())?;
        self.publish();
        Ok(self.book.syncpoint())
    }
}
