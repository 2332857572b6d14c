use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use tidebook_core::CurrencyPair;

use crate::adapter::VenueAdapter;
use crate::error::TransportError;
use crate::events::{FeedEvent, OrderStateChange};
use crate::feed::FeedSession;
use crate::mirror::BookMirror;
use crate::queue::EventQueue;

/// What one poller tick fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollTarget {
    Book(CurrencyPair),
    OpenOrders,
}

/// Feed session for venues with no streaming source: produces the same
/// event taxonomy by polling, one target per tick, round-robin. Each book
/// poll is a fresh snapshot; open-order polls synthesize OrderChange
/// events. Effective per-feed rate is poll_frequency divided across the
/// subscribed feeds.
///
/// Poll errors are logged and retried on the next rotation, never surfaced
/// as events.
pub struct MultiPoller<A> {
    adapter: Arc<A>,
    targets: Vec<PollTarget>,
    poll_frequency: Duration,
    mirror: Option<Arc<BookMirror>>,
    next: usize,
}

impl<A: VenueAdapter> MultiPoller<A> {
    pub fn new(
        adapter: Arc<A>,
        symbols: Vec<CurrencyPair>,
        poll_orders: bool,
        poll_frequency: Duration,
        mirror: Option<Arc<BookMirror>>,
    ) -> Self {
        let mut targets: Vec<PollTarget> = symbols.into_iter().map(PollTarget::Book).collect();
        if poll_orders {
            targets.push(PollTarget::OpenOrders);
        }
        MultiPoller {
            adapter,
            targets,
            poll_frequency,
            mirror,
            next: 0,
        }
    }

    async fn poll_one(&mut self, events: &EventQueue<FeedEvent>) -> Result<(), TransportError> {
        if self.targets.is_empty() {
            return Ok(());
        }
        let target = self.targets[self.next % self.targets.len()];
        self.next = self.next.wrapping_add(1);
        match target {
            PollTarget::Book(symbol) => {
                let snapshot = self.adapter.book_snapshot(symbol).await?;
                if let Some(mirror) = &self.mirror {
                    mirror.store(tidebook_core::OrderBook::from_snapshot(snapshot.clone())?);
                }
                events.push(FeedEvent::OrderBookUpdate(snapshot));
            }
            PollTarget::OpenOrders => {
                let orders = self.adapter.open_orders(None).await?;
                tracing::debug!(count = orders.len(), "open-order poll");
                for order in &orders {
                    if let Some(change) = OrderStateChange::from_order(order) {
                        events.push(FeedEvent::OrderChange(change));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<A: VenueAdapter + 'static> FeedSession for MultiPoller<A> {
    async fn run(
        &mut self,
        events: Arc<EventQueue<FeedEvent>>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        events.push(FeedEvent::Connected { initialized: false });

        // Initialization handshake: one snapshot per symbol up front, so the
        // consumer starts from complete books.
        for target in self.targets.clone() {
            if let PollTarget::Book(symbol) = target {
                let snapshot = self.adapter.book_snapshot(symbol).await?;
                if let Some(mirror) = &self.mirror {
                    mirror.store(tidebook_core::OrderBook::from_snapshot(snapshot.clone())?);
                }
                events.push(FeedEvent::OrderBookUpdate(snapshot));
            }
        }
        events.push(FeedEvent::Connected { initialized: true });

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_frequency) => {
                    if let Err(e) = self.poll_one(&events).await {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        tracing::warn!(error = %e, "poll failed, will retry next rotation");
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Balances, OrderFlag};
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tidebook_core::{
        DeltaFields, FloatTraits, MarketDelta, MarketSnapshot, Order, OrderAction, Side, VenueId,
    };

    struct StubAdapter {
        book_polls: AtomicUsize,
        order_polls: AtomicUsize,
    }

    impl StubAdapter {
        fn new() -> Self {
            StubAdapter {
                book_polls: AtomicUsize::new(0),
                order_polls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VenueAdapter for StubAdapter {
        fn venue(&self) -> VenueId {
            VenueId::kraken()
        }

        async fn book_snapshot(
            &self,
            symbol: CurrencyPair,
        ) -> Result<MarketSnapshot, TransportError> {
            let n = self.book_polls.fetch_add(1, Ordering::SeqCst) as u64;
            Ok(MarketSnapshot::new(
                self.venue(),
                symbol,
                vec![MarketDelta::Assign(DeltaFields {
                    rts: n + 1,
                    venue: self.venue(),
                    symbol,
                    price: dec!(100),
                    size: dec!(1),
                    side: Side::Bid,
                })],
            ))
        }

        async fn balances(&self) -> Result<Balances, TransportError> {
            Ok(HashMap::new())
        }

        async fn limit_order(
            &self,
            _side: Side,
            _price: Decimal,
            _size: Decimal,
            _symbol: CurrencyPair,
            _flags: &[OrderFlag],
        ) -> Result<String, TransportError> {
            unimplemented!()
        }

        async fn market_order(
            &self,
            _side: Side,
            _size: Decimal,
            _symbol: CurrencyPair,
        ) -> Result<String, TransportError> {
            unimplemented!()
        }

        async fn cancel(&self, _venue_order_id: &str) -> Result<(), TransportError> {
            unimplemented!()
        }

        async fn open_orders(
            &self,
            _symbol: Option<CurrencyPair>,
        ) -> Result<Vec<Order>, TransportError> {
            self.order_polls.fetch_add(1, Ordering::SeqCst);
            let mut order = Order::limit(
                OrderAction::Buy,
                CurrencyPair::BTC_USD,
                dec!(100),
                dec!(1),
                FloatTraits::default(),
            );
            order.set_submitted("oid-1", Utc::now());
            order.set_state(tidebook_core::OrderState::Accepted);
            Ok(vec![order])
        }

        async fn closed_orders(
            &self,
            _since: DateTime<Utc>,
            _symbols: Option<&[CurrencyPair]>,
        ) -> Result<Vec<Order>, TransportError> {
            Ok(Vec::new())
        }

        async fn instrument_traits(
            &self,
        ) -> Result<HashMap<CurrencyPair, FloatTraits>, TransportError> {
            Ok(HashMap::new())
        }

        async fn order_status(
            &self,
            _venue_order_id: &str,
        ) -> Result<Option<OrderStateChange>, TransportError> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_robin_rotation() {
        let adapter = Arc::new(StubAdapter::new());
        let mut poller = MultiPoller::new(
            Arc::clone(&adapter),
            vec![CurrencyPair::BTC_USD],
            true,
            Duration::from_secs(1),
            None,
        );
        let events = Arc::new(EventQueue::new(64, FeedEvent::is_book_update));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let queue = Arc::clone(&events);
        let handle = tokio::spawn(async move { poller.run(queue, &mut stop_rx).await });

        // Let four ticks elapse: two book polls and two order polls after
        // the initial snapshot.
        tokio::time::sleep(Duration::from_millis(4500)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // Initial snapshot plus two rotation book polls.
        assert_eq!(adapter.book_polls.load(Ordering::SeqCst), 3);
        assert_eq!(adapter.order_polls.load(Ordering::SeqCst), 2);

        let mut saw_change = false;
        let mut initialized = false;
        while let Some(event) = events.try_recv() {
            match event {
                FeedEvent::OrderChange(change) => {
                    assert_eq!(change.venue_order_id, "oid-1");
                    saw_change = true;
                }
                FeedEvent::Connected { initialized: true } => initialized = true,
                _ => {}
            }
        }
        assert!(saw_change);
        assert!(initialized);
    }
}
