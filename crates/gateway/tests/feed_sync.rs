//! Feed-worker integration: the synchronizer race and reconnection wired
//! through the real harness, book and dispatch queue.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::watch;

use tidebook_core::{
    CurrencyPair, DeltaFields, MarketDelta, MarketSnapshot, MarketUpdate, OrderBook, Side,
    StreamSynchronizer, VenueId,
};
use tidebook_gateway::error::TransportError;
use tidebook_gateway::events::FeedEvent;
use tidebook_gateway::feed::{FeedSession, LiveFeed};
use tidebook_gateway::mirror::BookMirror;
use tidebook_gateway::queue::EventQueue;
use tidebook_gateway::sink::BookSink;

fn assign(rts: u64, price: Decimal, size: Decimal) -> MarketDelta {
    MarketDelta::Assign(DeltaFields {
        rts,
        venue: VenueId::binance(),
        symbol: CurrencyPair::BTC_USDT,
        price,
        size,
        side: Side::Bid,
    })
}

/// A venue session with a scripted wire: stream updates race the snapshot,
/// and the first session dies after streaming to force a reconnect.
struct ScriptedVenue {
    mirror: Arc<BookMirror>,
    sessions: usize,
}

#[async_trait]
impl FeedSession for ScriptedVenue {
    async fn run(
        &mut self,
        events: Arc<EventQueue<FeedEvent>>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        self.sessions += 1;
        events.push(FeedEvent::Connected { initialized: false });

        let sink = BookSink::new(
            OrderBook::new(VenueId::binance(), CurrencyPair::BTC_USDT),
            Arc::clone(&events),
            Some(Arc::clone(&self.mirror)),
        );
        let mut sync = StreamSynchronizer::new(sink);

        if self.sessions == 1 {
            // Stream arrives before the snapshot: 98/99 are already in the
            // snapshot, 101/102 are not.
            for rts in [98u64, 99, 101, 102] {
                let update = MarketUpdate::new(
                    VenueId::binance(),
                    CurrencyPair::BTC_USDT,
                    vec![assign(rts, dec!(50000) + Decimal::from(rts), dec!(1))],
                );
                sync.submit_stream(update)
                    .map_err(|e| TransportError::ProtocolViolation(e.to_string()))?;
            }
            let snapshot = MarketSnapshot::new(
                VenueId::binance(),
                CurrencyPair::BTC_USDT,
                vec![assign(100, dec!(49000), dec!(2))],
            );
            sync.submit_sync(snapshot)
                .map_err(|e| TransportError::ProtocolViolation(e.to_string()))?;
            events.push(FeedEvent::Connected { initialized: true });

            // Transport drops.
            return Err(TransportError::ConnectionClosed("scripted drop".into()));
        }

        // After reconnect: a fresh snapshot resets the stream.
        let snapshot = MarketSnapshot::new(
            VenueId::binance(),
            CurrencyPair::BTC_USDT,
            vec![assign(200, dec!(51000), dec!(3))],
        );
        sync.submit_sync(snapshot)
            .map_err(|e| TransportError::ProtocolViolation(e.to_string()))?;
        events.push(FeedEvent::Connected { initialized: true });
        let update = MarketUpdate::new(
            VenueId::binance(),
            CurrencyPair::BTC_USDT,
            vec![assign(201, dec!(51001), dec!(1))],
        );
        sync.submit_stream(update)
            .map_err(|e| TransportError::ProtocolViolation(e.to_string()))?;

        // Idle until stopped.
        loop {
            stop.changed()
                .await
                .map_err(|_| TransportError::ChannelClosed)?;
            if *stop.borrow() {
                return Ok(());
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_sync_race_then_reconnect() {
    let mirror = Arc::new(BookMirror::new());
    let mut feed = LiveFeed::spawn(
        ScriptedVenue {
            mirror: Arc::clone(&mirror),
            sessions: 0,
        },
        true,
    );

    // Collect events across the disconnect until the post-reconnect book
    // update arrives.
    let mut timeline = Vec::new();
    loop {
        if let Some(event) = feed.poll_event().await {
            let done = matches!(
                &event,
                FeedEvent::OrderBookUpdate(s) if s.syncpoint() == Some(201)
            );
            timeline.push(event);
            if done {
                break;
            }
        } else {
            tokio::task::yield_now().await;
        }
    }
    feed.stop();
    feed.join().await;

    // Session one: replay applied only rts 101 and 102, one book event each.
    let first_updates: Vec<u64> = timeline
        .iter()
        .filter_map(|e| match e {
            FeedEvent::OrderBookUpdate(s) => s.syncpoint(),
            _ => None,
        })
        .collect();
    assert_eq!(first_updates, vec![101, 102, 201]);

    // The disconnect was surfaced, then a fresh Connected pair.
    assert!(
        timeline
            .iter()
            .any(|e| matches!(e, FeedEvent::Disconnected { .. }))
    );
    let connected_count = timeline
        .iter()
        .filter(|e| matches!(e, FeedEvent::Connected { initialized: true }))
        .count();
    assert_eq!(connected_count, 2);

    // The post-reconnect book equals the fresh snapshot plus its update:
    // nothing from before the disconnect is inferred.
    let book = mirror
        .load(&VenueId::binance(), CurrencyPair::BTC_USDT)
        .unwrap();
    let depth = book.depth(usize::MAX);
    assert_eq!(depth.bids.len(), 2);
    assert_eq!(depth.bids[0].price, dec!(51001));
    assert_eq!(depth.bids[1].price, dec!(51000));
    assert_eq!(book.syncpoint(), 201);
}
