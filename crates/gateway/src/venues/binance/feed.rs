use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use tidebook_core::{CurrencyPair, MarketUpdate, OrderBook, StreamSynchronizer, VenueId};

use crate::error::TransportError;
use crate::events::{FeedEvent, TradeClock};
use crate::feed::{FeedSession, READ_IDLE_DEADLINE};
use crate::mirror::BookMirror;
use crate::queue::EventQueue;
use crate::sink::BookSink;
use crate::ws::{WsClient, WsEvent};

use super::client::BinanceClient;
use super::codec::{self, StreamMessage};
use crate::adapter::VenueAdapter;

/// Live feed session for Binance `@depth`/`@trade` combined streams. The
/// streams are encoded in the URL path, so there is no subscribe exchange;
/// the REST depth snapshot races the diff stream and the synchronizer drops
/// diffs with `u <= lastUpdateId`. Order lifecycle is not on this socket;
/// it is polled over REST by the broker.
pub struct BinanceFeed {
    client: Arc<BinanceClient>,
    ws_url: String,
    symbol: CurrencyPair,
    mirror: Option<Arc<BookMirror>>,
}

impl BinanceFeed {
    pub fn new(
        client: Arc<BinanceClient>,
        ws_url: impl Into<String>,
        symbol: CurrencyPair,
        mirror: Option<Arc<BookMirror>>,
    ) -> Self {
        BinanceFeed {
            client,
            ws_url: ws_url.into(),
            symbol,
            mirror,
        }
    }

    /// wss://host/ws/btcusdt@depth/btcusdt@trade
    fn stream_url(&self) -> String {
        let local = BinanceClient::local_symbol(self.symbol).to_lowercase();
        format!("{}/{local}@depth/{local}@trade", self.ws_url)
    }

    fn handle_text(
        &self,
        text: &str,
        events: &Arc<EventQueue<FeedEvent>>,
        sync: &mut StreamSynchronizer<BookSink>,
        clock: &mut TradeClock,
    ) -> Result<(), TransportError> {
        let message = match serde_json::from_str::<StreamMessage>(text) {
            Ok(message) => message,
            Err(_) => {
                tracing::warn!(%text, "unknown binance message");
                return Ok(());
            }
        };
        match message {
            StreamMessage::DepthUpdate(update) => {
                let deltas = codec::deltas_from_depth(&update, self.symbol);
                let update = MarketUpdate::new(VenueId::binance(), self.symbol, deltas);
                sync.submit_stream(update)
                    .map_err(|e| TransportError::ProtocolViolation(e.to_string()))?;
            }
            StreamMessage::Trade(trade) => {
                let (matched, mut tick) = codec::trade_and_match(&trade, self.symbol);
                tick.timestamp = clock.normalize(tick.timestamp);
                events.push(FeedEvent::Match(matched));
                events.push(FeedEvent::Trade(tick));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FeedSession for BinanceFeed {
    async fn run(
        &mut self,
        events: Arc<EventQueue<FeedEvent>>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let (handle, mut rx) = WsClient::new(self.stream_url()).connect().await?;
        events.push(FeedEvent::Connected { initialized: false });

        let sink = BookSink::new(
            OrderBook::new(VenueId::binance(), self.symbol),
            Arc::clone(&events),
            self.mirror.clone(),
        );
        let mut sync = StreamSynchronizer::new(sink);
        let mut clock = TradeClock::new();

        let snapshot_client = Arc::clone(&self.client);
        let symbol = self.symbol;
        let snapshot_fut = async move { snapshot_client.book_snapshot(symbol).await };
        tokio::pin!(snapshot_fut);
        let mut snapshot_pending = true;

        loop {
            tokio::select! {
                snapshot = &mut snapshot_fut, if snapshot_pending => {
                    snapshot_pending = false;
                    sync.submit_sync(snapshot?)
                        .map_err(|e| TransportError::ProtocolViolation(e.to_string()))?;
                    events.push(FeedEvent::Connected { initialized: true });
                }
                received = tokio::time::timeout(READ_IDLE_DEADLINE, rx.recv()) => {
                    match received {
                        Err(_) => {
                            handle.close().await;
                            return Err(TransportError::Idle(READ_IDLE_DEADLINE));
                        }
                        Ok(None) => return Err(TransportError::ChannelClosed),
                        Ok(Some(WsEvent::Disconnected { reason })) => {
                            return Err(TransportError::ConnectionClosed(reason));
                        }
                        Ok(Some(WsEvent::Text(text))) => {
                            self.handle_text(&text, &events, &mut sync, &mut clock)?;
                        }
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        handle.close().await;
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

    #[test]
    fn test_stream_url_shape() {
        let client = Arc::new(BinanceClient::new(super::super::DEFAULT_REST_URL, None));
        let feed = BinanceFeed::new(
            client,
            super::super::DEFAULT_WS_URL,
            CurrencyPair::BTC_USDT,
            None,
        );
        assert_eq!(
            feed.stream_url(),
            "wss://stream.binance.com:9443/ws/btcusdt@depth/btcusdt@trade"
        );
    }
}
