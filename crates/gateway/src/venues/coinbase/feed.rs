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

use super::client::CoinbaseClient;
use super::codec::{self, WsMessage};
use crate::adapter::VenueAdapter;

/// Live feed session for the Coinbase full channel. One session covers one
/// product: subscribe, sync the book against a REST snapshot racing the
/// stream, then translate every message into normalized events.
pub struct CoinbaseFeed {
    client: Arc<CoinbaseClient>,
    ws_url: String,
    symbol: CurrencyPair,
    mirror: Option<Arc<BookMirror>>,
}

impl CoinbaseFeed {
    pub fn new(
        client: Arc<CoinbaseClient>,
        ws_url: impl Into<String>,
        symbol: CurrencyPair,
        mirror: Option<Arc<BookMirror>>,
    ) -> Self {
        CoinbaseFeed {
            client,
            ws_url: ws_url.into(),
            symbol,
            mirror,
        }
    }

    fn handle_text(
        &self,
        text: &str,
        events: &Arc<EventQueue<FeedEvent>>,
        sync: &mut StreamSynchronizer<BookSink>,
        clock: &mut TradeClock,
    ) -> Result<(), TransportError> {
        let message = match serde_json::from_str::<WsMessage>(text) {
            Ok(message) => message,
            Err(_) => {
                tracing::warn!(%text, "unknown coinbase message");
                return Ok(());
            }
        };
        match &message {
            WsMessage::Heartbeat | WsMessage::Subscriptions => return Ok(()),
            WsMessage::Error { message } => {
                tracing::error!(%message, "coinbase websocket error");
                return Ok(());
            }
            WsMessage::Match(m) => {
                let (matched, mut tick) = codec::trade_and_match(m, self.symbol)?;
                tick.timestamp = clock.normalize(tick.timestamp);
                events.push(FeedEvent::Match(matched));
                events.push(FeedEvent::Trade(tick));
            }
            _ => {}
        }
        if let Some(change) = codec::order_change(&message) {
            events.push(FeedEvent::OrderChange(change));
        }

        let deltas = codec::book_deltas(&message, self.symbol)?;
        if !deltas.is_empty() {
            let update = MarketUpdate::new(VenueId::coinbase(), self.symbol, deltas);
            sync.submit_stream(update)
                .map_err(|e| TransportError::ProtocolViolation(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl FeedSession for CoinbaseFeed {
    async fn run(
        &mut self,
        events: Arc<EventQueue<FeedEvent>>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let (handle, mut rx) = WsClient::new(&self.ws_url).connect().await?;
        events.push(FeedEvent::Connected { initialized: false });

        let subscribe = serde_json::json!({
            "type": "subscribe",
            "product_ids": [CoinbaseClient::local_symbol(self.symbol)],
            "channels": ["full"],
        });
        handle.send_text(subscribe.to_string()).await?;

        let sink = BookSink::new(
            OrderBook::new(VenueId::coinbase(), self.symbol),
            Arc::clone(&events),
            self.mirror.clone(),
        );
        let mut sync = StreamSynchronizer::new(sink);
        let mut clock = TradeClock::new();

        // The snapshot fetch races the stream; the synchronizer buffers
        // whatever arrives first.
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
