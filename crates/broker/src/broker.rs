use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use tidebook_core::{
    CoreError, Currency, CurrencyPair, FloatTraits, Order, OrderAction, OrderEvent,
    OrderEventKind, OrderExecutionInfo, OrderState,
};
use tidebook_gateway::adapter::{Balances, OrderFlag, VenueAdapter};
use tidebook_gateway::events::{FeedEvent, MatchInfo, OrderStateChange};
use tidebook_gateway::feed::{QUEUE_CAPACITY, QUEUE_TIMEOUT};
use tidebook_gateway::queue::EventQueue;
use tidebook_gateway::TransportError;

use crate::error::BrokerError;

/// Attempts to confirm an order's status after submission before giving up
/// on transient transport failures.
const STATUS_RETRIES: usize = 5;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Whether the venue streams order lifecycle over the feed. Without one,
    /// `dispatch` advances Submitted orders to Accepted itself and polls
    /// supply the rest.
    pub lifecycle_stream: bool,
    /// Flags attached to every limit order.
    pub limit_flags: Vec<OrderFlag>,
    /// Orders below this size are rejected locally before submission.
    pub min_trade_size: Decimal,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            lifecycle_stream: true,
            limit_flags: Vec::new(),
            // one hundredth of a millibitcoin
            min_trade_size: Decimal::new(1, 5),
        }
    }
}

/// Live broker for one venue.
///
/// Owns the active-order registry (venue order id to Order) and the
/// user-visible balances. All mutation happens on the dispatch thread: feed
/// events enter through `offer`, and `dispatch` linearizes the resulting
/// state transitions. Submission and cancellation call the venue
/// synchronously from the caller.
pub struct LiveBroker<A> {
    adapter: Arc<A>,
    config: BrokerConfig,
    traits: HashMap<CurrencyPair, FloatTraits>,
    active: HashMap<String, Order>,
    balances: Balances,
    feed_events: Arc<EventQueue<FeedEvent>>,
    order_events: mpsc::UnboundedSender<OrderEvent>,
    order_events_rx: Option<mpsc::UnboundedReceiver<OrderEvent>>,
}

impl<A: VenueAdapter> LiveBroker<A> {
    pub fn new(adapter: Arc<A>, config: BrokerConfig) -> Self {
        let (order_events, order_events_rx) = mpsc::unbounded_channel();
        LiveBroker {
            adapter,
            config,
            traits: HashMap::new(),
            active: HashMap::new(),
            balances: Balances::new(),
            feed_events: Arc::new(EventQueue::new(QUEUE_CAPACITY, FeedEvent::is_book_update)),
            order_events,
            order_events_rx: Some(order_events_rx),
        }
    }

    /// The consumer's order-event stream; one event per transition.
    pub fn take_order_events(&mut self) -> Option<mpsc::UnboundedReceiver<OrderEvent>> {
        self.order_events_rx.take()
    }

    /// Load venue state: instrument traits, balances and the already-open
    /// orders. Run once before dispatching, and again after a reconnect:
    /// lifecycle missed while disconnected is not inferred, it is re-read.
    pub async fn start(&mut self) -> Result<(), BrokerError> {
        match self.adapter.instrument_traits().await {
            Ok(traits) => self.traits = traits,
            Err(e) => tracing::warn!(error = %e, "instrument traits unavailable, using defaults"),
        }
        self.refresh_account_balance().await?;
        self.refresh_open_orders().await?;
        Ok(())
    }

    pub async fn refresh_account_balance(&mut self) -> Result<(), BrokerError> {
        self.balances = self.adapter.balances().await?;
        tracing::info!(venue = %self.adapter.venue(), balances = ?self.balances, "account balance");
        Ok(())
    }

    pub async fn refresh_open_orders(&mut self) -> Result<(), BrokerError> {
        let orders = self.adapter.open_orders(None).await?;
        tracing::info!(count = orders.len(), "open orders found");
        for order in orders {
            if let Some(id) = order.id().map(str::to_string)
                && order.is_active()
            {
                self.active.insert(id, order);
            }
        }
        Ok(())
    }

    /// Cash: the free USD balance, rounded to cents.
    pub fn cash(&self) -> Decimal {
        self.balances
            .get(&Currency::Usd)
            .copied()
            .unwrap_or(Decimal::ZERO)
            .round_dp(2)
    }

    pub fn shares(&self, currency: Currency) -> Decimal {
        self.balances.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn positions(&self) -> &Balances {
        &self.balances
    }

    pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
        self.active.values()
    }

    pub fn order(&self, venue_order_id: &str) -> Option<&Order> {
        self.active.get(venue_order_id)
    }

    pub fn instrument_traits(&self, symbol: CurrencyPair) -> FloatTraits {
        self.traits.get(&symbol).copied().unwrap_or_default()
    }

    fn validated(&self, symbol: CurrencyPair, size: Decimal) -> Result<Decimal, BrokerError> {
        let size = self.instrument_traits(symbol).round_size(size);
        if size < self.config.min_trade_size {
            return Err(BrokerError::BelowMinimumTrade {
                size,
                minimum: self.config.min_trade_size,
            });
        }
        Ok(size)
    }

    /// Pure constructor: rounds to venue-legal increments, validates the
    /// minimum, and remaps short-covering actions.
    pub fn create_limit_order(
        &self,
        action: OrderAction,
        symbol: CurrencyPair,
        limit_price: Decimal,
        quantity: Decimal,
    ) -> Result<Order, BrokerError> {
        let traits = self.instrument_traits(symbol);
        let size = self.validated(symbol, quantity)?;
        Ok(Order::limit(
            action.normalized(),
            symbol,
            traits.round_price(limit_price),
            size,
            traits,
        ))
    }

    pub fn create_market_order(
        &self,
        action: OrderAction,
        symbol: CurrencyPair,
        quantity: Decimal,
    ) -> Result<Order, BrokerError> {
        let traits = self.instrument_traits(symbol);
        let size = self.validated(symbol, quantity)?;
        Ok(Order::market(action.normalized(), symbol, size, traits))
    }

    /// Submit to the venue. On success the order is Submitted, registered,
    /// and announced; on failure it is left Initial and the error surfaces.
    pub async fn submit_order(&mut self, order: &mut Order) -> Result<(), BrokerError> {
        if !order.is_initial() {
            return Err(BrokerError::AlreadyProcessed);
        }
        // Venue limitation: every order is GTC, never all-or-none.
        order.set_all_or_none(false);
        order.set_good_till_canceled(true);

        let side = if order.action().is_buy() {
            tidebook_core::Side::Bid
        } else {
            tidebook_core::Side::Ask
        };
        let result = match order.kind() {
            tidebook_core::OrderKind::Limit { price } => {
                self.adapter
                    .limit_order(
                        side,
                        price,
                        order.size(),
                        order.symbol(),
                        &self.config.limit_flags,
                    )
                    .await
            }
            tidebook_core::OrderKind::Market => {
                self.adapter
                    .market_order(side, order.size(), order.symbol())
                    .await
            }
        };
        let venue_id = result.map_err(|e| match e {
            TransportError::VenueRejected { ref text, .. }
                if text.to_lowercase().contains("insufficient") =>
            {
                BrokerError::InsufficientFunds { text: text.clone() }
            }
            other => BrokerError::Transport(other),
        })?;

        let submitted_at = self
            .confirm_submission(&venue_id)
            .await
            .unwrap_or_else(Utc::now);
        order.set_submitted(venue_id.clone(), submitted_at);
        order.switch_state(OrderState::Submitted)?;
        self.active.insert(venue_id, order.clone());
        self.emit(order, OrderEventKind::Submitted, None);
        Ok(())
    }

    /// Fetch the order's status after submission, retrying transient
    /// transport failures. Returns the venue's timestamp when it has one.
    async fn confirm_submission(&self, venue_id: &str) -> Option<chrono::DateTime<Utc>> {
        for attempt in 1..=STATUS_RETRIES {
            match self.adapter.order_status(venue_id).await {
                Ok(Some(change)) => return Some(change.timestamp),
                Ok(None) => return None,
                Err(e) if e.is_retryable() && attempt < STATUS_RETRIES => {
                    tracing::debug!(attempt, error = %e, "order status retry");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not confirm order status");
                    return None;
                }
            }
        }
        None
    }

    /// Request cancellation. The state transition is driven by the ensuing
    /// OrderChange (or poll result), never applied optimistically.
    pub async fn cancel_order(&mut self, venue_order_id: &str) -> Result<(), BrokerError> {
        if !self.active.contains_key(venue_order_id) {
            return Err(BrokerError::Core(CoreError::NotActive));
        }
        self.adapter.cancel(venue_order_id).await?;
        Ok(())
    }

    /// Route a feed event toward this broker's queue. Matches are enqueued
    /// only when they involve an active order; book updates are not the
    /// broker's concern.
    pub fn offer(&self, event: &FeedEvent) {
        match event {
            FeedEvent::Match(m) => {
                let ids: HashSet<String> = self.active.keys().cloned().collect();
                if m.involves(&ids).is_some() {
                    self.feed_events.push(event.clone());
                }
            }
            FeedEvent::OrderChange(change) => {
                if self.active.contains_key(&change.venue_order_id) {
                    self.feed_events.push(event.clone());
                }
            }
            _ => {}
        }
    }

    /// Advance the state machines: flip Submitted orders to Accepted where
    /// no lifecycle stream will, then drain at most one queued event.
    /// Returns within roughly `QUEUE_TIMEOUT` whether or not anything was
    /// processed; true when an event fired.
    pub async fn dispatch(&mut self) -> Result<bool, BrokerError> {
        let mut evented = false;

        if !self.config.lifecycle_stream {
            let submitted: Vec<String> = self
                .active
                .iter()
                .filter(|(_, o)| o.is_submitted())
                .map(|(id, _)| id.clone())
                .collect();
            for id in submitted {
                let order = self.active.get_mut(&id).expect("registered order");
                order.switch_state(OrderState::Accepted)?;
                let snapshot = order.clone();
                self.emit(&snapshot, OrderEventKind::Accepted, None);
                evented = true;
            }
        }

        match self.feed_events.recv_timeout(QUEUE_TIMEOUT).await {
            Some(FeedEvent::Match(m)) => {
                evented |= self.on_match(&m).await?;
            }
            Some(FeedEvent::OrderChange(change)) => {
                evented |= self.on_order_change(&change).await?;
            }
            Some(_) | None => {}
        }
        Ok(evented)
    }

    /// An execution against one of our orders: refresh balances, append the
    /// execution, emit PartiallyFilled or Filled.
    async fn on_match(&mut self, m: &MatchInfo) -> Result<bool, BrokerError> {
        let ids: HashSet<String> = self.active.keys().cloned().collect();
        let Some(id) = m.involves(&ids).map(str::to_string) else {
            return Ok(false);
        };

        // Balances move on every fill; re-read them rather than drift.
        self.refresh_account_balance().await?;

        let fee = self.fees(&id, m.price, m.size);
        let order = self.active.get_mut(&id).expect("involved order is active");
        if order.is_submitted() {
            order.switch_state(OrderState::Accepted)?;
            let snapshot = order.clone();
            self.emit(&snapshot, OrderEventKind::Accepted, None);
        }

        let order = self.active.get_mut(&id).expect("involved order is active");
        let execution = OrderExecutionInfo::new(m.price, m.size, fee, m.timestamp);
        order.add_execution(execution.clone())?;

        let snapshot = order.clone();
        let kind = if snapshot.is_filled() {
            OrderEventKind::Filled
        } else {
            OrderEventKind::PartiallyFilled
        };
        if !snapshot.is_active() {
            self.active.remove(&id);
        }
        self.emit(&snapshot, kind, Some(execution));
        Ok(true)
    }

    /// A lifecycle transition reported by the wire or a poll.
    async fn on_order_change(&mut self, change: &OrderStateChange) -> Result<bool, BrokerError> {
        let Some(order) = self.active.get_mut(&change.venue_order_id) else {
            return Ok(false);
        };
        let (new_state, kind) = change.new_state();
        let execution = change.execution_for(order);

        if order.is_submitted() && (execution.is_some() || new_state != OrderState::Accepted) {
            // The venue clearly knows the order; acknowledge before
            // applying whatever comes next.
            order.switch_state(OrderState::Accepted)?;
            let snapshot = order.clone();
            self.emit(&snapshot, OrderEventKind::Accepted, None);
        }

        let order = self
            .active
            .get_mut(&change.venue_order_id)
            .expect("checked above");
        if let Some(execution) = &execution {
            order.add_execution(execution.clone())?;
        }

        // Apply the reported state where it still moves forward; a report
        // that lags the local state (an "open" poll after a partial fill)
        // only counts for the execution it carried.
        let mut kind = kind;
        if new_state != order.state() {
            if order.state().can_transition_to(new_state) {
                order.switch_state(new_state)?;
            } else if execution.is_some() {
                kind = OrderEventKind::for_state(order.state())
                    .expect("active states carry an event kind");
            } else {
                tracing::debug!(
                    order = %change.venue_order_id,
                    from = ?order.state(),
                    to = ?new_state,
                    "ignoring stale state report"
                );
                return Ok(false);
            }
        } else if execution.is_none() {
            return Ok(false);
        }

        let snapshot = order.clone();
        if !snapshot.is_active() {
            self.active.remove(&change.venue_order_id);
            self.refresh_account_balance().await?;
        }
        self.emit(&snapshot, kind, execution);
        Ok(true)
    }

    /// Maker limit orders pay nothing in the internal model; market orders
    /// and taker fills pay the venue's rate on notional.
    fn fees(&self, venue_order_id: &str, price: Decimal, size: Decimal) -> Decimal {
        match self.active.get(venue_order_id) {
            Some(order) if order.is_limit() => Decimal::ZERO,
            _ => self.adapter.fee_rate() * price * size,
        }
    }

    fn emit(&self, order: &Order, kind: OrderEventKind, execution: Option<OrderExecutionInfo>) {
        let _ = self
            .order_events
            .send(OrderEvent::new(order, kind, execution));
    }
}
