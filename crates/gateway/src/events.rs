use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;

use tidebook_core::{
    CurrencyPair, MarketSnapshot, Order, OrderEventKind, OrderExecutionInfo, OrderState, VenueId,
};

/// Normalized events a feed worker delivers to its consumer.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Transport is up. `initialized` flips to true once the initialization
    /// handshake (subscribe + snapshot sync) has completed.
    Connected { initialized: bool },
    Disconnected { reason: String },
    /// Aggregated trade record, suitable for bar construction downstream.
    Trade(TradeTick),
    /// Same execution with maker/taker identity, for order correlation.
    Match(MatchInfo),
    /// The book's normalized snapshot after an applied update.
    OrderBookUpdate(MarketSnapshot),
    /// A state transition observed (or synthesized by polling) for one of
    /// the user's orders.
    OrderChange(OrderStateChange),
}

impl FeedEvent {
    /// Book updates are the only events the dispatch queue may shed under
    /// overflow.
    pub fn is_book_update(&self) -> bool {
        matches!(self, FeedEvent::OrderBookUpdate(_))
    }
}

/// Taker direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    /// The aggressor bought.
    Up,
    /// The aggressor sold.
    Down,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeTick {
    pub venue: VenueId,
    pub symbol: CurrencyPair,
    pub price: Decimal,
    pub size: Decimal,
    pub direction: TradeDirection,
    pub timestamp: DateTime<Utc>,
    pub rts: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchInfo {
    pub venue: VenueId,
    pub symbol: CurrencyPair,
    pub price: Decimal,
    pub size: Decimal,
    pub maker_order_id: String,
    pub taker_order_id: String,
    pub timestamp: DateTime<Utc>,
    pub rts: u64,
}

impl MatchInfo {
    /// The first of this match's order ids present in `ids`, if any. Used to
    /// correlate fills to active orders on either side of the match.
    pub fn involves(&self, ids: &HashSet<String>) -> Option<&str> {
        [&self.maker_order_id, &self.taker_order_id]
            .into_iter()
            .find(|id| ids.contains(id.as_str()))
            .map(String::as_str)
    }
}

/// Why a venue reported an order as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    Filled,
    Canceled,
    Rejected,
    Expired,
}

/// Venue-reported order status, normalized across venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireOrderStatus {
    Received,
    Open,
    Partial,
    Done(DoneReason),
}

/// A lifecycle transition for one of the user's orders, as seen on the wire
/// or synthesized from an open-orders poll.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderStateChange {
    pub venue_order_id: String,
    pub status: WireOrderStatus,
    pub price: Option<Decimal>,
    pub filled_size: Option<Decimal>,
    pub remaining_size: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl OrderStateChange {
    /// Synthesize a change from a polled order, for venues without a
    /// lifecycle stream. None when the order has no venue id yet.
    pub fn from_order(order: &Order) -> Option<OrderStateChange> {
        let status = match order.state() {
            OrderState::Initial | OrderState::Submitted => WireOrderStatus::Received,
            OrderState::Accepted => WireOrderStatus::Open,
            OrderState::PartiallyFilled => WireOrderStatus::Partial,
            OrderState::Filled => WireOrderStatus::Done(DoneReason::Filled),
            OrderState::Canceled => WireOrderStatus::Done(DoneReason::Canceled),
            OrderState::Rejected => WireOrderStatus::Done(DoneReason::Rejected),
            OrderState::Expired => WireOrderStatus::Done(DoneReason::Expired),
        };
        Some(OrderStateChange {
            venue_order_id: order.id()?.to_string(),
            status,
            price: order.kind().limit_price().or(order.avg_fill_price()),
            filled_size: Some(order.filled_size()),
            remaining_size: Some(order.remaining()),
            commission: None,
            timestamp: Utc::now(),
        })
    }

    /// The order state this change lands in, with the event kind announcing
    /// it.
    pub fn new_state(&self) -> (OrderState, OrderEventKind) {
        let state = match self.status {
            WireOrderStatus::Received | WireOrderStatus::Open => OrderState::Accepted,
            WireOrderStatus::Partial => OrderState::PartiallyFilled,
            WireOrderStatus::Done(DoneReason::Filled) => OrderState::Filled,
            WireOrderStatus::Done(DoneReason::Canceled) => OrderState::Canceled,
            WireOrderStatus::Done(DoneReason::Rejected) => OrderState::Rejected,
            WireOrderStatus::Done(DoneReason::Expired) => OrderState::Expired,
        };
        let kind = OrderEventKind::for_state(state).expect("lifecycle states carry an event kind");
        (state, kind)
    }

    /// Synthesize the execution this change implies for `order`, from the
    /// reported price and filled/remaining sizes. None when the change does
    /// not report any new fill.
    pub fn execution_for(&self, order: &Order) -> Option<OrderExecutionInfo> {
        let price = self.price?;
        let quantity = if let Some(filled) = self.filled_size {
            filled - order.filled_size()
        } else if let Some(remaining) = self.remaining_size {
            order.remaining() - remaining
        } else {
            return None;
        };
        if quantity <= Decimal::ZERO {
            return None;
        }
        Some(OrderExecutionInfo::new(
            price,
            quantity,
            self.commission.unwrap_or(Decimal::ZERO),
            self.timestamp,
        ))
    }
}

/// Keeps trade timestamps strictly monotone: a trade whose wire timestamp is
/// equal to or earlier than its predecessor is bumped 1 ms past it. This is
/// documented behavior of the normalized Trade event.
#[derive(Debug, Default)]
pub struct TradeClock {
    last: Option<DateTime<Utc>>,
}

impl TradeClock {
    pub fn new() -> Self {
        TradeClock::default()
    }

    pub fn normalize(&mut self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let ts = match self.last {
            Some(last) if ts <= last => last + Duration::milliseconds(1),
            _ => ts,
        };
        self.last = Some(ts);
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_match_involves_either_side() {
        let m = MatchInfo {
            venue: VenueId::coinbase(),
            symbol: CurrencyPair::BTC_USD,
            price: dec!(30000),
            size: dec!(0.5),
            maker_order_id: "maker-1".into(),
            taker_order_id: "taker-2".into(),
            timestamp: Utc::now(),
            rts: 1,
        };
        let mut ids = HashSet::new();
        assert_eq!(m.involves(&ids), None);
        ids.insert("taker-2".to_string());
        assert_eq!(m.involves(&ids), Some("taker-2"));
        ids.insert("maker-1".to_string());
        assert_eq!(m.involves(&ids), Some("maker-1"));
    }

    #[test]
    fn test_trade_clock_bumps_non_increasing() {
        let mut clock = TradeClock::new();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(clock.normalize(t0), t0);
        let bumped = clock.normalize(t0);
        assert_eq!(bumped, t0 + Duration::milliseconds(1));
        // An earlier wire timestamp still moves forward.
        let again = clock.normalize(t0 - Duration::seconds(1));
        assert_eq!(again, t0 + Duration::milliseconds(2));
        // A later one passes through untouched.
        let later = t0 + Duration::seconds(1);
        assert_eq!(clock.normalize(later), later);
    }

    #[test]
    fn test_state_change_mapping() {
        let change = OrderStateChange {
            venue_order_id: "abc".into(),
            status: WireOrderStatus::Done(DoneReason::Canceled),
            price: None,
            filled_size: None,
            remaining_size: None,
            commission: None,
            timestamp: Utc::now(),
        };
        let (state, kind) = change.new_state();
        assert_eq!(state, OrderState::Canceled);
        assert_eq!(kind, OrderEventKind::Canceled);
    }

    #[test]
    fn test_execution_synthesis_from_remaining() {
        use tidebook_core::{FloatTraits, OrderAction};
        let mut order = Order::limit(
            OrderAction::Buy,
            CurrencyPair::BTC_USD,
            dec!(100),
            dec!(2),
            FloatTraits::default(),
        );
        order.set_submitted("abc", Utc::now());
        order.switch_state(OrderState::Submitted).unwrap();
        order.switch_state(OrderState::Accepted).unwrap();

        let change = OrderStateChange {
            venue_order_id: "abc".into(),
            status: WireOrderStatus::Done(DoneReason::Filled),
            price: Some(dec!(100)),
            filled_size: None,
            remaining_size: Some(dec!(0.5)),
            commission: None,
            timestamp: Utc::now(),
        };
        let oei = change.execution_for(&order).unwrap();
        assert_eq!(oei.quantity, dec!(1.5));

        // Nothing new reported: no execution.
        let change = OrderStateChange {
            remaining_size: Some(dec!(2)),
            ..change
        };
        assert!(change.execution_for(&order).is_none());
    }
}
