//! Decoders for the Coinbase full-feed websocket dialect and REST payloads.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use tidebook_core::{
    CoreError, CurrencyPair, DeltaFields, MarketDelta, MarketSnapshot, Order, OrderAction,
    OrderState, Side, VenueId,
};

use crate::error::TransportError;
use crate::events::{
    DoneReason, MatchInfo, OrderStateChange, TradeDirection, TradeTick, WireOrderStatus,
};

/// One message from the `full` channel. received/open/done/match/change all
/// share a field bag; which fields are present depends on the type.
#[derive(Debug, Clone, Deserialize)]
pub struct FullFeedMessage {
    pub sequence: u64,
    pub time: Option<String>,
    pub product_id: Option<String>,
    pub order_id: Option<String>,
    pub maker_order_id: Option<String>,
    pub taker_order_id: Option<String>,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
    pub remaining_size: Option<Decimal>,
    pub old_size: Option<Decimal>,
    pub new_size: Option<Decimal>,
    pub side: Option<String>,
    pub order_type: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Received(FullFeedMessage),
    Open(FullFeedMessage),
    Done(FullFeedMessage),
    Match(FullFeedMessage),
    Change(FullFeedMessage),
    Heartbeat,
    Subscriptions,
    Error { message: String },
}

pub fn side_from_wire(side: &str) -> Result<Side, CoreError> {
    match side {
        "buy" => Ok(Side::Bid),
        "sell" => Ok(Side::Ask),
        other => Err(CoreError::InvalidSide(other.to_string())),
    }
}

fn parse_ts(time: Option<&str>) -> DateTime<Utc> {
    time.and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Convert one full-feed message into normalized book deltas. The book sees
/// open as an Increase of the resting size, match and done as Decreases, and
/// change as a Decrease by the size delta. Market-order messages carry no
/// price and touch nothing.
pub fn book_deltas(
    message: &WsMessage,
    symbol: CurrencyPair,
) -> Result<Vec<MarketDelta>, TransportError> {
    let (msg, kind) = match message {
        WsMessage::Open(m) => (m, BookDeltaKind::Open),
        WsMessage::Done(m) => (m, BookDeltaKind::Done),
        WsMessage::Match(m) => (m, BookDeltaKind::Match),
        WsMessage::Change(m) => (m, BookDeltaKind::Change),
        _ => return Ok(Vec::new()),
    };
    if msg.order_type.as_deref() == Some("market") {
        return Ok(Vec::new());
    }
    let Some(price) = msg.price else {
        // change/done of a market order
        return Ok(Vec::new());
    };
    let side = side_from_wire(
        msg.side
            .as_deref()
            .ok_or_else(|| TransportError::Decode("message without side".into()))?,
    )
    .map_err(TransportError::Core)?;

    let (variant, size): (fn(DeltaFields) -> MarketDelta, Decimal) = match kind {
        BookDeltaKind::Open => (
            MarketDelta::Increase,
            require(msg.remaining_size, "open without remaining_size")?,
        ),
        BookDeltaKind::Done => (
            MarketDelta::Decrease,
            require(msg.remaining_size, "done without remaining_size")?,
        ),
        BookDeltaKind::Match => (
            MarketDelta::Decrease,
            require(msg.size, "match without size")?,
        ),
        BookDeltaKind::Change => {
            let old = require(msg.old_size, "change without old_size")?;
            let new = require(msg.new_size, "change without new_size")?;
            (MarketDelta::Decrease, old - new)
        }
    };

    Ok(vec![variant(DeltaFields {
        rts: msg.sequence,
        venue: VenueId::coinbase(),
        symbol,
        price,
        size,
        side,
    })])
}

enum BookDeltaKind {
    Open,
    Done,
    Match,
    Change,
}

fn require(value: Option<Decimal>, what: &str) -> Result<Decimal, TransportError> {
    value.ok_or_else(|| TransportError::Decode(what.to_string()))
}

/// The lifecycle transition a received/done message reports for the order it
/// names, if it names one.
pub fn order_change(message: &WsMessage) -> Option<OrderStateChange> {
    let (msg, status) = match message {
        WsMessage::Received(m) => (m, WireOrderStatus::Received),
        WsMessage::Done(m) => {
            let filled = m.reason.as_deref() == Some("filled")
                && m.remaining_size.unwrap_or(Decimal::ZERO).is_zero();
            let reason = if filled {
                DoneReason::Filled
            } else {
                DoneReason::Canceled
            };
            (m, WireOrderStatus::Done(reason))
        }
        _ => return None,
    };
    Some(OrderStateChange {
        venue_order_id: msg.order_id.clone()?,
        status,
        price: msg.price,
        filled_size: None,
        remaining_size: msg.remaining_size,
        commission: None,
        timestamp: parse_ts(msg.time.as_deref()),
    })
}

/// A match message as both correlation record and aggregated trade. The
/// wire side is the maker's, so a selling maker means the aggressor bought.
pub fn trade_and_match(
    msg: &FullFeedMessage,
    symbol: CurrencyPair,
) -> Result<(MatchInfo, TradeTick), TransportError> {
    let price = require(msg.price, "match without price")?;
    let size = require(msg.size, "match without size")?;
    let side = side_from_wire(
        msg.side
            .as_deref()
            .ok_or_else(|| TransportError::Decode("match without side".into()))?,
    )
    .map_err(TransportError::Core)?;
    let timestamp = parse_ts(msg.time.as_deref());

    let matched = MatchInfo {
        venue: VenueId::coinbase(),
        symbol,
        price,
        size,
        maker_order_id: msg.maker_order_id.clone().unwrap_or_default(),
        taker_order_id: msg.taker_order_id.clone().unwrap_or_default(),
        timestamp,
        rts: msg.sequence,
    };
    let tick = TradeTick {
        venue: VenueId::coinbase(),
        symbol,
        price,
        size,
        direction: match side {
            Side::Ask => TradeDirection::Up,
            Side::Bid => TradeDirection::Down,
        },
        timestamp,
        rts: msg.sequence,
    };
    Ok((matched, tick))
}

/// REST book response (level 2): rows are [price, size, num-orders].
#[derive(Debug, Deserialize)]
pub struct BookResponse {
    pub sequence: u64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Deserialize)]
pub struct BookLevel(pub Decimal, pub Decimal, pub serde_json::Value);

pub fn snapshot_from_book(book: BookResponse, symbol: CurrencyPair) -> MarketSnapshot {
    let assign = |level: &BookLevel, side: Side| {
        MarketDelta::Assign(DeltaFields {
            rts: book.sequence,
            venue: VenueId::coinbase(),
            symbol,
            price: level.0,
            size: level.1,
            side,
        })
    };
    let deltas = book
        .bids
        .iter()
        .map(|l| assign(l, Side::Bid))
        .chain(book.asks.iter().map(|l| assign(l, Side::Ask)))
        .collect();
    MarketSnapshot::new(VenueId::coinbase(), symbol, deltas)
}

/// REST order record.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    pub id: String,
    pub product_id: String,
    pub side: String,
    pub size: Option<Decimal>,
    pub price: Option<Decimal>,
    pub status: Option<String>,
    pub done_reason: Option<String>,
    pub filled_size: Option<Decimal>,
    pub executed_value: Option<Decimal>,
    pub fill_fees: Option<Decimal>,
    pub created_at: Option<String>,
    pub done_at: Option<String>,
}

impl OrderInfo {
    fn action(&self) -> Result<OrderAction, TransportError> {
        match self.side.as_str() {
            "buy" => Ok(OrderAction::Buy),
            "sell" => Ok(OrderAction::Sell),
            other => Err(TransportError::Decode(format!("invalid order side {other:?}"))),
        }
    }
}

/// Rebuild an open order from its REST record. No executions are attached;
/// the filled state is only reflected in the lifecycle state, as with the
/// live feed before any local match arrives.
pub fn order_from_info(
    info: &OrderInfo,
    symbol: CurrencyPair,
    traits: tidebook_core::FloatTraits,
) -> Result<Order, TransportError> {
    let action = info.action()?;
    let size = info
        .size
        .or(info.filled_size)
        .ok_or_else(|| TransportError::Decode("order without size".into()))?;
    let mut order = match info.price {
        Some(price) => Order::limit(action, symbol, price, size, traits),
        None => Order::market(action, symbol, size, traits),
    };
    order.set_submitted(info.id.clone(), parse_ts(info.created_at.as_deref()));

    let state = if info.done_at.is_none() {
        if info.filled_size.unwrap_or(Decimal::ZERO) > Decimal::ZERO {
            OrderState::PartiallyFilled
        } else {
            OrderState::Accepted
        }
    } else if info.done_reason.as_deref() == Some("canceled") {
        OrderState::Canceled
    } else {
        OrderState::Filled
    };
    order.set_state(state);
    Ok(order)
}

/// Rebuild a closed order, attaching one synthetic execution covering the
/// reported fill so the execution-sum invariant holds.
pub fn order_from_closed(
    info: &OrderInfo,
    symbol: CurrencyPair,
    traits: tidebook_core::FloatTraits,
) -> Result<Order, TransportError> {
    let action = info.action()?;
    let size = info
        .size
        .or(info.filled_size)
        .ok_or_else(|| TransportError::Decode("order without size".into()))?;
    let mut order = match info.price {
        Some(price) => Order::limit(action, symbol, price, size, traits),
        None => Order::market(action, symbol, size, traits),
    };
    order.set_submitted(info.id.clone(), parse_ts(info.created_at.as_deref()));
    order.set_state(OrderState::Accepted);

    let filled = info.filled_size.unwrap_or(Decimal::ZERO);
    if filled > Decimal::ZERO {
        let avg_price = info
            .executed_value
            .map(|v| v / filled)
            .or(info.price)
            .unwrap_or(Decimal::ZERO);
        let execution = tidebook_core::OrderExecutionInfo::new(
            avg_price,
            filled,
            info.fill_fees.unwrap_or(Decimal::ZERO),
            parse_ts(info.done_at.as_deref()),
        );
        order.add_execution(execution).map_err(TransportError::Core)?;
    }
    if info.done_reason.as_deref() == Some("canceled") {
        order.set_state(OrderState::Canceled);
    } else if !order.is_filled() {
        order.set_state(OrderState::Filled);
    }
    Ok(order)
}

/// Current status of one order as an OrderStateChange.
pub fn status_from_info(info: &OrderInfo) -> OrderStateChange {
    let filled = info.filled_size.unwrap_or(Decimal::ZERO);
    let status = match info.status.as_deref() {
        Some("pending") => WireOrderStatus::Received,
        Some("done") => match info.done_reason.as_deref() {
            Some("filled") => WireOrderStatus::Done(DoneReason::Filled),
            Some("rejected") => WireOrderStatus::Done(DoneReason::Rejected),
            _ => WireOrderStatus::Done(DoneReason::Canceled),
        },
        _ if filled > Decimal::ZERO => WireOrderStatus::Partial,
        _ => WireOrderStatus::Open,
    };
    OrderStateChange {
        venue_order_id: info.id.clone(),
        status,
        price: info.price.or_else(|| {
            info.executed_value
                .and_then(|v| (!filled.is_zero()).then(|| v / filled))
        }),
        filled_size: Some(filled),
        remaining_size: info.size.map(|s| s - filled),
        commission: info.fill_fees,
        timestamp: parse_ts(info.done_at.as_deref().or(info.created_at.as_deref())),
    }
}
