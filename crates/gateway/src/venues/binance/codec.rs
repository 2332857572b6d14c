//! Decoders for Binance combined-stream messages and REST payloads.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use tidebook_core::{
    CoreError, CurrencyPair, DeltaFields, MarketDelta, MarketSnapshot, Order, OrderAction,
    OrderExecutionInfo, OrderState, Side, VenueId,
};

use crate::error::TransportError;
use crate::events::{
    DoneReason, MatchInfo, OrderStateChange, TradeDirection, TradeTick, WireOrderStatus,
};

pub(crate) fn ts_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// A message from a `@depth` or `@trade` stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
pub enum StreamMessage {
    #[serde(rename = "depthUpdate")]
    DepthUpdate(DepthUpdate),
    #[serde(rename = "trade")]
    Trade(TradeMessage),
}

#[derive(Debug, Deserialize)]
pub struct DepthUpdate {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<(Decimal, Decimal)>,
    #[serde(rename = "a")]
    pub asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
pub struct TradeMessage {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "b")]
    pub buyer_order_id: u64,
    #[serde(rename = "a")]
    pub seller_order_id: u64,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

/// Depth diffs arrive as absolute sizes: every row is an Assign keyed by the
/// batch's final update id, which is the stream's syncpoint.
pub fn deltas_from_depth(update: &DepthUpdate, symbol: CurrencyPair) -> Vec<MarketDelta> {
    let assign = |&(price, size): &(Decimal, Decimal), side: Side| {
        MarketDelta::Assign(DeltaFields {
            rts: update.final_update_id,
            venue: VenueId::binance(),
            symbol,
            price,
            size,
            side,
        })
    };
    update
        .bids
        .iter()
        .map(|row| assign(row, Side::Bid))
        .chain(update.asks.iter().map(|row| assign(row, Side::Ask)))
        .collect()
}

/// A trade as both correlation record and aggregated tick. When the buyer
/// was the maker the aggressor sold.
pub fn trade_and_match(msg: &TradeMessage, symbol: CurrencyPair) -> (MatchInfo, TradeTick) {
    let timestamp = ts_millis(msg.trade_time);
    let (maker, taker) = if msg.buyer_is_maker {
        (msg.buyer_order_id, msg.seller_order_id)
    } else {
        (msg.seller_order_id, msg.buyer_order_id)
    };
    let matched = MatchInfo {
        venue: VenueId::binance(),
        symbol,
        price: msg.price,
        size: msg.quantity,
        maker_order_id: maker.to_string(),
        taker_order_id: taker.to_string(),
        timestamp,
        rts: msg.event_time as u64,
    };
    let tick = TradeTick {
        venue: VenueId::binance(),
        symbol,
        price: msg.price,
        size: msg.quantity,
        direction: if msg.buyer_is_maker {
            TradeDirection::Down
        } else {
            TradeDirection::Up
        },
        timestamp,
        rts: msg.event_time as u64,
    };
    (matched, tick)
}

/// REST `v1/depth` response.
#[derive(Debug, Deserialize)]
pub struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

pub fn snapshot_from_depth(depth: DepthResponse, symbol: CurrencyPair) -> MarketSnapshot {
    let assign = |&(price, size): &(Decimal, Decimal), side: Side| {
        MarketDelta::Assign(DeltaFields {
            rts: depth.last_update_id,
            venue: VenueId::binance(),
            symbol,
            price,
            size,
            side,
        })
    };
    let deltas = depth
        .bids
        .iter()
        .map(|row| assign(row, Side::Bid))
        .chain(depth.asks.iter().map(|row| assign(row, Side::Ask)))
        .collect();
    MarketSnapshot::new(VenueId::binance(), symbol, deltas)
}

/// REST order record (`openOrders`, `allOrders`, `order`).
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    pub symbol: String,
    #[serde(rename = "orderId")]
    pub order_id: u64,
    pub price: Decimal,
    #[serde(rename = "origQty")]
    pub orig_qty: Decimal,
    #[serde(rename = "executedQty", default)]
    pub executed_qty: Decimal,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(rename = "updateTime", default)]
    pub update_time: Option<i64>,
}

/// REST `myTrades` record.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeInfo {
    pub id: u64,
    #[serde(rename = "orderId")]
    pub order_id: u64,
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub time: i64,
}

pub fn execution_from_trade(trade: &TradeInfo) -> OrderExecutionInfo {
    OrderExecutionInfo::new(
        trade.price,
        trade.qty,
        trade.commission,
        ts_millis(trade.time),
    )
}

/// Rebuild an Order from its REST record, with optional per-trade
/// executions from `myTrades`.
///
/// The venue's PARTIALLY_FILLED and FILLED statuses both land in Accepted
/// here: appending the execution info is what advances the order, so a fully
/// executed record ends Filled through the ordinary path.
pub fn order_from_info(
    info: &OrderInfo,
    symbol: CurrencyPair,
    traits: tidebook_core::FloatTraits,
    executions: Option<&[OrderExecutionInfo]>,
) -> Result<Order, TransportError> {
    let action = match info.side.as_str() {
        "BUY" => OrderAction::Buy,
        "SELL" => OrderAction::Sell,
        other => return Err(TransportError::Decode(format!("invalid order side {other:?}"))),
    };
    let mut order = match info.order_type.as_str() {
        "LIMIT" => Order::limit(action, symbol, info.price, info.orig_qty, traits),
        "MARKET" => Order::market(action, symbol, info.orig_qty, traits),
        other => {
            return Err(TransportError::Core(CoreError::UnsupportedOrderType(
                other.to_string(),
            )));
        }
    };
    order.set_submitted(
        info.order_id.to_string(),
        ts_millis(info.time.or(info.update_time).unwrap_or_default()),
    );

    let (base_state, reports_fill) = match info.status.as_str() {
        "NEW" | "PENDING_CANCEL" => (OrderState::Accepted, false),
        "PARTIALLY_FILLED" => (OrderState::Accepted, true),
        "FILLED" => (OrderState::Accepted, true),
        "CANCELED" => (OrderState::Canceled, false),
        "REJECTED" => (OrderState::Rejected, false),
        "EXPIRED" => (OrderState::Expired, false),
        other => {
            return Err(TransportError::Decode(format!(
                "unsupported order status {other:?}"
            )));
        }
    };
    order.set_state(OrderState::Accepted);

    if let Some(executions) = executions {
        for execution in executions {
            order
                .add_execution(execution.clone())
                .map_err(TransportError::Core)?;
        }
    } else if info.executed_qty > Decimal::ZERO || reports_fill {
        let execution = OrderExecutionInfo::new(
            info.price,
            info.executed_qty,
            Decimal::ZERO,
            ts_millis(info.update_time.or(info.time).unwrap_or_default()),
        );
        if execution.quantity > Decimal::ZERO {
            order
                .add_execution(execution)
                .map_err(TransportError::Core)?;
        }
    }

    if base_state.is_terminal() {
        order.set_state(base_state);
    }
    Ok(order)
}

pub fn status_from_info(info: &OrderInfo) -> OrderStateChange {
    let status = match info.status.as_str() {
        "NEW" | "PENDING_CANCEL" => WireOrderStatus::Open,
        "PARTIALLY_FILLED" => WireOrderStatus::Partial,
        "FILLED" => WireOrderStatus::Done(DoneReason::Filled),
        "CANCELED" => WireOrderStatus::Done(DoneReason::Canceled),
        "REJECTED" => WireOrderStatus::Done(DoneReason::Rejected),
        _ => WireOrderStatus::Done(DoneReason::Expired),
    };
    OrderStateChange {
        venue_order_id: info.order_id.to_string(),
        status,
        price: (!info.price.is_zero()).then_some(info.price),
        filled_size: Some(info.executed_qty),
        remaining_size: Some(info.orig_qty - info.executed_qty),
        commission: None,
        timestamp: ts_millis(info.update_time.or(info.time).unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_depth_update_to_assigns() {
        let msg: StreamMessage = serde_json::from_str(
            r#"{"e":"depthUpdate","E":1618,"s":"BTCUSDT","U":101,"u":103,
                "b":[["50000.00","1.5"],["49999.00","0"]],"a":[["50001.00","2.0"]]}"#,
        )
        .unwrap();
        let StreamMessage::DepthUpdate(update) = msg else {
            panic!("expected depth update");
        };
        let deltas = deltas_from_depth(&update, CurrencyPair::BTC_USDT);
        assert_eq!(deltas.len(), 3);
        assert!(deltas.iter().all(|d| d.rts() == 103));
        assert!(deltas.iter().all(|d| matches!(d, MarketDelta::Assign(_))));
        // Zero-size assign removes the level on apply.
        assert_eq!(deltas[1].fields().size, dec!(0));
    }

    #[test]
    fn test_trade_maker_taker_resolution() {
        let msg: StreamMessage = serde_json::from_str(
            r#"{"e":"trade","E":1618,"s":"BTCUSDT","t":7,"p":"50000.00","q":"0.25",
                "b":11,"a":22,"T":1618000000000,"m":true}"#,
        )
        .unwrap();
        let StreamMessage::Trade(trade) = msg else {
            panic!("expected trade");
        };
        let (matched, tick) = trade_and_match(&trade, CurrencyPair::BTC_USDT);
        // Buyer is maker: the buy order rested, the sell order aggressed.
        assert_eq!(matched.maker_order_id, "11");
        assert_eq!(matched.taker_order_id, "22");
        assert_eq!(tick.direction, TradeDirection::Down);
    }

    #[test]
    fn test_snapshot_syncpoint_is_last_update_id() {
        let depth: DepthResponse = serde_json::from_str(
            r#"{"lastUpdateId":100,"bids":[["49000","1"]],"asks":[["51000","2"]]}"#,
        )
        .unwrap();
        let snapshot = snapshot_from_depth(depth, CurrencyPair::BTC_USDT);
        assert_eq!(snapshot.syncpoint(), Some(100));
        assert_eq!(snapshot.deltas.len(), 2);
    }

    #[test]
    fn test_filled_order_lands_filled_via_execution() {
        let info: OrderInfo = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","orderId":42,"price":"50000","origQty":"1.0",
                "executedQty":"1.0","status":"FILLED","type":"LIMIT","side":"BUY",
                "time":1618000000000,"updateTime":1618000060000}"#,
        )
        .unwrap();
        let order =
            order_from_info(&info, CurrencyPair::BTC_USDT, Default::default(), None).unwrap();
        // Status mapped to Accepted; the appended execution made it Filled.
        assert_eq!(order.state(), OrderState::Filled);
        assert_eq!(order.filled_size(), dec!(1.0));
        assert_eq!(order.id(), Some("42"));
    }

    #[test]
    fn test_canceled_order_keeps_partial_fill() {
        let info: OrderInfo = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","orderId":42,"price":"50000","origQty":"1.0",
                "executedQty":"0.3","status":"CANCELED","type":"LIMIT","side":"SELL",
                "time":1618000000000}"#,
        )
        .unwrap();
        let order =
            order_from_info(&info, CurrencyPair::BTC_USDT, Default::default(), None).unwrap();
        assert_eq!(order.state(), OrderState::Canceled);
        assert_eq!(order.filled_size(), dec!(0.3));
    }

    #[test]
    fn test_stop_order_type_unsupported() {
        let info: OrderInfo = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","orderId":42,"price":"50000","origQty":"1.0",
                "executedQty":"0","status":"NEW","type":"STOP_LOSS","side":"BUY"}"#,
        )
        .unwrap();
        assert!(matches!(
            order_from_info(&info, CurrencyPair::BTC_USDT, Default::default(), None),
            Err(TransportError::Core(CoreError::UnsupportedOrderType(_)))
        ));
    }

    #[test]
    fn test_status_change_mapping() {
        let info: OrderInfo = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","orderId":42,"price":"50000","origQty":"1.0",
                "executedQty":"0.4","status":"PARTIALLY_FILLED","type":"LIMIT","side":"BUY",
                "updateTime":1618000060000}"#,
        )
        .unwrap();
        let change = status_from_info(&info);
        assert_eq!(change.status, WireOrderStatus::Partial);
        assert_eq!(change.filled_size, Some(dec!(0.4)));
        assert_eq!(change.remaining_size, Some(dec!(0.6)));
    }
}
