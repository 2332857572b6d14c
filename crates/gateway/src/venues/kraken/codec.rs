//! Decoders for Kraken REST payloads.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

use tidebook_core::{
    CoreError, Currency, CurrencyPair, DeltaFields, MarketDelta, MarketSnapshot, Order,
    OrderAction, OrderState, Side, VenueId,
};

use crate::error::TransportError;
use crate::events::{DoneReason, OrderStateChange, WireOrderStatus};

/// Kraken reports epoch times as float seconds in most places and
/// milliseconds in a few; anything implausibly large for seconds is treated
/// as milliseconds.
pub(crate) fn ts_from_epoch(value: f64) -> DateTime<Utc> {
    let millis = if value > 1e12 { value } else { value * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

const LOCAL_SYMBOLS: [(CurrencyPair, &str); 4] = [
    (CurrencyPair::BTC_USD, "XXBTZUSD"),
    (CurrencyPair::BTC_EUR, "XXBTZEUR"),
    (CurrencyPair::ETH_USD, "XETHZUSD"),
    (CurrencyPair::ETH_BTC, "XETHXXBT"),
];

pub fn local_symbol(symbol: CurrencyPair) -> Result<&'static str, TransportError> {
    LOCAL_SYMBOLS
        .iter()
        .find(|(pair, _)| *pair == symbol)
        .map(|(_, local)| *local)
        .ok_or_else(|| TransportError::Decode(format!("{symbol} is not tradeable on kraken")))
}

pub fn symbol_from_local(local: &str) -> Result<CurrencyPair, TransportError> {
    LOCAL_SYMBOLS
        .iter()
        .find(|(_, l)| *l == local)
        .map(|(pair, _)| *pair)
        .ok_or_else(|| TransportError::Decode(format!("unknown kraken pair {local:?}")))
}

/// Kraken prefixes crypto assets with X and fiat with Z, inconsistently.
pub fn currency_from_asset(asset: &str) -> Option<Currency> {
    match asset {
        "XXBT" | "XBT" => Some(Currency::Btc),
        "XETH" | "ETH" => Some(Currency::Eth),
        "XLTC" | "LTC" => Some(Currency::Ltc),
        "ZUSD" | "USD" => Some(Currency::Usd),
        "ZEUR" | "EUR" => Some(Currency::Eur),
        "USDT" => Some(Currency::Usdt),
        "USDC" => Some(Currency::Usdc),
        _ => None,
    }
}

/// One side of a `public/Depth` result: rows of [price, volume, timestamp].
#[derive(Debug, Deserialize)]
pub struct DepthPair {
    pub bids: Vec<(Decimal, Decimal, f64)>,
    pub asks: Vec<(Decimal, Decimal, f64)>,
}

/// Every poll is a complete statement of the book; per-level timestamps
/// (seconds) become the rts, so the snapshot's syncpoint is the newest
/// level's timestamp in milliseconds.
pub fn snapshot_from_depth(depth: &DepthPair, symbol: CurrencyPair) -> MarketSnapshot {
    let assign = |&(price, size, ts): &(Decimal, Decimal, f64), side: Side| {
        MarketDelta::Assign(DeltaFields {
            rts: (ts * 1000.0) as u64,
            venue: VenueId::kraken(),
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
    MarketSnapshot::new(VenueId::kraken(), symbol, deltas)
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderDescription {
    pub pair: String,
    #[serde(rename = "type")]
    pub side: String,
    pub ordertype: String,
    pub price: Decimal,
}

/// An order record from OpenOrders/ClosedOrders/QueryOrders.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    pub status: String,
    pub opentm: f64,
    #[serde(default)]
    pub starttm: Option<f64>,
    #[serde(default)]
    pub closetm: Option<f64>,
    pub vol: Decimal,
    pub vol_exec: Decimal,
    /// Average fill price; 0 until the first execution.
    pub price: Decimal,
    #[serde(default)]
    pub fee: Option<Decimal>,
    pub descr: OrderDescription,
}

impl OrderInfo {
    fn action(&self) -> Result<OrderAction, TransportError> {
        match self.descr.side.as_str() {
            "buy" => Ok(OrderAction::Buy),
            "sell" => Ok(OrderAction::Sell),
            other => Err(TransportError::Decode(format!("invalid order side {other:?}"))),
        }
    }

    /// Execution timestamp: close time when present, start time otherwise.
    fn execution_ts(&self) -> DateTime<Utc> {
        match self.closetm.or(self.starttm) {
            Some(ts) if ts > 0.0 => ts_from_epoch(ts),
            _ => ts_from_epoch(self.opentm),
        }
    }
}

/// Rebuild an Order from a Kraken record, attaching one execution covering
/// the executed volume.
pub fn order_from_info(
    txid: &str,
    info: &OrderInfo,
    traits: tidebook_core::FloatTraits,
) -> Result<Order, TransportError> {
    let symbol = symbol_from_local(&info.descr.pair)?;
    let action = info.action()?;
    let mut order = match info.descr.ordertype.as_str() {
        "limit" => Order::limit(action, symbol, info.descr.price, info.vol, traits),
        "market" => Order::market(action, symbol, info.vol, traits),
        other => {
            return Err(TransportError::Core(CoreError::UnsupportedOrderType(
                other.to_string(),
            )));
        }
    };
    order.set_submitted(txid, ts_from_epoch(info.opentm));
    order.set_state(OrderState::Accepted);

    if info.vol_exec > Decimal::ZERO {
        let price = if info.price.is_zero() {
            info.descr.price
        } else {
            info.price
        };
        order
            .add_execution(tidebook_core::OrderExecutionInfo::new(
                price,
                info.vol_exec,
                info.fee.unwrap_or(Decimal::ZERO),
                info.execution_ts(),
            ))
            .map_err(TransportError::Core)?;
    }
    match info.status.as_str() {
        "canceled" => order.set_state(OrderState::Canceled),
        "expired" => order.set_state(OrderState::Expired),
        "closed" if !order.is_filled() => order.set_state(OrderState::Filled),
        _ => {}
    }
    Ok(order)
}

pub fn status_from_info(txid: &str, info: &OrderInfo) -> OrderStateChange {
    let status = match info.status.as_str() {
        "pending" => WireOrderStatus::Received,
        "open" if info.vol_exec > Decimal::ZERO => WireOrderStatus::Partial,
        "open" => WireOrderStatus::Open,
        "closed" => WireOrderStatus::Done(DoneReason::Filled),
        "expired" => WireOrderStatus::Done(DoneReason::Expired),
        _ => WireOrderStatus::Done(DoneReason::Canceled),
    };
    OrderStateChange {
        venue_order_id: txid.to_string(),
        status,
        price: if info.price.is_zero() {
            Some(info.descr.price)
        } else {
            Some(info.price)
        },
        filled_size: Some(info.vol_exec),
        remaining_size: Some(info.vol - info.vol_exec),
        commission: info.fee,
        timestamp: info.execution_ts(),
    }
}

/// Envelope every Kraken response arrives in.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub error: Vec<String>,
    pub result: Option<T>,
}

impl<T> Envelope<T> {
    pub fn into_result(self) -> Result<T, TransportError> {
        if let Some(first) = self.error.first() {
            return Err(classify_error(first, &self.error.join("; ")));
        }
        self.result
            .ok_or_else(|| TransportError::Decode("response without result".into()))
    }
}

fn classify_error(first: &str, all: &str) -> TransportError {
    if first.starts_with("EAPI:Invalid key")
        || first.starts_with("EAPI:Invalid signature")
        || first.starts_with("EAPI:Invalid nonce")
    {
        TransportError::Auth(all.to_string())
    } else if first.contains("Rate limit") || first.contains("Too many requests") {
        TransportError::RateLimited {
            retry_after: std::time::Duration::from_secs(5),
        }
    } else if first.starts_with("EOrder:Unknown order") {
        TransportError::NotActive
    } else {
        TransportError::VenueRejected {
            code: first.to_string(),
            text: all.to_string(),
        }
    }
}

pub type DepthResult = HashMap<String, DepthPair>;

#[derive(Debug, Deserialize)]
pub struct OpenOrdersResult {
    pub open: HashMap<String, OrderInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ClosedOrdersResult {
    pub closed: HashMap<String, OrderInfo>,
}

#[derive(Debug, Deserialize)]
pub struct AddOrderResult {
    pub txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssetPairInfo {
    pub lot_decimals: u32,
    pub pair_decimals: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ORDER_JSON: &str = r#"{
        "status": "open",
        "opentm": 1688666559.8974,
        "starttm": 0,
        "vol": "1.25",
        "vol_exec": "0.5",
        "price": "30010.0",
        "fee": "0.9",
        "descr": {"pair": "XXBTZUSD", "type": "buy", "ordertype": "limit", "price": "30000.0"}
    }"#;

    #[test]
    fn test_symbol_bijection() {
        assert_eq!(local_symbol(CurrencyPair::BTC_USD).unwrap(), "XXBTZUSD");
        assert_eq!(
            symbol_from_local("XXBTZUSD").unwrap(),
            CurrencyPair::BTC_USD
        );
        assert!(local_symbol(CurrencyPair::ETH_USDT).is_err());
    }

    #[test]
    fn test_depth_snapshot_uses_level_timestamps() {
        let depth: DepthPair = serde_json::from_str(
            r#"{"bids":[["30000.1","1.2",1688666550]],"asks":[["30001.5","0.8",1688666555]]}"#,
        )
        .unwrap();
        let snapshot = snapshot_from_depth(&depth, CurrencyPair::BTC_USD);
        assert_eq!(snapshot.deltas.len(), 2);
        assert_eq!(snapshot.syncpoint(), Some(1688666555000));
    }

    #[test]
    fn test_order_from_info_partial_fill() {
        let info: OrderInfo = serde_json::from_str(ORDER_JSON).unwrap();
        let order = order_from_info("OTXID-1", &info, Default::default()).unwrap();
        assert_eq!(order.state(), OrderState::PartiallyFilled);
        assert_eq!(order.filled_size(), dec!(0.5));
        assert_eq!(order.avg_fill_price(), Some(dec!(30010.0)));
        assert_eq!(order.id(), Some("OTXID-1"));
    }

    #[test]
    fn test_status_from_info() {
        let info: OrderInfo = serde_json::from_str(ORDER_JSON).unwrap();
        let change = status_from_info("OTXID-1", &info);
        assert_eq!(change.status, WireOrderStatus::Partial);
        assert_eq!(change.remaining_size, Some(dec!(0.75)));
    }

    #[test]
    fn test_epoch_heuristic() {
        // Seconds vs milliseconds both land in 2023.
        let from_secs = ts_from_epoch(1688666559.8);
        let from_millis = ts_from_epoch(1688666559800.0);
        assert_eq!(from_secs.timestamp(), from_millis.timestamp());
    }

    #[test]
    fn test_envelope_error_classification() {
        let env: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"error":["EOrder:Unknown order"]}"#).unwrap();
        assert!(matches!(
            env.into_result(),
            Err(TransportError::NotActive)
        ));

        let env: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"error":["EAPI:Invalid key"]}"#).unwrap();
        assert!(matches!(env.into_result(), Err(TransportError::Auth(_))));

        let env: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"error":[],"result":{"ok":true}}"#).unwrap();
        assert!(env.into_result().is_ok());
    }
}
