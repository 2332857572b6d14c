use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;

use tidebook_core::{
    Currency, CurrencyPair, FloatTraits, MarketSnapshot, Order, OrderExecutionInfo, Side, VenueId,
};

use crate::adapter::{Balances, OrderFlag, VenueAdapter};
use crate::config::Credentials;
use crate::error::TransportError;
use crate::events::OrderStateChange;
use crate::limiter::RateLimiter;
use crate::venues::decode_json;

use super::codec::{
    self, DepthResponse, OrderInfo, TradeInfo, execution_from_trade, snapshot_from_depth,
};

pub const DEFAULT_REST_URL: &str = "https://api.binance.com/api";
pub const DEFAULT_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Request-weight headroom below the venue's 1200/minute budget.
const RATE_LIMIT_CALLS: usize = 1100;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

const RECV_WINDOW: u32 = 5000;
const PAGE_LIMIT: usize = 1000;

/// REST client for the Binance spot API. Signed endpoints append a
/// millisecond timestamp and recvWindow, then an HMAC-SHA256 hex signature
/// over the urlencoded parameters.
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    limiter: RateLimiter,
    exchange_info: OnceCell<ExchangeInfo>,
    /// The venue addresses orders by (symbol, orderId); remember which
    /// symbol each order id belongs to so cancel/status can be addressed by
    /// id alone.
    order_symbols: DashMap<String, CurrencyPair>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(rename = "baseAssetPrecision")]
    pub base_asset_precision: u32,
    #[serde(rename = "quotePrecision")]
    pub quote_precision: u32,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        BinanceClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
            limiter: RateLimiter::new(RATE_LIMIT_CALLS, RATE_LIMIT_WINDOW),
            exchange_info: OnceCell::new(),
            order_symbols: DashMap::new(),
        }
    }

    pub fn local_symbol(symbol: CurrencyPair) -> String {
        format!("{}{}", symbol.base.code(), symbol.quote.code())
    }

    pub fn symbol_from_local(local: &str) -> Result<CurrencyPair, TransportError> {
        // Longest quote suffix first, so BTCUSDT resolves to USDT not USD.
        let mut quotes = Currency::ALL;
        quotes.sort_by_key(|c| std::cmp::Reverse(c.code().len()));
        for quote in quotes {
            if let Some(base) = local.strip_suffix(quote.code())
                && let Ok(base) = base.parse::<Currency>()
            {
                return Ok(CurrencyPair::new(base, quote));
            }
        }
        Err(TransportError::Decode(format!("unknown symbol {local:?}")))
    }

    /// Sign `query`, returning the full parameter string with the signature
    /// appended; the signature is an HMAC-SHA256 hex digest of the exact
    /// bytes sent.
    pub(crate) fn signed_query(secret: &str, query: &str) -> Result<String, TransportError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|_| TransportError::Auth("invalid hmac key".into()))?;
        mac.update(query.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{query}&signature={signature}"))
    }

    fn build_query(params: &[(&str, String)]) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    async fn get_public<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, TransportError> {
        self.limiter.acquire().await;
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        decode_json(resp).await
    }

    async fn request_signed<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, TransportError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| TransportError::Auth("no credentials configured".into()))?;
        self.limiter.acquire().await;

        let mut params = params.to_vec();
        let timestamp = Utc::now().timestamp_millis().to_string();
        params.push(("timestamp", timestamp));
        params.push(("recvWindow", RECV_WINDOW.to_string()));
        let query = Self::build_query(&params);
        let signed = Self::signed_query(creds.secret.expose(), &query)?;

        let request = if method == Method::POST {
            self.http
                .post(format!("{}{}", self.base_url, path))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(signed)
        } else {
            self.http
                .request(method, format!("{}{}?{}", self.base_url, path, signed))
        };
        let resp = request.header("X-MBX-APIKEY", &creds.key).send().await?;
        decode_json(resp).await
    }

    pub async fn exchange_info(&self) -> Result<&ExchangeInfo, TransportError> {
        self.exchange_info
            .get_or_try_init(|| self.get_public("/v1/exchangeInfo"))
            .await
    }

    pub async fn depth(
        &self,
        symbol: CurrencyPair,
        limit: u32,
    ) -> Result<DepthResponse, TransportError> {
        self.get_public(&format!(
            "/v1/depth?symbol={}&limit={}",
            Self::local_symbol(symbol),
            limit
        ))
        .await
    }

    fn remember_order(&self, order_id: &str, symbol: CurrencyPair) {
        self.order_symbols.insert(order_id.to_string(), symbol);
    }

    fn symbol_for_order(&self, order_id: &str) -> Result<CurrencyPair, TransportError> {
        self.order_symbols
            .get(order_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| TransportError::Decode(format!("unknown order id {order_id:?}")))
    }

    async fn traits_for(&self, symbol: CurrencyPair) -> Result<FloatTraits, TransportError> {
        let local = Self::local_symbol(symbol);
        let info = self.exchange_info().await?;
        info.symbols
            .iter()
            .find(|s| s.symbol == local)
            .map(|s| FloatTraits::new(s.base_asset_precision, s.quote_precision))
            .ok_or_else(|| TransportError::Decode(format!("symbol {local:?} not tradeable")))
    }

    async fn all_orders_page(
        &self,
        symbol: CurrencyPair,
        min_order_id: Option<u64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderInfo>, TransportError> {
        let mut params = vec![
            ("symbol", Self::local_symbol(symbol)),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        match min_order_id {
            Some(id) => params.push(("orderId", id.to_string())),
            None => params.push(("startTime", since.timestamp_millis().to_string())),
        }
        self.request_signed(Method::GET, "/v3/allOrders", &params)
            .await
    }

    async fn my_trades_page(
        &self,
        symbol: CurrencyPair,
        min_trade_id: Option<u64>,
        since: DateTime<Utc>,
    ) -> Result<Vec<TradeInfo>, TransportError> {
        let mut params = vec![
            ("symbol", Self::local_symbol(symbol)),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        match min_trade_id {
            Some(id) => params.push(("fromId", id.to_string())),
            None => params.push(("startTime", since.timestamp_millis().to_string())),
        }
        self.request_signed(Method::GET, "/v3/myTrades", &params)
            .await
    }

    /// Executions per order id since `since`, paging through `myTrades`.
    async fn executions_since(
        &self,
        symbol: CurrencyPair,
        since: DateTime<Utc>,
    ) -> Result<HashMap<u64, Vec<OrderExecutionInfo>>, TransportError> {
        let mut executions: HashMap<u64, Vec<OrderExecutionInfo>> = HashMap::new();
        let mut min_trade_id = None;
        loop {
            let page = self.my_trades_page(symbol, min_trade_id, since).await?;
            let full_page = page.len() == PAGE_LIMIT;
            for trade in &page {
                executions
                    .entry(trade.order_id)
                    .or_default()
                    .push(execution_from_trade(trade));
            }
            if !full_page {
                return Ok(executions);
            }
            min_trade_id = page.last().map(|t| t.id + 1);
        }
    }
}

#[derive(Deserialize)]
struct PlacedOrder {
    #[serde(rename = "orderId")]
    order_id: u64,
}

#[async_trait]
impl VenueAdapter for BinanceClient {
    fn venue(&self) -> VenueId {
        VenueId::binance()
    }

    async fn book_snapshot(
        &self,
        symbol: CurrencyPair,
    ) -> Result<MarketSnapshot, TransportError> {
        let depth = self.depth(symbol, 100).await?;
        Ok(snapshot_from_depth(depth, symbol))
    }

    async fn balances(&self) -> Result<Balances, TransportError> {
        #[derive(Deserialize)]
        struct Account {
            balances: Vec<AssetBalance>,
        }
        #[derive(Deserialize)]
        struct AssetBalance {
            asset: String,
            free: Decimal,
        }
        let account: Account = self.request_signed(Method::GET, "/v3/account", &[]).await?;
        Ok(account
            .balances
            .into_iter()
            .filter_map(|b| Some((b.asset.parse::<Currency>().ok()?, b.free)))
            .collect())
    }

    async fn limit_order(
        &self,
        side: Side,
        price: Decimal,
        size: Decimal,
        symbol: CurrencyPair,
        flags: &[OrderFlag],
    ) -> Result<String, TransportError> {
        let mut params = vec![
            ("symbol", Self::local_symbol(symbol)),
            (
                "side",
                match side {
                    Side::Bid => "BUY".to_string(),
                    Side::Ask => "SELL".to_string(),
                },
            ),
            ("type", "LIMIT".to_string()),
            ("quantity", size.to_string()),
            ("price", price.to_string()),
        ];
        let mut time_in_force = "GTC";
        for flag in flags {
            time_in_force = match flag {
                OrderFlag::GoodTillCanceled => "GTC",
                OrderFlag::ImmediateOrCancel => "IOC",
                OrderFlag::FillOrKill => "FOK",
                OrderFlag::PostOnly | OrderFlag::GoodTillTime(_) => {
                    return Err(TransportError::UnsupportedFlag {
                        flag: *flag,
                        venue: self.venue(),
                    });
                }
            };
        }
        params.push(("timeInForce", time_in_force.to_string()));
        let placed: PlacedOrder = self
            .request_signed(Method::POST, "/v3/order", &params)
            .await?;
        let id = placed.order_id.to_string();
        self.remember_order(&id, symbol);
        Ok(id)
    }

    async fn market_order(
        &self,
        side: Side,
        size: Decimal,
        symbol: CurrencyPair,
    ) -> Result<String, TransportError> {
        let params = vec![
            ("symbol", Self::local_symbol(symbol)),
            (
                "side",
                match side {
                    Side::Bid => "BUY".to_string(),
                    Side::Ask => "SELL".to_string(),
                },
            ),
            ("type", "MARKET".to_string()),
            ("quantity", size.to_string()),
        ];
        let placed: PlacedOrder = self
            .request_signed(Method::POST, "/v3/order", &params)
            .await?;
        let id = placed.order_id.to_string();
        self.remember_order(&id, symbol);
        Ok(id)
    }

    async fn cancel(&self, venue_order_id: &str) -> Result<(), TransportError> {
        let symbol = self.symbol_for_order(venue_order_id)?;
        let params = vec![
            ("symbol", Self::local_symbol(symbol)),
            ("orderId", venue_order_id.to_string()),
        ];
        let result: Result<serde_json::Value, TransportError> = self
            .request_signed(Method::DELETE, "/v3/order", &params)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(TransportError::VenueRejected { text, .. })
                if text.contains("Unknown order") || text.contains("NOT_FOUND") =>
            {
                Err(TransportError::NotActive)
            }
            Err(e) => Err(e),
        }
    }

    async fn open_orders(
        &self,
        symbol: Option<CurrencyPair>,
    ) -> Result<Vec<Order>, TransportError> {
        let mut params = Vec::new();
        if let Some(symbol) = symbol {
            params.push(("symbol", Self::local_symbol(symbol)));
        }
        let infos: Vec<OrderInfo> = self
            .request_signed(Method::GET, "/v3/openOrders", &params)
            .await?;
        let mut orders = Vec::with_capacity(infos.len());
        for info in &infos {
            let symbol = Self::symbol_from_local(&info.symbol)?;
            let traits = self.traits_for(symbol).await?;
            self.remember_order(&info.order_id.to_string(), symbol);
            orders.push(codec::order_from_info(info, symbol, traits, None)?);
        }
        Ok(orders)
    }

    async fn closed_orders(
        &self,
        since: DateTime<Utc>,
        symbols: Option<&[CurrencyPair]>,
    ) -> Result<Vec<Order>, TransportError> {
        let symbols: Vec<CurrencyPair> = match symbols {
            Some(symbols) => symbols.to_vec(),
            None => {
                let info = self.exchange_info().await?;
                info.symbols
                    .iter()
                    .filter_map(|s| Self::symbol_from_local(&s.symbol).ok())
                    .collect()
            }
        };

        let mut orders = Vec::new();
        for symbol in symbols {
            let executions = self.executions_since(symbol, since).await?;
            let traits = self.traits_for(symbol).await?;
            let mut min_order_id = None;
            loop {
                let page = self.all_orders_page(symbol, min_order_id, since).await?;
                let full_page = page.len() == PAGE_LIMIT;
                for info in &page {
                    self.remember_order(&info.order_id.to_string(), symbol);
                    orders.push(codec::order_from_info(
                        info,
                        symbol,
                        traits,
                        executions.get(&info.order_id).map(Vec::as_slice),
                    )?);
                }
                if !full_page {
                    break;
                }
                min_order_id = page.last().map(|o| o.order_id + 1);
            }
        }
        orders.sort_by_key(|o| o.submitted_at());
        Ok(orders)
    }

    async fn instrument_traits(
        &self,
    ) -> Result<HashMap<CurrencyPair, FloatTraits>, TransportError> {
        let info = self.exchange_info().await?;
        Ok(info
            .symbols
            .iter()
            .filter_map(|s| {
                let pair = Self::symbol_from_local(&s.symbol).ok()?;
                Some((
                    pair,
                    FloatTraits::new(s.base_asset_precision, s.quote_precision),
                ))
            })
            .collect())
    }

    async fn order_status(
        &self,
        venue_order_id: &str,
    ) -> Result<Option<OrderStateChange>, TransportError> {
        let symbol = self.symbol_for_order(venue_order_id)?;
        let params = vec![
            ("symbol", Self::local_symbol(symbol)),
            ("orderId", venue_order_id.to_string()),
        ];
        let info: OrderInfo = self.request_signed(Method::GET, "/v3/order", &params).await?;
        Ok(Some(codec::status_from_info(&info)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_bijection() {
        assert_eq!(BinanceClient::local_symbol(CurrencyPair::BTC_USDT), "BTCUSDT");
        assert_eq!(
            BinanceClient::symbol_from_local("BTCUSDT").unwrap(),
            CurrencyPair::BTC_USDT
        );
        // Suffix resolution prefers the longer quote code.
        assert_eq!(
            BinanceClient::symbol_from_local("ETHBTC").unwrap(),
            CurrencyPair::ETH_BTC
        );
        assert!(BinanceClient::symbol_from_local("XXXYYY").is_err());
    }

    #[test]
    fn test_signed_query_appends_hex_signature() {
        let signed =
            BinanceClient::signed_query("secret", "symbol=BTCUSDT&timestamp=1618").unwrap();
        let (query, signature) = signed.rsplit_once("&signature=").unwrap();
        assert_eq!(query, "symbol=BTCUSDT&timestamp=1618");
        assert_eq!(signature.len(), 64);
        assert!(hex::decode(signature).is_ok());
        // Signature is deterministic for the same inputs.
        assert_eq!(
            signed,
            BinanceClient::signed_query("secret", "symbol=BTCUSDT&timestamp=1618").unwrap()
        );
        // And differs when the body changes.
        assert_ne!(
            signed,
            BinanceClient::signed_query("secret", "symbol=BTCUSDT&timestamp=1619").unwrap()
        );
    }

    #[test]
    fn test_query_building_urlencodes() {
        let query = BinanceClient::build_query(&[
            ("symbol", "BTCUSDT".to_string()),
            ("quantity", "1.5".to_string()),
        ]);
        assert_eq!(query, "symbol=BTCUSDT&quantity=1.5");
    }
}
