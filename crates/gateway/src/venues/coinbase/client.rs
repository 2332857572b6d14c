use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;

use tidebook_core::{
    Currency, CurrencyPair, FloatTraits, MarketSnapshot, Order, Side, VenueId,
};

use crate::adapter::{Balances, OrderFlag, VenueAdapter};
use crate::config::Credentials;
use crate::error::TransportError;
use crate::events::OrderStateChange;
use crate::limiter::RateLimiter;
use crate::venues::decode_json;

use super::codec::{
    self, BookResponse, OrderInfo, order_from_closed, order_from_info, snapshot_from_book,
};

pub const DEFAULT_REST_URL: &str = "https://api.exchange.coinbase.com";
pub const DEFAULT_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

/// The venue allows 5 public calls per second per profile.
const RATE_LIMIT_CALLS: usize = 5;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// REST client for the Coinbase exchange API. Private endpoints sign with
/// HMAC-SHA256 over `timestamp + method + path + body` using the
/// base64-decoded secret.
pub struct CoinbaseClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    limiter: RateLimiter,
}

impl CoinbaseClient {
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        CoinbaseClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
            limiter: RateLimiter::new(RATE_LIMIT_CALLS, RATE_LIMIT_WINDOW),
        }
    }

    pub fn local_symbol(symbol: CurrencyPair) -> String {
        format!("{}-{}", symbol.base.code(), symbol.quote.code())
    }

    pub fn symbol_from_local(local: &str) -> Result<CurrencyPair, TransportError> {
        let (base, quote) = local
            .split_once('-')
            .ok_or_else(|| TransportError::Decode(format!("bad product id {local:?}")))?;
        let base: Currency = base
            .parse()
            .map_err(|_| TransportError::Decode(format!("unknown currency {base:?}")))?;
        let quote: Currency = quote
            .parse()
            .map_err(|_| TransportError::Decode(format!("unknown currency {quote:?}")))?;
        Ok(CurrencyPair::new(base, quote))
    }

    /// The message the signature covers.
    pub(crate) fn canonical_message(timestamp: &str, method: &str, path: &str, body: &str) -> String {
        format!("{timestamp}{method}{path}{body}")
    }

    fn sign(secret_b64: &str, message: &str) -> Result<String, TransportError> {
        let key = B64
            .decode(secret_b64)
            .map_err(|_| TransportError::Auth("secret is not valid base64".into()))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|_| TransportError::Auth("invalid hmac key".into()))?;
        mac.update(message.as_bytes());
        Ok(B64.encode(mac.finalize().into_bytes()))
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
        body: Option<String>,
    ) -> Result<T, TransportError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| TransportError::Auth("no credentials configured".into()))?;
        self.limiter.acquire().await;

        let timestamp = format!("{:.6}", Utc::now().timestamp_micros() as f64 / 1e6);
        let body = body.unwrap_or_default();
        let message = Self::canonical_message(&timestamp, method.as_str(), path, &body);
        let signature = Self::sign(creds.secret.expose(), &message)?;

        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("CB-ACCESS-KEY", &creds.key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp);
        if let Some(passphrase) = &creds.passphrase {
            request = request.header("CB-ACCESS-PASSPHRASE", passphrase.expose());
        }
        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }
        decode_json(request.send().await?).await
    }

    pub async fn server_time(&self) -> Result<DateTime<Utc>, TransportError> {
        #[derive(Deserialize)]
        struct TimeResponse {
            iso: String,
        }
        let time: TimeResponse = self.get_public("/time").await?;
        DateTime::parse_from_rfc3339(&time.iso)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    pub async fn book(&self, symbol: CurrencyPair) -> Result<BookResponse, TransportError> {
        let product = Self::local_symbol(symbol);
        self.get_public(&format!("/products/{product}/book?level=2"))
            .await
    }

    async fn orders_with_status(
        &self,
        statuses: &[&str],
        symbol: Option<CurrencyPair>,
    ) -> Result<Vec<OrderInfo>, TransportError> {
        let mut query: Vec<String> = statuses.iter().map(|s| format!("status={s}")).collect();
        if let Some(symbol) = symbol {
            query.push(format!("product_id={}", Self::local_symbol(symbol)));
        }
        self.request_signed(Method::GET, &format!("/orders?{}", query.join("&")), None)
            .await
    }

    fn place_body(
        kind: &str,
        side: Side,
        symbol: CurrencyPair,
        size: Decimal,
        price: Option<Decimal>,
        flags: &[OrderFlag],
    ) -> Result<String, TransportError> {
        let mut body = serde_json::Map::new();
        body.insert("type".into(), kind.into());
        body.insert(
            "side".into(),
            match side {
                Side::Bid => "buy",
                Side::Ask => "sell",
            }
            .into(),
        );
        body.insert("product_id".into(), Self::local_symbol(symbol).into());
        body.insert("size".into(), size.to_string().into());
        if let Some(price) = price {
            body.insert("price".into(), price.to_string().into());
        }
        for flag in flags {
            match flag {
                OrderFlag::GoodTillCanceled => {
                    body.insert("time_in_force".into(), "GTC".into());
                }
                OrderFlag::ImmediateOrCancel => {
                    body.insert("time_in_force".into(), "IOC".into());
                }
                OrderFlag::FillOrKill => {
                    body.insert("time_in_force".into(), "FOK".into());
                }
                OrderFlag::PostOnly => {
                    body.insert("post_only".into(), true.into());
                }
                OrderFlag::GoodTillTime(_) => {
                    return Err(TransportError::UnsupportedFlag {
                        flag: *flag,
                        venue: VenueId::coinbase(),
                    });
                }
            }
        }
        Ok(serde_json::Value::Object(body).to_string())
    }

    fn traits_for(symbol: CurrencyPair) -> FloatTraits {
        if symbol.quote.is_fiat() {
            FloatTraits::new(8, 2)
        } else {
            FloatTraits::new(8, 5)
        }
    }
}

#[derive(Deserialize)]
struct PlacedOrder {
    id: String,
}

#[async_trait]
impl VenueAdapter for CoinbaseClient {
    fn venue(&self) -> VenueId {
        VenueId::coinbase()
    }

    async fn book_snapshot(
        &self,
        symbol: CurrencyPair,
    ) -> Result<MarketSnapshot, TransportError> {
        let book = self.book(symbol).await?;
        Ok(snapshot_from_book(book, symbol))
    }

    async fn balances(&self) -> Result<Balances, TransportError> {
        #[derive(Deserialize)]
        struct Account {
            currency: String,
            balance: Decimal,
        }
        let accounts: Vec<Account> = self.request_signed(Method::GET, "/accounts", None).await?;
        Ok(accounts
            .into_iter()
            .filter_map(|a| Some((a.currency.parse::<Currency>().ok()?, a.balance)))
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
        let body = Self::place_body("limit", side, symbol, size, Some(price), flags)?;
        let placed: PlacedOrder = self
            .request_signed(Method::POST, "/orders", Some(body))
            .await?;
        Ok(placed.id)
    }

    async fn market_order(
        &self,
        side: Side,
        size: Decimal,
        symbol: CurrencyPair,
    ) -> Result<String, TransportError> {
        let body = Self::place_body("market", side, symbol, size, None, &[])?;
        let placed: PlacedOrder = self
            .request_signed(Method::POST, "/orders", Some(body))
            .await?;
        Ok(placed.id)
    }

    async fn cancel(&self, venue_order_id: &str) -> Result<(), TransportError> {
        let result: Result<serde_json::Value, TransportError> = self
            .request_signed(Method::DELETE, &format!("/orders/{venue_order_id}"), None)
            .await;
        match result {
            Ok(_) => Ok(()),
            // Gone or already done: the venue answers 404.
            Err(TransportError::VenueRejected { code, .. }) if code == "404" => {
                Err(TransportError::NotActive)
            }
            Err(e) => Err(e),
        }
    }

    async fn open_orders(
        &self,
        symbol: Option<CurrencyPair>,
    ) -> Result<Vec<Order>, TransportError> {
        let infos = self
            .orders_with_status(&["open", "pending", "active"], symbol)
            .await?;
        let mut orders = Vec::with_capacity(infos.len());
        for info in &infos {
            match Self::symbol_from_local(&info.product_id) {
                Ok(symbol) => {
                    orders.push(order_from_info(info, symbol, Self::traits_for(symbol))?)
                }
                Err(_) => {
                    tracing::warn!(product = %info.product_id, "skipping order for unknown product");
                }
            }
        }
        Ok(orders)
    }

    async fn closed_orders(
        &self,
        since: DateTime<Utc>,
        symbols: Option<&[CurrencyPair]>,
    ) -> Result<Vec<Order>, TransportError> {
        let infos = self.orders_with_status(&["done"], None).await?;
        let mut orders = Vec::new();
        for info in &infos {
            let Ok(symbol) = Self::symbol_from_local(&info.product_id) else {
                continue;
            };
            if let Some(wanted) = symbols
                && !wanted.contains(&symbol)
            {
                continue;
            }
            let done_at = info
                .done_at
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc));
            if done_at.is_none_or(|t| t < since) {
                continue;
            }
            orders.push(order_from_closed(info, symbol, Self::traits_for(symbol))?);
        }
        orders.sort_by_key(|o| o.submitted_at());
        Ok(orders)
    }

    async fn instrument_traits(
        &self,
    ) -> Result<HashMap<CurrencyPair, FloatTraits>, TransportError> {
        Ok([
            CurrencyPair::BTC_USD,
            CurrencyPair::BTC_EUR,
            CurrencyPair::ETH_USD,
            CurrencyPair::ETH_BTC,
        ]
        .into_iter()
        .map(|pair| (pair, Self::traits_for(pair)))
        .collect())
    }

    async fn order_status(
        &self,
        venue_order_id: &str,
    ) -> Result<Option<OrderStateChange>, TransportError> {
        let result: Result<OrderInfo, TransportError> = self
            .request_signed(Method::GET, &format!("/orders/{venue_order_id}"), None)
            .await;
        match result {
            Ok(info) => Ok(Some(codec::status_from_info(&info))),
            Err(TransportError::VenueRejected { code, .. }) if code == "404" => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_bijection() {
        assert_eq!(CoinbaseClient::local_symbol(CurrencyPair::BTC_USD), "BTC-USD");
        assert_eq!(
            CoinbaseClient::symbol_from_local("BTC-USD").unwrap(),
            CurrencyPair::BTC_USD
        );
        assert!(CoinbaseClient::symbol_from_local("BTCUSD").is_err());
    }

    #[test]
    fn test_canonical_message_layout() {
        let message = CoinbaseClient::canonical_message(
            "1415348944.585932",
            "POST",
            "/orders",
            r#"{"size":"1.0"}"#,
        );
        assert_eq!(message, "1415348944.585932POST/orders{\"size\":\"1.0\"}");
    }

    #[test]
    fn test_sign_requires_base64_secret() {
        assert!(CoinbaseClient::sign("!!!not-base64!!!", "msg").is_err());
        // A valid base64 secret signs to valid base64.
        let sig = CoinbaseClient::sign(&B64.encode(b"secret"), "msg").unwrap();
        assert!(B64.decode(&sig).is_ok());
    }

    #[test]
    fn test_gtt_flag_unsupported() {
        let result = CoinbaseClient::place_body(
            "limit",
            Side::Bid,
            CurrencyPair::BTC_USD,
            rust_decimal::Decimal::ONE,
            Some(rust_decimal::Decimal::ONE_HUNDRED),
            &[OrderFlag::GoodTillTime(60)],
        );
        assert!(matches!(
            result,
            Err(TransportError::UnsupportedFlag { .. })
        ));
    }

    #[test]
    fn test_place_body_contents() {
        let body = CoinbaseClient::place_body(
            "limit",
            Side::Bid,
            CurrencyPair::BTC_USD,
            rust_decimal::Decimal::ONE,
            Some(rust_decimal::Decimal::ONE_HUNDRED),
            &[OrderFlag::PostOnly, OrderFlag::GoodTillCanceled],
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["type"], "limit");
        assert_eq!(value["side"], "buy");
        assert_eq!(value["product_id"], "BTC-USD");
        assert_eq!(value["price"], "100");
        assert_eq!(value["post_only"], true);
        assert_eq!(value["time_in_force"], "GTC");
    }
}
