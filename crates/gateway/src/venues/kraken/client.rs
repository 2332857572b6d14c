use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tidebook_core::{CurrencyPair, FloatTraits, MarketSnapshot, Order, Side, VenueId};

use crate::adapter::{Balances, OrderFlag, VenueAdapter};
use crate::config::Credentials;
use crate::error::TransportError;
use crate::events::OrderStateChange;
use crate::limiter::RateLimiter;

use super::codec::{
    self, AddOrderResult, AssetPairInfo, ClosedOrdersResult, DepthResult, Envelope,
    OpenOrdersResult, OrderInfo,
};

pub const DEFAULT_REST_URL: &str = "https://api.kraken.com/0";

/// Comfortable margin under the venue's call counter.
const RATE_LIMIT_CALLS: usize = 90;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// REST client for the Kraken API. Private endpoints POST urlencoded bodies
/// carrying a monotone nonce and sign with HMAC-SHA512 over
/// `path + SHA256(nonce + body)` using the base64-decoded secret.
pub struct KrakenClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    limiter: RateLimiter,
    nonce: AtomicU64,
}

impl KrakenClient {
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        KrakenClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
            limiter: RateLimiter::new(RATE_LIMIT_CALLS, RATE_LIMIT_WINDOW),
            nonce: AtomicU64::new(0),
        }
    }

    /// Millisecond nonce, strictly increasing even under clock rewind.
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis() as u64;
        loop {
            let last = self.nonce.load(Ordering::SeqCst);
            let next = now.max(last + 1);
            if self
                .nonce
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }

    /// The signature input: URI path concatenated with SHA256(nonce+body).
    pub(crate) fn sign(
        secret_b64: &str,
        path: &str,
        nonce: u64,
        body: &str,
    ) -> Result<String, TransportError> {
        let key = B64
            .decode(secret_b64)
            .map_err(|_| TransportError::Auth("secret is not valid base64".into()))?;
        let digest = Sha256::digest(format!("{nonce}{body}").as_bytes());
        let mut message = path.as_bytes().to_vec();
        message.extend_from_slice(&digest);

        let mut mac = Hmac::<Sha512>::new_from_slice(&key)
            .map_err(|_| TransportError::Auth("invalid hmac key".into()))?;
        mac.update(&message);
        Ok(B64.encode(mac.finalize().into_bytes()))
    }

    fn url_path(&self, path: &str) -> String {
        // The signed path includes the /0 version prefix from the base URL.
        let prefix = url::Url::parse(&self.base_url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        format!("{prefix}{path}")
    }

    async fn get_public<T: serde::de::DeserializeOwned>(
        &self,
        path_query: &str,
    ) -> Result<T, TransportError> {
        self.limiter.acquire().await;
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path_query))
            .send()
            .await?;
        let envelope: Envelope<T> = resp.json().await?;
        envelope.into_result()
    }

    async fn post_private<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, TransportError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| TransportError::Auth("no credentials configured".into()))?;
        self.limiter.acquire().await;

        let nonce = self.next_nonce();
        let body = {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            serializer.append_pair("nonce", &nonce.to_string());
            for (key, value) in params {
                serializer.append_pair(key, value);
            }
            serializer.finish()
        };
        let signature = Self::sign(creds.secret.expose(), &self.url_path(path), nonce, &body)?;

        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("API-Key", &creds.key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let envelope: Envelope<T> = resp.json().await?;
        envelope.into_result()
    }

    pub async fn depth(
        &self,
        symbol: CurrencyPair,
        count: u32,
    ) -> Result<codec::DepthPair, TransportError> {
        let local = codec::local_symbol(symbol)?;
        let mut result: DepthResult = self
            .get_public(&format!("/public/Depth?pair={local}&count={count}"))
            .await?;
        result
            .remove(local)
            .ok_or_else(|| TransportError::Decode(format!("depth response missing {local:?}")))
    }

    async fn place_order(
        &self,
        symbol: CurrencyPair,
        side: Side,
        ordertype: &str,
        size: Decimal,
        price: Option<Decimal>,
        oflags: Option<String>,
    ) -> Result<String, TransportError> {
        let mut params = vec![
            ("pair", codec::local_symbol(symbol)?.to_string()),
            (
                "type",
                match side {
                    Side::Bid => "buy".to_string(),
                    Side::Ask => "sell".to_string(),
                },
            ),
            ("ordertype", ordertype.to_string()),
            ("volume", size.to_string()),
        ];
        if let Some(price) = price {
            params.push(("price", price.to_string()));
        }
        if let Some(oflags) = oflags {
            params.push(("oflags", oflags));
        }
        let result: AddOrderResult = self.post_private("/private/AddOrder", &params).await?;
        result
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Decode("AddOrder returned no txid".into()))
    }
}

#[async_trait]
impl VenueAdapter for KrakenClient {
    fn venue(&self) -> VenueId {
        VenueId::kraken()
    }

    async fn book_snapshot(
        &self,
        symbol: CurrencyPair,
    ) -> Result<MarketSnapshot, TransportError> {
        let depth = self.depth(symbol, 100).await?;
        Ok(codec::snapshot_from_depth(&depth, symbol))
    }

    async fn balances(&self) -> Result<Balances, TransportError> {
        let raw: HashMap<String, Decimal> = self.post_private("/private/Balance", &[]).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(asset, amount)| Some((codec::currency_from_asset(&asset)?, amount)))
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
        let mut oflags = Vec::new();
        for flag in flags {
            match flag {
                OrderFlag::PostOnly => oflags.push("post"),
                other => {
                    return Err(TransportError::UnsupportedFlag {
                        flag: *other,
                        venue: self.venue(),
                    });
                }
            }
        }
        let oflags = (!oflags.is_empty()).then(|| oflags.join(","));
        self.place_order(symbol, side, "limit", size, Some(price), oflags)
            .await
    }

    async fn market_order(
        &self,
        side: Side,
        size: Decimal,
        symbol: CurrencyPair,
    ) -> Result<String, TransportError> {
        self.place_order(symbol, side, "market", size, None, None)
            .await
    }

    async fn cancel(&self, venue_order_id: &str) -> Result<(), TransportError> {
        let params = vec![("txid", venue_order_id.to_string())];
        let _: serde_json::Value = self.post_private("/private/CancelOrder", &params).await?;
        Ok(())
    }

    async fn open_orders(
        &self,
        symbol: Option<CurrencyPair>,
    ) -> Result<Vec<Order>, TransportError> {
        let result: OpenOrdersResult = self.post_private("/private/OpenOrders", &[]).await?;
        let traits = self.instrument_traits().await.unwrap_or_default();
        let mut orders = Vec::new();
        for (txid, info) in &result.open {
            let Ok(pair) = codec::symbol_from_local(&info.descr.pair) else {
                tracing::warn!(pair = %info.descr.pair, "skipping order for unknown pair");
                continue;
            };
            if let Some(symbol) = symbol
                && symbol != pair
            {
                continue;
            }
            let traits = traits.get(&pair).copied().unwrap_or_default();
            orders.push(codec::order_from_info(txid, info, traits)?);
        }
        orders.sort_by_key(|o| o.submitted_at());
        Ok(orders)
    }

    async fn closed_orders(
        &self,
        since: DateTime<Utc>,
        symbols: Option<&[CurrencyPair]>,
    ) -> Result<Vec<Order>, TransportError> {
        let params = vec![
            ("start", since.timestamp().to_string()),
            ("closetime", "both".to_string()),
        ];
        let result: ClosedOrdersResult =
            self.post_private("/private/ClosedOrders", &params).await?;
        let traits = self.instrument_traits().await.unwrap_or_default();
        let mut orders = Vec::new();
        for (txid, info) in &result.closed {
            let Ok(pair) = codec::symbol_from_local(&info.descr.pair) else {
                continue;
            };
            if let Some(wanted) = symbols
                && !wanted.contains(&pair)
            {
                continue;
            }
            let traits = traits.get(&pair).copied().unwrap_or_default();
            orders.push(codec::order_from_info(txid, info, traits)?);
        }
        orders.sort_by_key(|o| o.submitted_at());
        Ok(orders)
    }

    async fn instrument_traits(
        &self,
    ) -> Result<HashMap<CurrencyPair, FloatTraits>, TransportError> {
        let pairs: HashMap<String, AssetPairInfo> =
            self.get_public("/public/AssetPairs").await?;
        Ok(pairs
            .into_iter()
            .filter_map(|(name, info)| {
                let pair = codec::symbol_from_local(&name).ok()?;
                Some((
                    pair,
                    FloatTraits::new(info.lot_decimals, info.pair_decimals),
                ))
            })
            .collect())
    }

    async fn order_status(
        &self,
        venue_order_id: &str,
    ) -> Result<Option<OrderStateChange>, TransportError> {
        let params = vec![("txid", venue_order_id.to_string())];
        let result: Result<HashMap<String, OrderInfo>, TransportError> =
            self.post_private("/private/QueryOrders", &params).await;
        match result {
            Ok(orders) => Ok(orders
                .get(venue_order_id)
                .map(|info| codec::status_from_info(venue_order_id, info))),
            Err(TransportError::NotActive) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_monotone() {
        let client = KrakenClient::new(DEFAULT_REST_URL, None);
        let a = client.next_nonce();
        let b = client.next_nonce();
        let c = client.next_nonce();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_sign_is_deterministic_and_body_sensitive() {
        let secret = B64.encode(b"kraken-secret");
        let a = KrakenClient::sign(&secret, "/0/private/Balance", 1, "nonce=1").unwrap();
        let b = KrakenClient::sign(&secret, "/0/private/Balance", 1, "nonce=1").unwrap();
        assert_eq!(a, b);
        let c = KrakenClient::sign(&secret, "/0/private/Balance", 2, "nonce=2").unwrap();
        assert_ne!(a, c);
        // SHA512 output, base64-encoded.
        assert_eq!(B64.decode(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_url_path_keeps_version_prefix() {
        let client = KrakenClient::new("https://api.kraken.com/0", None);
        assert_eq!(client.url_path("/private/Balance"), "/0/private/Balance");
    }
}
