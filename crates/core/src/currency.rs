use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Closed set of currencies the system trades.
///
/// Venue adapters translate between these and each venue's local symbol
/// strings; normalized code never sees a free-form currency string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Currency {
    Usd,
    Eur,
    Btc,
    Eth,
    Ltc,
    Usdt,
    Usdc,
}

impl Currency {
    pub const ALL: [Currency; 7] = [
        Currency::Usd,
        Currency::Eur,
        Currency::Btc,
        Currency::Eth,
        Currency::Ltc,
        Currency::Usdt,
        Currency::Usdc,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
            Currency::Ltc => "LTC",
            Currency::Usdt => "USDT",
            Currency::Usdc => "USDC",
        }
    }

    pub fn is_fiat(self) -> bool {
        matches!(self, Currency::Usd | Currency::Eur)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownCurrency(s.to_string()))
    }
}

/// An ordered base/quote pair, displayed as `BASE/QUOTE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurrencyPair {
    pub base: Currency,
    pub quote: Currency,
}

impl CurrencyPair {
    pub const BTC_USD: CurrencyPair = CurrencyPair::new(Currency::Btc, Currency::Usd);
    pub const BTC_EUR: CurrencyPair = CurrencyPair::new(Currency::Btc, Currency::Eur);
    pub const BTC_USDT: CurrencyPair = CurrencyPair::new(Currency::Btc, Currency::Usdt);
    pub const ETH_USD: CurrencyPair = CurrencyPair::new(Currency::Eth, Currency::Usd);
    pub const ETH_USDT: CurrencyPair = CurrencyPair::new(Currency::Eth, Currency::Usdt);
    pub const ETH_BTC: CurrencyPair = CurrencyPair::new(Currency::Eth, Currency::Btc);

    pub const fn new(base: Currency, quote: Currency) -> Self {
        CurrencyPair { base, quote }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| CoreError::UnknownSymbol(s.to_string()))?;
        Ok(CurrencyPair::new(base.parse()?, quote.parse()?))
    }
}

impl Serialize for CurrencyPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CurrencyPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
