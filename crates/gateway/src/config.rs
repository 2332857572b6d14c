use serde::Deserialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use tidebook_core::CurrencyPair;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// An API secret. Redacted from Debug so credentials cannot leak into logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub key: String,
    pub secret: Secret,
    /// Coinbase-style venues also require a passphrase.
    #[serde(default)]
    pub passphrase: Option<Secret>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub rest_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    pub symbols: Vec<CurrencyPair>,
    /// Poll-only venues: seconds between poller ticks.
    #[serde(default = "default_poll_frequency")]
    pub poll_frequency_secs: u64,
    #[serde(default = "default_true")]
    pub reconnect: bool,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfigFile {
    pub venues: Vec<VenueConfig>,
}

impl GatewayConfigFile {
    pub fn enabled_venues(&self) -> impl Iterator<Item = &VenueConfig> {
        self.venues.iter().filter(|v| v.enabled)
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_frequency() -> u64 {
    1
}

pub fn load_config(path: impl AsRef<Path>) -> Result<GatewayConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    load_config_from_str(&text)
}

pub fn load_config_from_str(text: &str) -> Result<GatewayConfigFile, ConfigError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "venues": [
            {
                "id": "coinbase",
                "rest_url": "https://api.exchange.coinbase.com",
                "ws_url": "wss://ws-feed.exchange.coinbase.com",
                "symbols": ["BTC/USD", "ETH/USD"],
                "credentials": {
                    "key": "k",
                    "secret": "s",
                    "passphrase": "p"
                }
            },
            {
                "id": "kraken",
                "enabled": false,
                "rest_url": "https://api.kraken.com/0",
                "symbols": ["BTC/USD"],
                "poll_frequency_secs": 2
            }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = load_config_from_str(SAMPLE).unwrap();
        assert_eq!(config.venues.len(), 2);
        assert_eq!(config.enabled_venues().count(), 1);

        let coinbase = &config.venues[0];
        assert_eq!(coinbase.symbols, vec![CurrencyPair::BTC_USD, CurrencyPair::ETH_USD]);
        assert!(coinbase.reconnect);
        assert_eq!(coinbase.poll_frequency_secs, 1);

        let kraken = &config.venues[1];
        assert!(kraken.ws_url.is_none());
        assert_eq!(kraken.poll_frequency_secs, 2);
    }

    #[test]
    fn test_secret_debug_redacted() {
        let config = load_config_from_str(SAMPLE).unwrap();
        let debug = format!("{:?}", config.venues[0].credentials);
        assert!(debug.contains("Secret(***)"));
        assert!(!debug.contains("\"s\""));
        assert!(!debug.contains("\"p\""));
    }
}
