use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a trading venue, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VenueId(String);

impl VenueId {
    pub fn new(id: impl Into<String>) -> Self {
        VenueId(id.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Well-known venue identifiers
impl VenueId {
    pub fn coinbase() -> Self {
        VenueId::new("coinbase")
    }

    pub fn binance() -> Self {
        VenueId::new("binance")
    }

    pub fn kraken() -> Self {
        VenueId::new("kraken")
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        VenueId::new(s)
    }
}

impl From<String> for VenueId {
    fn from(s: String) -> Self {
        VenueId::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_id_normalizes() {
        let id = VenueId::new("Coinbase");
        assert_eq!(id.as_str(), "coinbase");
        assert_eq!(id, VenueId::coinbase());
    }
}
