use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Venue-legal price/size precision for one instrument.
///
/// Sizes round to `base_precision` decimal places and prices to
/// `quote_precision` before anything is sent to a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatTraits {
    pub base_precision: u32,
    pub quote_precision: u32,
}

impl FloatTraits {
    pub const fn new(base_precision: u32, quote_precision: u32) -> Self {
        FloatTraits {
            base_precision,
            quote_precision,
        }
    }

    pub fn round_size(&self, size: Decimal) -> Decimal {
        round(size, self.base_precision)
    }

    pub fn round_price(&self, price: Decimal) -> Decimal {
        round(price, self.quote_precision)
    }

    /// One quantum of size at this precision, e.g. 0.00000001 for 8 places.
    pub fn size_increment(&self) -> Decimal {
        Decimal::new(1, self.base_precision)
    }
}

impl Default for FloatTraits {
    /// Eight base places, two quote places: the common BTC/fiat shape.
    fn default() -> Self {
        FloatTraits::new(8, 2)
    }
}

fn round(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rounding() {
        let traits = FloatTraits::new(8, 2);
        assert_eq!(traits.round_size(dec!(0.123456789)), dec!(0.12345679));
        assert_eq!(traits.round_price(dec!(30000.129)), dec!(30000.13));
        assert_eq!(traits.round_price(dec!(30000.1)), dec!(30000.1));
    }

    #[test]
    fn test_size_increment() {
        assert_eq!(FloatTraits::new(8, 2).size_increment(), dec!(0.00000001));
        assert_eq!(FloatTraits::new(3, 2).size_increment(), dec!(0.001));
    }
}
