//! Decimal <-> on-chain unit conversion (6-decimal collateral precision).

use alloy::primitives::U256;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

const UNIT_SCALE: i64 = 1_000_000;

/// Convert a collateral/share amount to on-chain units, truncating below
/// the 6th fraction digit.
pub fn to_units(amount: Decimal) -> U256 {
    let scaled = (amount * Decimal::new(UNIT_SCALE, 0)).trunc();
    U256::from(scaled.to_u128().unwrap_or(0))
}

/// Convert on-chain units back to a Decimal amount.
///
/// Balances this terminal handles fit comfortably in u128; anything larger
/// saturates rather than panics.
pub fn from_units(units: U256) -> Decimal {
    let raw: u128 = units.try_into().unwrap_or(u128::MAX);
    Decimal::from_u128(raw).unwrap_or(Decimal::MAX) / Decimal::new(UNIT_SCALE, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_trip() {
        for amount in [dec!(0), dec!(5), dec!(2.5), dec!(0.000001), dec!(123.456789)] {
            assert_eq!(from_units(to_units(amount)), amount);
        }
    }

    #[test]
    fn test_truncation_below_unit() {
        assert_eq!(to_units(dec!(0.0000019)), U256::from(1u64));
        assert_eq!(to_units(dec!(5.1234567)), U256::from(5_123_456u64));
    }

    #[test]
    fn test_negative_amount_is_zero_units() {
        assert_eq!(to_units(dec!(-1)), U256::ZERO);
    }
}
