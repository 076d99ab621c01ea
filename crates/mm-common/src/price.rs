//! Fixed-point price and share arithmetic.
//!
//! Collateral and outcome-token amounts carry 6 fraction digits (the
//! collateral unit precision). Prices are aligned to the market tick:
//! floor for sells, ceil for buys, so rounding never works against the
//! protective bound of an order.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fraction digits of collateral and outcome-token amounts.
pub const SHARE_DECIMALS: u32 = 6;

/// Truncate a share/collateral amount to the on-chain unit precision.
pub fn normalize_shares(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(SHARE_DECIMALS, RoundingStrategy::ToZero)
}

/// Align a sell price down to the tick grid.
pub fn floor_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    (price / tick).floor() * tick
}

/// Align a buy price up to the tick grid.
pub fn ceil_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    (price / tick).ceil() * tick
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_floor_to_tick() {
        assert_eq!(floor_to_tick(dec!(0.6234), dec!(0.01)), dec!(0.62));
        assert_eq!(floor_to_tick(dec!(0.629), dec!(0.001)), dec!(0.629));
        assert_eq!(floor_to_tick(dec!(0.60), dec!(0.01)), dec!(0.60));
    }

    #[test]
    fn test_ceil_to_tick() {
        assert_eq!(ceil_to_tick(dec!(0.6234), dec!(0.01)), dec!(0.63));
        assert_eq!(ceil_to_tick(dec!(0.62), dec!(0.01)), dec!(0.62));
    }

    #[test]
    fn test_zero_tick_passthrough() {
        assert_eq!(floor_to_tick(dec!(0.5555), Decimal::ZERO), dec!(0.5555));
    }

    #[test]
    fn test_normalize_shares_truncates() {
        assert_eq!(normalize_shares(dec!(5.1234567)), dec!(5.123456));
        assert_eq!(normalize_shares(dec!(5)), dec!(5));
        // Truncation, not rounding: 0.9999999 must not become 1.
        assert_eq!(normalize_shares(dec!(0.9999999)), dec!(0.999999));
    }
}
