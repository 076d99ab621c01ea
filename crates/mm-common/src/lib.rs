//! Shared vocabulary for the up/down market-maker terminal.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod price;
pub mod types;

pub use price::{ceil_to_tick, floor_to_tick, normalize_shares, SHARE_DECIMALS};
pub use types::{Asset, Outcome, Side, SlotDuration, MIN_SHARES_PER_SIDE};
