//! On-chain plumbing for the market-maker terminal.
//!
//! Two responsibilities live here:
//!
//! - [`wallet`]: the single-writer transaction serializer over the
//!   smart-contract (proxy) wallet that holds collateral. Every on-chain
//!   write in the process funnels through it, which is what keeps wallet
//!   nonces strictly sequential without any nonce bookkeeping.
//! - [`ctf`]: split / merge / redeem primitives of the conditional-token
//!   framework plus balance and payout reads, expressed as calldata handed
//!   to the wallet serializer.
//!
//! Contract addresses are collected once at startup into [`Addresses`] and
//! passed by value; there is no global address book.

pub mod addresses;
pub mod ctf;
pub mod error;
pub mod units;
pub mod wallet;

pub use addresses::Addresses;
pub use ctf::CtfClient;
pub use error::ChainError;
pub use units::{from_units, to_units};
pub use wallet::{TxReceipt, WalletExecutor};
