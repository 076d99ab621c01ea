//! Venue abstraction: order gateway and chain operations.
//!
//! The engine talks to the venue through two traits so the same state
//! machine runs against the real CLOB and chain, the dry-run simulators,
//! or the scripted mocks in the integration tests.
//!
//! ## Implementations
//!
//! - `LiveGateway` / `LiveChain`: real orders and on-chain writes
//! - `SimGateway` / `SimChain`: dry-run; live midpoints, simulated fills
//!   and a simulated balance ledger

pub mod live;
pub mod sim;

use alloy::primitives::B256;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use mm_common::Outcome;
use mm_market::Market;

pub use live::{LiveChain, LiveGateway};
pub use sim::{SimChain, SimGateway};

/// Errors crossing the venue boundary.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("clob: {0}")]
    Clob(#[from] mm_market::ClobError),

    #[error(transparent)]
    Chain(#[from] mm_chain::ChainError),

    #[error("{0}")]
    Sim(String),
}

/// Result of one fill poll on a resting order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillStatus {
    /// Filled at this price.
    Filled(Decimal),
    /// Still resting.
    Pending,
    /// No longer on the book without filling.
    Cancelled,
}

impl FillStatus {
    pub fn is_filled(&self) -> bool {
        matches!(self, FillStatus::Filled(_))
    }
}

/// Order operations of the venue.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Rest a GTC limit sell; returns the order id.
    async fn post_limit_sell(
        &self,
        market: &Market,
        outcome: Outcome,
        price: Decimal,
        size: Decimal,
    ) -> Result<String, VenueError>;

    /// Market-sell shares. `None` when no liquidity was taken.
    async fn market_sell(
        &self,
        market: &Market,
        outcome: Outcome,
        shares: Decimal,
        worst_price: Decimal,
    ) -> Result<Option<Decimal>, VenueError>;

    /// Market-buy with a collateral budget. `None` when no liquidity was
    /// taken. Returns the average fill price.
    async fn market_buy(
        &self,
        market: &Market,
        outcome: Outcome,
        collateral: Decimal,
        worst_price: Decimal,
    ) -> Result<Option<Decimal>, VenueError>;

    /// Cancel a resting order. Idempotent.
    async fn cancel(&self, order_id: &str) -> Result<(), VenueError>;

    /// Poll a resting order for a fill.
    async fn poll_fill(&self, order_id: &str, expected_size: Decimal)
        -> Result<FillStatus, VenueError>;

    /// Current midpoint quote for a token.
    async fn midpoint(&self, token_id: &str) -> Result<Decimal, VenueError>;
}

/// On-chain operations of the venue.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn collateral_balance(&self) -> Result<Decimal, VenueError>;

    async fn token_balance(&self, token_id: &str) -> Result<Decimal, VenueError>;

    /// Split collateral into both outcome tokens; returns shares per side.
    async fn split(&self, market: &Market, collateral: Decimal) -> Result<Decimal, VenueError>;

    /// Merge equal amounts of both outcome tokens; returns recovered
    /// collateral.
    async fn merge(&self, market: &Market, shares: Decimal) -> Result<Decimal, VenueError>;

    async fn redeem(&self, condition_id: B256) -> Result<(), VenueError>;

    async fn payout_denominator(&self, condition_id: B256) -> Result<u64, VenueError>;
}
