//! Dry-run venue: live midpoints, simulated fills, simulated ledger.
//!
//! No order ever reaches the book and no transaction reaches the chain.
//! A resting sell counts as filled once the live midpoint trades at or
//! through its price; market orders fill at the current midpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::B256;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};

use mm_chain::ChainError;
use mm_common::{normalize_shares, Outcome, MIN_SHARES_PER_SIDE};
use mm_market::{ClobClient, Market};

use super::{ChainClient, FillStatus, OrderGateway, VenueError};

#[derive(Debug, Clone)]
struct SimOrder {
    token_id: String,
    price: Decimal,
    size: Decimal,
    cancelled: bool,
    filled: bool,
}

/// Simulated balance ledger shared by the dry-run gateway and chain.
#[derive(Debug, Default)]
struct Ledger {
    collateral: Decimal,
    tokens: HashMap<String, Decimal>,
}

impl Ledger {
    fn token(&self, token_id: &str) -> Decimal {
        self.tokens.get(token_id).copied().unwrap_or_default()
    }

    fn add_token(&mut self, token_id: &str, amount: Decimal) {
        *self.tokens.entry(token_id.to_string()).or_default() += amount;
    }
}

/// Dry-run chain: a ledger with split/merge semantics.
pub struct SimChain {
    ledger: Mutex<Ledger>,
}

impl SimChain {
    pub fn new(starting_collateral: Decimal) -> Arc<Self> {
        Arc::new(Self {
            ledger: Mutex::new(Ledger {
                collateral: starting_collateral,
                tokens: HashMap::new(),
            }),
        })
    }
}

#[async_trait]
impl ChainClient for SimChain {
    async fn collateral_balance(&self) -> Result<Decimal, VenueError> {
        Ok(self.ledger.lock().collateral)
    }

    async fn token_balance(&self, token_id: &str) -> Result<Decimal, VenueError> {
        Ok(self.ledger.lock().token(token_id))
    }

    async fn split(&self, market: &Market, collateral: Decimal) -> Result<Decimal, VenueError> {
        let collateral = normalize_shares(collateral);
        if collateral < MIN_SHARES_PER_SIDE {
            return Err(ChainError::BelowMinimum {
                amount: collateral.to_string(),
                min: MIN_SHARES_PER_SIDE.to_string(),
            }
            .into());
        }
        let mut ledger = self.ledger.lock();
        if ledger.collateral < collateral {
            return Err(VenueError::Sim(format!(
                "insufficient simulated collateral: {} < {}",
                ledger.collateral, collateral
            )));
        }
        ledger.collateral -= collateral;
        ledger.add_token(&market.yes_token_id, collateral);
        ledger.add_token(&market.no_token_id, collateral);
        info!(condition = %market.condition_id, amount = %collateral, "sim split");
        Ok(collateral)
    }

    async fn merge(&self, market: &Market, shares: Decimal) -> Result<Decimal, VenueError> {
        let shares = normalize_shares(shares);
        let mut ledger = self.ledger.lock();
        if ledger.token(&market.yes_token_id) < shares || ledger.token(&market.no_token_id) < shares
        {
            return Err(VenueError::Sim("insufficient simulated tokens to merge".into()));
        }
        ledger.add_token(&market.yes_token_id, -shares);
        ledger.add_token(&market.no_token_id, -shares);
        ledger.collateral += shares;
        info!(condition = %market.condition_id, amount = %shares, "sim merge");
        Ok(shares)
    }

    async fn redeem(&self, condition_id: B256) -> Result<(), VenueError> {
        debug!(condition = %condition_id, "sim redeem skipped");
        Ok(())
    }

    async fn payout_denominator(&self, _condition_id: B256) -> Result<u64, VenueError> {
        Ok(0)
    }
}

/// Dry-run gateway: fill detection is midpoint-vs-target against live
/// quotes.
pub struct SimGateway {
    clob: ClobClient,
    chain: Arc<SimChain>,
    orders: Mutex<HashMap<String, SimOrder>>,
    next_id: AtomicU64,
}

impl SimGateway {
    pub fn new(clob: ClobClient, chain: Arc<SimChain>) -> Self {
        Self {
            clob,
            chain,
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn settle_sell(&self, token_id: &str, shares: Decimal, price: Decimal) {
        let mut ledger = self.chain.ledger.lock();
        let held = ledger.token(token_id);
        let sold = shares.min(held);
        ledger.add_token(token_id, -sold);
        ledger.collateral += sold * price;
    }
}

#[async_trait]
impl OrderGateway for SimGateway {
    async fn post_limit_sell(
        &self,
        market: &Market,
        outcome: Outcome,
        price: Decimal,
        size: Decimal,
    ) -> Result<String, VenueError> {
        let id = format!("sim-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.orders.lock().insert(
            id.clone(),
            SimOrder {
                token_id: market.token_id(outcome).to_string(),
                price,
                size,
                cancelled: false,
                filled: false,
            },
        );
        info!(order_id = %id, %outcome, %price, %size, "sim limit sell");
        Ok(id)
    }

    async fn market_sell(
        &self,
        market: &Market,
        outcome: Outcome,
        shares: Decimal,
        _worst_price: Decimal,
    ) -> Result<Option<Decimal>, VenueError> {
        let token_id = market.token_id(outcome);
        let mid = self.clob.midpoint(token_id).await?;
        self.settle_sell(token_id, shares, mid);
        info!(%outcome, %shares, price = %mid, "sim market sell");
        Ok(Some(mid))
    }

    async fn market_buy(
        &self,
        market: &Market,
        outcome: Outcome,
        collateral: Decimal,
        _worst_price: Decimal,
    ) -> Result<Option<Decimal>, VenueError> {
        let token_id = market.token_id(outcome);
        let mid = self.clob.midpoint(token_id).await?;
        if mid <= Decimal::ZERO {
            return Ok(None);
        }
        let shares = collateral / mid;
        let mut ledger = self.chain.ledger.lock();
        if ledger.collateral < collateral {
            return Err(VenueError::Sim("insufficient simulated collateral".into()));
        }
        ledger.collateral -= collateral;
        ledger.add_token(token_id, shares);
        drop(ledger);
        info!(%outcome, %collateral, price = %mid, "sim market buy");
        Ok(Some(mid))
    }

    async fn cancel(&self, order_id: &str) -> Result<(), VenueError> {
        if let Some(order) = self.orders.lock().get_mut(order_id) {
            order.cancelled = true;
        }
        // Unknown ids are fine; cancel is idempotent.
        Ok(())
    }

    async fn poll_fill(
        &self,
        order_id: &str,
        _expected_size: Decimal,
    ) -> Result<FillStatus, VenueError> {
        let order = match self.orders.lock().get(order_id).cloned() {
            Some(order) => order,
            None => return Ok(FillStatus::Cancelled),
        };
        if order.filled {
            return Ok(FillStatus::Filled(order.price));
        }
        if order.cancelled {
            return Ok(FillStatus::Cancelled);
        }

        let mid = self.clob.midpoint(&order.token_id).await?;
        if mid >= order.price {
            self.settle_sell(&order.token_id, order.size, order.price);
            if let Some(order) = self.orders.lock().get_mut(order_id) {
                order.filled = true;
            }
            info!(order_id, price = %order.price, mid = %mid, "sim limit filled");
            return Ok(FillStatus::Filled(order.price));
        }
        Ok(FillStatus::Pending)
    }

    async fn midpoint(&self, token_id: &str) -> Result<Decimal, VenueError> {
        Ok(self.clob.midpoint(token_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mm_common::{Asset, SlotDuration};
    use rust_decimal_macros::dec;

    fn test_market() -> Market {
        Market {
            asset: Asset::Btc,
            slot_start: 0,
            condition_id: B256::repeat_byte(1),
            question: "test".into(),
            open_time: Utc::now(),
            end_time: Utc::now() + chrono::Duration::seconds(300),
            yes_token_id: "11".into(),
            no_token_id: "22".into(),
            tick_size: dec!(0.01),
            neg_risk: false,
        }
    }

    #[tokio::test]
    async fn test_sim_split_merge_round_trip() {
        let chain = SimChain::new(dec!(100));
        let market = test_market();

        let shares = chain.split(&market, dec!(5)).await.unwrap();
        assert_eq!(shares, dec!(5));
        assert_eq!(chain.collateral_balance().await.unwrap(), dec!(95));
        assert_eq!(chain.token_balance("11").await.unwrap(), dec!(5));
        assert_eq!(chain.token_balance("22").await.unwrap(), dec!(5));

        let recovered = chain.merge(&market, dec!(5)).await.unwrap();
        assert_eq!(recovered, dec!(5));
        assert_eq!(chain.collateral_balance().await.unwrap(), dec!(100));
        assert_eq!(chain.token_balance("11").await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_sim_split_rejects_below_minimum() {
        let chain = SimChain::new(dec!(100));
        let err = chain.split(&test_market(), dec!(2)).await.unwrap_err();
        assert!(err.to_string().contains("MM_TRADE_SIZE below minimum"));
    }

    #[tokio::test]
    async fn test_sim_split_rejects_insufficient_balance() {
        let chain = SimChain::new(dec!(3));
        assert!(chain.split(&test_market(), dec!(5)).await.is_err());
    }

    #[tokio::test]
    async fn test_sim_merge_requires_both_legs() {
        let chain = SimChain::new(dec!(100));
        let market = test_market();
        chain.split(&market, dec!(5)).await.unwrap();
        // Drain one leg out-of-band.
        chain.ledger.lock().add_token("11", dec!(-5));
        assert!(chain.merge(&market, dec!(5)).await.is_err());
    }
}
