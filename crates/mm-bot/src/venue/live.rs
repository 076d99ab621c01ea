//! Live venue implementations over the CLOB and chain clients.

use std::sync::Arc;

use alloy::primitives::B256;
use async_trait::async_trait;
use rust_decimal::Decimal;

use mm_chain::CtfClient;
use mm_common::{floor_to_tick, Outcome, Side};
use mm_market::clob::Tif;
use mm_market::{ClobClient, Market};

use super::{ChainClient, FillStatus, OrderGateway, VenueError};

/// Order gateway over the authenticated CLOB client.
pub struct LiveGateway {
    clob: Arc<ClobClient>,
}

impl LiveGateway {
    pub fn new(clob: Arc<ClobClient>) -> Self {
        Self { clob }
    }
}

#[async_trait]
impl OrderGateway for LiveGateway {
    async fn post_limit_sell(
        &self,
        market: &Market,
        outcome: Outcome,
        price: Decimal,
        size: Decimal,
    ) -> Result<String, VenueError> {
        let price = floor_to_tick(price, market.tick_size);
        let posted = self
            .clob
            .post_limit(market.token_id(outcome), Side::Sell, price, size, market.neg_risk)
            .await?;
        Ok(posted.order_id)
    }

    async fn market_sell(
        &self,
        market: &Market,
        outcome: Outcome,
        shares: Decimal,
        worst_price: Decimal,
    ) -> Result<Option<Decimal>, VenueError> {
        let fill = self
            .clob
            .post_market(
                market.token_id(outcome),
                Side::Sell,
                shares,
                worst_price,
                market.neg_risk,
                Tif::Fok,
            )
            .await?;
        Ok(fill.fill_price)
    }

    async fn market_buy(
        &self,
        market: &Market,
        outcome: Outcome,
        collateral: Decimal,
        worst_price: Decimal,
    ) -> Result<Option<Decimal>, VenueError> {
        let fill = self
            .clob
            .post_market(
                market.token_id(outcome),
                Side::Buy,
                collateral,
                worst_price,
                market.neg_risk,
                Tif::Fok,
            )
            .await?;
        Ok(fill.fill_price)
    }

    async fn cancel(&self, order_id: &str) -> Result<(), VenueError> {
        Ok(self.clob.cancel(order_id).await?)
    }

    async fn poll_fill(
        &self,
        order_id: &str,
        expected_size: Decimal,
    ) -> Result<FillStatus, VenueError> {
        let info = self.clob.order_status(order_id).await?;
        if info.is_filled(expected_size) {
            let price = info.price_dec().unwrap_or_default();
            return Ok(FillStatus::Filled(price));
        }
        if info.status.eq_ignore_ascii_case("canceled")
            || info.status.eq_ignore_ascii_case("cancelled")
        {
            return Ok(FillStatus::Cancelled);
        }
        Ok(FillStatus::Pending)
    }

    async fn midpoint(&self, token_id: &str) -> Result<Decimal, VenueError> {
        Ok(self.clob.midpoint(token_id).await?)
    }
}

/// Chain operations over the CTF client.
pub struct LiveChain {
    ctf: Arc<CtfClient>,
}

impl LiveChain {
    pub fn new(ctf: Arc<CtfClient>) -> Self {
        Self { ctf }
    }
}

#[async_trait]
impl ChainClient for LiveChain {
    async fn collateral_balance(&self) -> Result<Decimal, VenueError> {
        Ok(self.ctf.collateral_balance().await?)
    }

    async fn token_balance(&self, token_id: &str) -> Result<Decimal, VenueError> {
        Ok(self.ctf.token_balance(token_id).await?)
    }

    async fn split(&self, market: &Market, collateral: Decimal) -> Result<Decimal, VenueError> {
        Ok(self.ctf.split(market.condition_id, collateral).await?)
    }

    async fn merge(&self, market: &Market, shares: Decimal) -> Result<Decimal, VenueError> {
        Ok(self.ctf.merge(market.condition_id, shares).await?)
    }

    async fn redeem(&self, condition_id: B256) -> Result<(), VenueError> {
        Ok(self.ctf.redeem(condition_id).await?)
    }

    async fn payout_denominator(&self, condition_id: B256) -> Result<u64, VenueError> {
        Ok(self.ctf.payout_denominator(condition_id).await?)
    }
}
