//! Startup cleanup and the periodic redeemer.
//!
//! Startup runs before any position task: every open CLOB order is
//! cancelled, then stranded outcome-token pairs of unresolved conditions
//! are merged back to collateral. That is the whole restart story; the
//! process keeps no position state on disk, the chain is the source of
//! truth.
//!
//! The redeemer then claims resolved conditions on a timer for as long as
//! the process lives.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use mm_chain::ctf::parse_condition_id;
use mm_chain::CtfClient;
use mm_common::MIN_SHARES_PER_SIDE;
use mm_market::positions::PositionRecord;
use mm_market::{group_by_condition, ClobClient, DataApiClient, GammaClient};

/// Balances below this are dust and skipped.
const DUST: Decimal = dec!(0.001);

/// Startup cleanup and periodic redemption over one wallet.
pub struct Cleanup {
    ctf: Arc<CtfClient>,
    clob: Arc<ClobClient>,
    data_api: DataApiClient,
    gamma: GammaClient,
    wallet: Address,
}

impl Cleanup {
    pub fn new(
        ctf: Arc<CtfClient>,
        clob: Arc<ClobClient>,
        data_api: DataApiClient,
        gamma: GammaClient,
        wallet: Address,
    ) -> Self {
        Self {
            ctf,
            clob,
            data_api,
            gamma,
            wallet,
        }
    }

    /// Cancel open orders and merge stranded pairs. Best-effort: every
    /// failure is logged and the next condition is processed anyway.
    pub async fn startup(&self) {
        info!("startup cleanup: cancelling open orders");
        if let Err(e) = self.clob.cancel_all().await {
            warn!(error = %e, "cancel-all failed");
        }

        let records = match self.data_api.positions(self.wallet).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "positions fetch failed, skipping merge pass");
                return;
            }
        };
        if records.is_empty() {
            info!("startup cleanup: no held positions");
            return;
        }

        for (condition, group) in group_by_condition(records) {
            if let Err(e) = self.merge_stranded(&condition, &group).await {
                warn!(condition, error = %e, "startup merge failed");
            }
        }
    }

    /// Merge `min(yes, no)` of one unresolved condition's pair.
    async fn merge_stranded(
        &self,
        condition: &str,
        group: &[PositionRecord],
    ) -> Result<(), String> {
        let condition_id = parse_condition_id(condition).map_err(|e| e.to_string())?;

        let denominator = self
            .ctf
            .payout_denominator(condition_id)
            .await
            .map_err(|e| e.to_string())?;
        if denominator != 0 {
            debug!(condition, "resolved, left to the redeemer");
            return Ok(());
        }

        let Some((yes_token, no_token)) = self.token_pair(condition, group).await else {
            warn!(condition, "no metadata for held condition, skipping");
            return Ok(());
        };

        let yes_balance = self
            .ctf
            .token_balance(&yes_token)
            .await
            .map_err(|e| e.to_string())?;
        let no_balance = self
            .ctf
            .token_balance(&no_token)
            .await
            .map_err(|e| e.to_string())?;
        let mergeable = yes_balance.min(no_balance);

        if yes_balance < MIN_SHARES_PER_SIDE || no_balance < MIN_SHARES_PER_SIDE {
            debug!(condition, %yes_balance, %no_balance, "below merge minimum");
            return Ok(());
        }

        let recovered = self
            .ctf
            .merge(condition_id, mergeable)
            .await
            .map_err(|e| e.to_string())?;
        info!(condition, %recovered, "merged stranded pair");
        Ok(())
    }

    /// YES/NO token ids for a condition, via metadata with a token-id
    /// fallback.
    async fn token_pair(
        &self,
        condition: &str,
        group: &[PositionRecord],
    ) -> Option<(String, String)> {
        if let Ok(Some(meta)) = self.gamma.market_by_condition(condition).await {
            if let Some(pair) = meta.token_pair() {
                return Some(pair);
            }
        }
        let any_token = &group.first()?.token_id;
        self.gamma
            .market_by_token_id(any_token)
            .await
            .ok()
            .flatten()
            .and_then(|meta| meta.token_pair())
    }

    /// Periodic redeemer loop. Failures are retried on the next tick.
    pub async fn run_redeemer(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(period = interval.as_secs(), "redeemer started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup cleanup and
        // first entries settle before the first pass.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.redeem_pass().await,
                _ = shutdown.recv() => break,
            }
        }
        info!("redeemer stopped");
    }

    async fn redeem_pass(&self) {
        let records = match self.data_api.positions(self.wallet).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "positions fetch failed, retrying next tick");
                return;
            }
        };

        for (condition, group) in group_by_condition(records) {
            if let Err(e) = self.redeem_condition(&condition, &group).await {
                warn!(condition, error = %e, "redeem failed, retrying next tick");
            }
        }
    }

    async fn redeem_condition(
        &self,
        condition: &str,
        group: &[PositionRecord],
    ) -> Result<(), String> {
        let condition_id = parse_condition_id(condition).map_err(|e| e.to_string())?;

        let denominator = self
            .ctf
            .payout_denominator(condition_id)
            .await
            .map_err(|e| e.to_string())?;
        if denominator == 0 {
            debug!(condition, "unresolved, skipping");
            return Ok(());
        }

        let mut total = Decimal::ZERO;
        let mut balances = Vec::with_capacity(group.len());
        for record in group {
            let balance = self
                .ctf
                .token_balance(&record.token_id)
                .await
                .map_err(|e| e.to_string())?;
            total += balance;
            balances.push((record.token_id.clone(), balance));
        }
        if total < DUST {
            debug!(condition, %total, "dust holdings, skipping");
            return Ok(());
        }

        let expected = self
            .expected_collateral(condition_id, condition, &balances, denominator)
            .await;

        self.ctf
            .redeem(condition_id)
            .await
            .map_err(|e| e.to_string())?;
        match expected {
            Some(expected) => info!(condition, %expected, "redeemed, expecting collateral"),
            None => info!(condition, "redeemed"),
        }
        Ok(())
    }

    /// `sum(shares_i * numerator_i / denominator)` over the held outcome
    /// tokens. `None` when the outcome mapping is unavailable.
    async fn expected_collateral(
        &self,
        condition_id: B256,
        condition: &str,
        balances: &[(String, Decimal)],
        denominator: u64,
    ) -> Option<Decimal> {
        let (yes_token, no_token) = self
            .gamma
            .market_by_condition(condition)
            .await
            .ok()
            .flatten()?
            .token_pair()?;

        let mut expected = Decimal::ZERO;
        for (token_id, balance) in balances {
            let index = if *token_id == yes_token {
                0
            } else if *token_id == no_token {
                1
            } else {
                continue;
            };
            let numerator = self.ctf.payout_numerator(condition_id, index).await.ok()?;
            expected += *balance * Decimal::from(numerator) / Decimal::from(denominator);
        }
        Some(expected)
    }
}
