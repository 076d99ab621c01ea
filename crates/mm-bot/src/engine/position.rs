//! Per-market position state machine.
//!
//! One task owns one `Position` and is its only mutator. The flow is
//! enter (split + two resting sells), monitor, then one of: both legs
//! fill, the deadline passes, or a cut-loss branch unwinds the remainder.
//!
//! In-memory share counts are advisory. Before any sell that depends on an
//! exact quantity the on-chain balance is read and used instead; partial
//! fills may have consumed shares since the last tick.

use std::sync::Arc;

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use mm_common::{Asset, Outcome};
use mm_market::Market;

use crate::engine::{adaptive, recovery, MmParams};
use crate::venue::{ChainClient, FillStatus, OrderGateway, VenueError};

/// Balances below this are dust and treated as zero.
pub(crate) const DUST: Decimal = dec!(0.001);

/// Entry price per leg after a split.
pub(crate) const ENTRY_PRICE: Decimal = dec!(0.5);

/// Worst price for deadline market sells.
pub(crate) const CUT_SELL_WORST_PRICE: Decimal = dec!(0.01);

/// Position life-cycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Entering,
    Monitoring,
    Cutting,
    Done,
    Expired,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PositionStatus::Entering => "entering",
            PositionStatus::Monitoring => "monitoring",
            PositionStatus::Cutting => "cutting",
            PositionStatus::Done => "done",
            PositionStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// One outcome-token holding of a position.
#[derive(Debug, Clone)]
pub struct Leg {
    pub outcome: Outcome,
    pub token_id: String,
    pub shares: Decimal,
    pub entry_price: Decimal,
    pub entry_cost: Decimal,
    pub order_id: Option<String>,
    pub filled: bool,
    pub fill_price: Option<Decimal>,
}

impl Leg {
    fn new(outcome: Outcome, token_id: String, shares: Decimal) -> Self {
        Self {
            outcome,
            token_id,
            shares,
            entry_price: ENTRY_PRICE,
            entry_cost: shares * ENTRY_PRICE,
            order_id: None,
            filled: false,
            fill_price: None,
        }
    }

    /// Realized P&L of a leg sold in full at its fill price.
    fn pnl(&self) -> Decimal {
        match self.fill_price {
            Some(fill) => (fill - self.entry_price) * self.shares,
            None => Decimal::ZERO,
        }
    }
}

/// A live position. Exists from split to terminal status.
#[derive(Debug, Clone)]
pub struct Position {
    pub market: Market,
    pub status: PositionStatus,
    pub entered_at: DateTime<Utc>,
    pub yes: Leg,
    pub no: Leg,
}

impl Position {
    fn new(market: Market, shares: Decimal) -> Self {
        let yes = Leg::new(Outcome::Yes, market.yes_token_id.clone(), shares);
        let no = Leg::new(Outcome::No, market.no_token_id.clone(), shares);
        Self {
            market,
            status: PositionStatus::Entering,
            entered_at: Utc::now(),
            yes,
            no,
        }
    }

    fn leg_mut(&mut self, outcome: Outcome) -> &mut Leg {
        match outcome {
            Outcome::Yes => &mut self.yes,
            Outcome::No => &mut self.no,
        }
    }
}

/// Report handed to the dispatcher on task termination.
#[derive(Debug, Clone)]
pub struct PositionReport {
    pub asset: Asset,
    pub condition_id: B256,
    pub status: PositionStatus,
    pub pnl: Decimal,
}

/// Terminal decision of one monitor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorVerdict {
    Continue,
    BothFilled,
    Expired,
    AdaptiveCut,
    CutNeither,
    CutOneImmediate,
}

/// Pure transition rule of the monitor loop.
pub(crate) fn monitor_verdict(
    yes_filled: bool,
    no_filled: bool,
    remaining: Duration,
    cut_loss_time: Duration,
    adaptive: bool,
) -> MonitorVerdict {
    if yes_filled && no_filled {
        return MonitorVerdict::BothFilled;
    }
    if remaining.is_zero() {
        return MonitorVerdict::Expired;
    }
    let one_filled = yes_filled != no_filled;
    if one_filled && adaptive {
        return MonitorVerdict::AdaptiveCut;
    }
    if remaining <= cut_loss_time {
        if one_filled {
            return MonitorVerdict::CutOneImmediate;
        }
        return MonitorVerdict::CutNeither;
    }
    MonitorVerdict::Continue
}

/// Task running one position to a terminal status.
pub struct PositionTask {
    market: Market,
    params: MmParams,
    gateway: Arc<dyn OrderGateway>,
    chain: Arc<dyn ChainClient>,
    shutdown: broadcast::Receiver<()>,
}

impl PositionTask {
    pub fn new(
        market: Market,
        params: MmParams,
        gateway: Arc<dyn OrderGateway>,
        chain: Arc<dyn ChainClient>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            market,
            params,
            gateway,
            chain,
            shutdown,
        }
    }

    /// Run to completion. Never panics the process; any error terminates
    /// only this position.
    pub async fn run(mut self) -> PositionReport {
        let asset = self.market.asset;
        let condition_id = self.market.condition_id;
        match self.run_inner().await {
            Ok(report) => report,
            Err(e) => {
                error!(asset = %asset, condition = %condition_id, error = %e, "position task failed");
                PositionReport {
                    asset,
                    condition_id,
                    status: PositionStatus::Expired,
                    pnl: Decimal::ZERO,
                }
            }
        }
    }

    async fn run_inner(&mut self) -> Result<PositionReport, VenueError> {
        let market = self.market.clone();
        let asset = market.asset;
        let condition_id = market.condition_id;

        let report = |status: PositionStatus, pnl: Decimal| PositionReport {
            asset,
            condition_id,
            status,
            pnl,
        };

        let Some(deadline) = market_deadline(&market) else {
            warn!(asset = %asset, "market already settled, skipping entry");
            return Ok(report(PositionStatus::Entering, Decimal::ZERO));
        };
        let cut_deadline = deadline
            .checked_sub(self.params.cut_loss_time)
            .unwrap_or_else(Instant::now);

        // Enter: confirm buffer, split, rest both sells.
        let balance = self.chain.collateral_balance().await?;
        let required = self.params.trade_size * dec!(2);
        if balance < required {
            warn!(
                asset = %asset,
                %balance,
                %required,
                "collateral below entry buffer, skipping market"
            );
            return Ok(report(PositionStatus::Entering, Decimal::ZERO));
        }

        let shares = match self.chain.split(&market, self.params.trade_size).await {
            Ok(shares) => shares,
            Err(e) => {
                warn!(asset = %asset, error = %e, "split rejected, position not entered");
                return Ok(report(PositionStatus::Entering, Decimal::ZERO));
            }
        };
        let mut position = Position::new(market.clone(), shares);

        for outcome in [Outcome::Yes, Outcome::No] {
            let order_id = self
                .gateway
                .post_limit_sell(&market, outcome, self.params.sell_price, shares)
                .await?;
            position.leg_mut(outcome).order_id = Some(order_id);
        }
        position.status = PositionStatus::Monitoring;
        info!(
            asset = %asset,
            condition = %condition_id,
            %shares,
            sell = %self.params.sell_price,
            "position entered"
        );

        // Monitor.
        loop {
            if !self.sleep_or_shutdown(self.params.monitor_interval).await {
                info!(asset = %asset, "shutdown during monitoring, leaving orders resting");
                return Ok(report(position.status, Decimal::ZERO));
            }

            for outcome in [Outcome::Yes, Outcome::No] {
                self.poll_leg(&mut position, outcome).await;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let verdict = monitor_verdict(
                position.yes.filled,
                position.no.filled,
                remaining,
                self.params.cut_loss_time,
                self.params.adaptive_cut_loss,
            );
            debug!(asset = %asset, ?verdict, remaining = remaining.as_secs(), "monitor tick");

            match verdict {
                MonitorVerdict::Continue => {}
                MonitorVerdict::BothFilled => {
                    position.status = PositionStatus::Done;
                    let pnl = position.yes.pnl() + position.no.pnl();
                    info!(asset = %asset, %pnl, "both legs filled");
                    return Ok(report(PositionStatus::Done, pnl));
                }
                MonitorVerdict::Expired => {
                    position.status = PositionStatus::Expired;
                    warn!(asset = %asset, "market expired while monitoring, tokens go to resolution");
                    return Ok(report(PositionStatus::Expired, Decimal::ZERO));
                }
                MonitorVerdict::AdaptiveCut => {
                    let (filled, unfilled) = if position.yes.filled {
                        (position.yes.clone(), Outcome::No)
                    } else {
                        (position.no.clone(), Outcome::Yes)
                    };
                    position.status = PositionStatus::Cutting;
                    let p_f = filled.fill_price.unwrap_or(self.params.sell_price);
                    let leg_pnl = adaptive::run(
                        &market,
                        &self.params,
                        self.gateway.as_ref(),
                        self.chain.as_ref(),
                        position.leg_mut(unfilled),
                        p_f,
                        cut_deadline,
                        &mut self.shutdown,
                    )
                    .await?;
                    let pnl = filled.pnl() + leg_pnl;
                    info!(asset = %asset, %pnl, "adaptive cut complete");
                    return Ok(report(PositionStatus::Done, pnl));
                }
                MonitorVerdict::CutNeither => {
                    position.status = PositionStatus::Cutting;
                    let pnl = self.cut_neither(&mut position, deadline).await?;
                    return Ok(report(PositionStatus::Done, pnl));
                }
                MonitorVerdict::CutOneImmediate => {
                    position.status = PositionStatus::Cutting;
                    let pnl = self.cut_one_immediate(&mut position).await?;
                    return Ok(report(PositionStatus::Done, pnl));
                }
            }
        }
    }

    /// Poll one leg's resting order; fill state latches on.
    async fn poll_leg(&self, position: &mut Position, outcome: Outcome) {
        let leg = position.leg_mut(outcome);
        if leg.filled {
            return;
        }
        let Some(order_id) = leg.order_id.clone() else {
            return;
        };
        match self.gateway.poll_fill(&order_id, leg.shares).await {
            Ok(FillStatus::Filled(price)) => {
                leg.filled = true;
                leg.fill_price = Some(price);
                info!(outcome = %outcome, %price, "leg filled");
            }
            Ok(FillStatus::Pending) => {}
            Ok(FillStatus::Cancelled) => {
                warn!(outcome = %outcome, %order_id, "resting order gone without fill");
                leg.order_id = None;
            }
            Err(e) => {
                // Next tick retries naturally.
                warn!(outcome = %outcome, error = %e, "fill poll failed");
            }
        }
    }

    /// Neither leg filled: cancel both, merge the on-chain pair back to
    /// collateral, optionally attempt a recovery buy.
    async fn cut_neither(
        &mut self,
        position: &mut Position,
        deadline: Instant,
    ) -> Result<Decimal, VenueError> {
        let market = position.market.clone();
        info!(asset = %market.asset, "cut-loss: neither leg filled, merging");

        for leg in [&position.yes, &position.no] {
            if let Some(order_id) = &leg.order_id {
                if let Err(e) = self.gateway.cancel(order_id).await {
                    warn!(%order_id, error = %e, "cancel failed");
                }
            }
        }

        let yes_balance = self.chain.token_balance(&position.yes.token_id).await?;
        let no_balance = self.chain.token_balance(&position.no.token_id).await?;
        let mergeable = yes_balance.min(no_balance);

        let recovered = if mergeable >= DUST {
            self.chain.merge(&market, mergeable).await?
        } else {
            Decimal::ZERO
        };

        // A prior partial fill leaves one side asymmetric; the residual is
        // left to resolution.
        let residual = (yes_balance - mergeable).max(no_balance - mergeable);
        if residual > DUST {
            warn!(%residual, "asymmetric leftover after merge, leaving to resolution");
        }

        // Shares missing from the balances were sold by partial fills at
        // the resting limit price.
        let sold_yes = (position.yes.shares - yes_balance).max(Decimal::ZERO);
        let sold_no = (position.no.shares - no_balance).max(Decimal::ZERO);
        let proceeds = (sold_yes + sold_no) * self.params.sell_price;

        let cost = position.yes.entry_cost + position.no.entry_cost;
        let mut pnl = recovered + proceeds - cost;
        info!(%recovered, %pnl, "merge complete");

        if self.params.recovery_buy {
            pnl += recovery::run(
                &market,
                &self.params,
                self.gateway.as_ref(),
                self.chain.as_ref(),
                deadline,
                &mut self.shutdown,
            )
            .await;
        }

        position.status = PositionStatus::Done;
        Ok(pnl)
    }

    /// One leg filled with the adaptive controller disabled: cancel the
    /// unfilled leg and market-sell its reconciled balance.
    async fn cut_one_immediate(&mut self, position: &mut Position) -> Result<Decimal, VenueError> {
        let market = position.market.clone();
        let unfilled_outcome = if position.yes.filled {
            Outcome::No
        } else {
            Outcome::Yes
        };
        let filled_pnl = if position.yes.filled {
            position.yes.pnl()
        } else {
            position.no.pnl()
        };
        info!(asset = %market.asset, unfilled = %unfilled_outcome, "cut-loss: one leg filled, market-selling remainder");

        let leg = position.leg_mut(unfilled_outcome);
        if let Some(order_id) = leg.order_id.take() {
            if let Err(e) = self.gateway.cancel(&order_id).await {
                warn!(%order_id, error = %e, "cancel failed");
            }
        }

        // The on-chain balance is authoritative; the limit may have been
        // partially consumed during the monitor window.
        let balance = self.chain.token_balance(&leg.token_id).await?;
        let sold_at_limit = (leg.shares - balance).max(Decimal::ZERO);
        let mut leg_pnl = (self.params.sell_price - leg.entry_price) * sold_at_limit;

        if balance < DUST {
            leg.filled = true;
            leg.fill_price = Some(self.params.sell_price);
            leg_pnl = (self.params.sell_price - leg.entry_price) * leg.shares;
        } else {
            match self
                .gateway
                .market_sell(&market, unfilled_outcome, balance, CUT_SELL_WORST_PRICE)
                .await?
            {
                Some(price) => {
                    leg.filled = true;
                    leg.fill_price = Some(price);
                    leg_pnl += (price - leg.entry_price) * balance;
                }
                None => {
                    warn!(outcome = %unfilled_outcome, "no liquidity for cut sell, leaving to resolution");
                }
            }
        }

        position.status = PositionStatus::Done;
        Ok(filled_pnl + leg_pnl)
    }

    /// Sleep one cadence; false means shutdown fired.
    async fn sleep_or_shutdown(&mut self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => true,
            _ = self.shutdown.recv() => false,
        }
    }
}

/// Deadline of a market as a monotonic instant. `None` once settled.
pub(crate) fn market_deadline(market: &Market) -> Option<Instant> {
    let remaining = market.remaining().to_std().ok()?;
    if remaining.is_zero() {
        return None;
    }
    Some(Instant::now() + remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLT: Duration = Duration::from_secs(60);

    #[test]
    fn test_both_filled_wins_over_everything() {
        assert_eq!(
            monitor_verdict(true, true, Duration::ZERO, CLT, true),
            MonitorVerdict::BothFilled
        );
    }

    #[test]
    fn test_expiry() {
        assert_eq!(
            monitor_verdict(false, false, Duration::ZERO, CLT, true),
            MonitorVerdict::Expired
        );
        assert_eq!(
            monitor_verdict(true, false, Duration::ZERO, CLT, false),
            MonitorVerdict::Expired
        );
    }

    #[test]
    fn test_adaptive_entered_immediately_on_single_fill() {
        // Long before the cut window, one fill hands off to the controller.
        assert_eq!(
            monitor_verdict(true, false, Duration::from_secs(200), CLT, true),
            MonitorVerdict::AdaptiveCut
        );
        assert_eq!(
            monitor_verdict(false, true, Duration::from_secs(200), CLT, true),
            MonitorVerdict::AdaptiveCut
        );
    }

    #[test]
    fn test_single_fill_without_adaptive_waits_for_cut_window() {
        assert_eq!(
            monitor_verdict(true, false, Duration::from_secs(200), CLT, false),
            MonitorVerdict::Continue
        );
        assert_eq!(
            monitor_verdict(true, false, Duration::from_secs(60), CLT, false),
            MonitorVerdict::CutOneImmediate
        );
    }

    #[test]
    fn test_neither_filled_cut_at_window() {
        assert_eq!(
            monitor_verdict(false, false, Duration::from_secs(61), CLT, true),
            MonitorVerdict::Continue
        );
        assert_eq!(
            monitor_verdict(false, false, Duration::from_secs(60), CLT, true),
            MonitorVerdict::CutNeither
        );
    }

    #[test]
    fn test_leg_pnl() {
        let mut leg = Leg::new(Outcome::Yes, "1".into(), dec!(5));
        assert_eq!(leg.entry_cost, dec!(2.5));
        assert_eq!(leg.pnl(), Decimal::ZERO);
        leg.filled = true;
        leg.fill_price = Some(dec!(0.60));
        assert_eq!(leg.pnl(), dec!(0.50));
    }
}
