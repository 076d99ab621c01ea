//! Recovery buy after a neither-filled merge.
//!
//! The merge exits flat; when one side then shows momentum into the
//! settlement window, a bounded market buy takes that side and is either
//! kept to resolution or flattened if the move fades. Strictly
//! best-effort: every failure path exits flat-by-default and returns a
//! zero delta.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use mm_common::Outcome;
use mm_market::Market;

use crate::engine::position::{CUT_SELL_WORST_PRICE, DUST};
use crate::engine::MmParams;
use crate::venue::{ChainClient, OrderGateway, VenueError};

/// Midpoint samples taken before committing.
const SAMPLE_COUNT: usize = 10;

/// Sampling cadence.
const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Hold period after the buy.
const HOLD_PERIOD: Duration = Duration::from_secs(30);

/// Below this much remaining lifetime, resolution is the exit.
const RESOLUTION_CUTOFF: Duration = Duration::from_secs(5);

/// Worst price for the recovery buy.
const BUY_WORST_PRICE: Decimal = dec!(0.99);

/// Candidate rule over the sample series: the side whose last sample is at
/// or above the threshold and has not declined since the first sample.
/// When both qualify, the stronger last sample wins.
pub(crate) fn pick_candidate(
    yes: &[Decimal],
    no: &[Decimal],
    threshold: Decimal,
) -> Option<Outcome> {
    let qualifies = |series: &[Decimal]| -> Option<Decimal> {
        let first = *series.first()?;
        let last = *series.last()?;
        (last >= threshold && last >= first).then_some(last)
    };
    match (qualifies(yes), qualifies(no)) {
        (Some(y), Some(n)) if y >= n => Some(Outcome::Yes),
        (Some(_), Some(_)) => Some(Outcome::No),
        (Some(_), None) => Some(Outcome::Yes),
        (None, Some(_)) => Some(Outcome::No),
        (None, None) => None,
    }
}

/// Run the recovery protocol. Returns the realized P&L delta.
pub(crate) async fn run(
    market: &Market,
    params: &MmParams,
    gateway: &dyn OrderGateway,
    chain: &dyn ChainClient,
    deadline: Instant,
    shutdown: &mut broadcast::Receiver<()>,
) -> Decimal {
    match run_inner(market, params, gateway, chain, deadline, shutdown).await {
        Ok(delta) => delta,
        Err(e) => {
            warn!(error = %e, "recovery buy aborted");
            Decimal::ZERO
        }
    }
}

async fn run_inner(
    market: &Market,
    params: &MmParams,
    gateway: &dyn OrderGateway,
    chain: &dyn ChainClient,
    deadline: Instant,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<Decimal, VenueError> {
    let mut yes_samples = Vec::with_capacity(SAMPLE_COUNT);
    let mut no_samples = Vec::with_capacity(SAMPLE_COUNT);

    for _ in 0..SAMPLE_COUNT {
        tokio::select! {
            _ = tokio::time::sleep(SAMPLE_PERIOD) => {}
            _ = shutdown.recv() => return Ok(Decimal::ZERO),
        }
        match (
            gateway.midpoint(&market.yes_token_id).await,
            gateway.midpoint(&market.no_token_id).await,
        ) {
            (Ok(yes), Ok(no)) => {
                yes_samples.push(yes);
                no_samples.push(no);
            }
            (yes, no) => {
                debug!(yes_err = yes.is_err(), no_err = no.is_err(), "sample fetch failed");
            }
        }
    }

    let Some(candidate) = pick_candidate(&yes_samples, &no_samples, params.recovery_threshold)
    else {
        debug!("no recovery candidate");
        return Ok(Decimal::ZERO);
    };

    let spend = if params.recovery_size > Decimal::ZERO {
        params.recovery_size
    } else {
        params.trade_size
    };
    let balance = chain.collateral_balance().await?;
    if balance < spend {
        warn!(%balance, %spend, "insufficient collateral for recovery buy");
        return Ok(Decimal::ZERO);
    }

    let Some(fill_price) = gateway
        .market_buy(market, candidate, spend, BUY_WORST_PRICE)
        .await?
    else {
        debug!("recovery buy took no liquidity");
        return Ok(Decimal::ZERO);
    };
    info!(side = %candidate, %spend, %fill_price, "recovery buy filled");

    tokio::select! {
        _ = tokio::time::sleep(HOLD_PERIOD) => {}
        _ = shutdown.recv() => return Ok(Decimal::ZERO),
    }

    if deadline.saturating_duration_since(Instant::now()) < RESOLUTION_CUTOFF {
        info!(side = %candidate, "too close to settlement, keeping recovery position");
        return Ok(Decimal::ZERO);
    }

    let mid = gateway.midpoint(market.token_id(candidate)).await?;
    if mid >= fill_price {
        info!(side = %candidate, %mid, %fill_price, "recovery position holding its gain");
        return Ok(Decimal::ZERO);
    }

    let held = chain.token_balance(market.token_id(candidate)).await?;
    if held < DUST {
        return Ok(Decimal::ZERO);
    }
    match gateway
        .market_sell(market, candidate, held, CUT_SELL_WORST_PRICE)
        .await?
    {
        Some(sell_price) => {
            let delta = (sell_price - fill_price) * held;
            info!(side = %candidate, %sell_price, %delta, "recovery position flattened");
            Ok(delta)
        }
        None => {
            warn!(side = %candidate, "no liquidity to flatten recovery position");
            Ok(Decimal::ZERO)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const THRESHOLD: Decimal = dec!(0.60);

    #[test]
    fn test_no_candidate_when_both_weak() {
        let yes = [dec!(0.50), dec!(0.52)];
        let no = [dec!(0.48), dec!(0.46)];
        assert_eq!(pick_candidate(&yes, &no, THRESHOLD), None);
    }

    #[test]
    fn test_declining_side_disqualified() {
        // Above threshold but below its first sample.
        let yes = [dec!(0.70), dec!(0.65)];
        let no = [dec!(0.30), dec!(0.32)];
        assert_eq!(pick_candidate(&yes, &no, THRESHOLD), None);
    }

    #[test]
    fn test_rising_side_above_threshold_wins() {
        let yes = [dec!(0.55), dec!(0.62)];
        let no = [dec!(0.45), dec!(0.38)];
        assert_eq!(pick_candidate(&yes, &no, THRESHOLD), Some(Outcome::Yes));
    }

    #[test]
    fn test_stronger_side_wins_when_both_qualify() {
        let yes = [dec!(0.60), dec!(0.61)];
        let no = [dec!(0.60), dec!(0.64)];
        assert_eq!(pick_candidate(&yes, &no, THRESHOLD), Some(Outcome::No));
    }

    #[test]
    fn test_empty_series() {
        assert_eq!(pick_candidate(&[], &[], THRESHOLD), None);
    }
}
