//! Adaptive cut-loss controller for the single-leg-filled case.
//!
//! One leg sold at `p_f`; the controller works the unfilled leg against a
//! profit floor of `max(0, min_combined - p_f)` so the two-leg sum never
//! falls below the configured minimum by its own doing. Below the floor it
//! deliberately declines to quote and waits; at the cut-loss deadline the
//! remainder is market-sold regardless.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mm_common::{ceil_to_tick, floor_to_tick};
use mm_market::Market;

use crate::engine::position::{Leg, CUT_SELL_WORST_PRICE, DUST};
use crate::engine::MmParams;
use crate::venue::{ChainClient, FillStatus, OrderGateway, VenueError};

/// Cancel when the midpoint drops this far below the resting limit.
const CANCEL_DROP_RATIO: Decimal = dec!(0.95);

/// Re-post when the target improves this far above the resting limit.
const REPOST_IMPROVE_RATIO: Decimal = dec!(1.02);

/// Quoting decision for one controller tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum QuoteAction {
    Hold,
    Cancel,
    Repost(Decimal),
    Post(Decimal),
}

/// Pure quoting rule.
///
/// With a resting limit `L`: cancel when the midpoint falls below the
/// floor or below `0.95 L`; cancel-and-repost when the capped target
/// improves past `1.02 L`. With no resting limit: quote `min(mid,
/// sell_price)` once the midpoint is at or above the floor.
pub(crate) fn quote_action(
    active_limit: Option<Decimal>,
    mid: Decimal,
    floor: Decimal,
    sell_price: Decimal,
) -> QuoteAction {
    let target = mid.min(sell_price);
    match active_limit {
        Some(limit) => {
            if mid < floor || mid < CANCEL_DROP_RATIO * limit {
                QuoteAction::Cancel
            } else if target > REPOST_IMPROVE_RATIO * limit {
                QuoteAction::Repost(target)
            } else {
                QuoteAction::Hold
            }
        }
        None => {
            if mid >= floor {
                QuoteAction::Post(target)
            } else {
                QuoteAction::Hold
            }
        }
    }
}

/// Tick-align a quote without ever crossing below the floor.
pub(crate) fn quote_price(target: Decimal, floor: Decimal, tick: Decimal) -> Decimal {
    let aligned = floor_to_tick(target, tick);
    if aligned < floor {
        ceil_to_tick(floor, tick)
    } else {
        aligned
    }
}

/// Work the unfilled leg until fill or deadline. Returns the leg's
/// realized P&L contribution.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run(
    market: &Market,
    params: &MmParams,
    gateway: &dyn OrderGateway,
    chain: &dyn ChainClient,
    leg: &mut Leg,
    p_f: Decimal,
    cut_deadline: Instant,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<Decimal, VenueError> {
    let floor = (params.adaptive_min_combined - p_f).max(Decimal::ZERO);
    info!(
        outcome = %leg.outcome,
        %p_f,
        %floor,
        "adaptive controller engaged"
    );

    if let Some(order_id) = leg.order_id.take() {
        if let Err(e) = gateway.cancel(&order_id).await {
            warn!(%order_id, error = %e, "cancel of initial order failed");
        }
    }

    // On-chain balance is authoritative for everything quoted from here.
    let mut quoted_shares = chain.token_balance(&leg.token_id).await?;
    if quoted_shares < DUST {
        // Partial fills already consumed the leg at the resting price.
        leg.filled = true;
        leg.fill_price = Some(params.sell_price);
        return Ok((params.sell_price - leg.entry_price) * leg.shares);
    }
    let sold_at_limit = (leg.shares - quoted_shares).max(Decimal::ZERO);
    let mut realized = (params.sell_price - leg.entry_price) * sold_at_limit;

    let mut active: Option<(String, Decimal)> = None;
    let mut last_limit = params.sell_price;

    while Instant::now() < cut_deadline {
        tokio::select! {
            _ = tokio::time::sleep(params.adaptive_monitor) => {}
            _ = shutdown.recv() => {
                info!(outcome = %leg.outcome, "shutdown during adaptive cut, leaving order resting");
                return Ok(realized);
            }
        }

        if let Some((order_id, limit)) = active.clone() {
            match gateway.poll_fill(&order_id, quoted_shares).await {
                Ok(FillStatus::Filled(_)) => {
                    leg.filled = true;
                    leg.fill_price = Some(limit);
                    let combined = p_f + limit;
                    info!(outcome = %leg.outcome, %limit, %combined, "adaptive limit filled");
                    return Ok(realized + (limit - leg.entry_price) * quoted_shares);
                }
                Ok(FillStatus::Cancelled) => {
                    active = None;
                }
                Ok(FillStatus::Pending) => {}
                Err(e) => {
                    warn!(error = %e, "adaptive fill poll failed");
                    continue;
                }
            }
        }

        let mid = match gateway.midpoint(&leg.token_id).await {
            Ok(mid) => mid,
            Err(e) => {
                warn!(error = %e, "midpoint fetch failed");
                continue;
            }
        };

        match quote_action(active.as_ref().map(|(_, l)| *l), mid, floor, params.sell_price) {
            QuoteAction::Hold => {
                debug!(%mid, %floor, active = active.is_some(), "adaptive hold");
            }
            QuoteAction::Cancel => {
                if let Some((order_id, limit)) = active.take() {
                    info!(%mid, %limit, "cancelling adaptive limit");
                    if let Err(e) = gateway.cancel(&order_id).await {
                        warn!(%order_id, error = %e, "cancel failed");
                    }
                }
            }
            QuoteAction::Repost(target) | QuoteAction::Post(target) => {
                if let Some((order_id, _)) = active.take() {
                    if let Err(e) = gateway.cancel(&order_id).await {
                        warn!(%order_id, error = %e, "cancel before repost failed");
                        continue;
                    }
                }
                // Re-reconcile: a cancelled order may have partially
                // filled in the meantime.
                let balance = chain.token_balance(&leg.token_id).await?;
                let sold = (quoted_shares - balance).max(Decimal::ZERO);
                if sold > Decimal::ZERO {
                    realized += (last_limit - leg.entry_price) * sold;
                    quoted_shares = balance;
                }
                if quoted_shares < DUST {
                    leg.filled = true;
                    leg.fill_price = Some(last_limit);
                    return Ok(realized);
                }
                let price = quote_price(target, floor, market.tick_size);
                match gateway
                    .post_limit_sell(market, leg.outcome, price, quoted_shares)
                    .await
                {
                    Ok(order_id) => {
                        info!(%price, shares = %quoted_shares, "adaptive limit posted");
                        last_limit = price;
                        active = Some((order_id, price));
                    }
                    Err(e) => warn!(error = %e, "adaptive post failed"),
                }
            }
        }
    }

    // Deadline: flatten whatever is left.
    if let Some((order_id, _)) = active.take() {
        if let Err(e) = gateway.cancel(&order_id).await {
            warn!(%order_id, error = %e, "deadline cancel failed");
        }
    }
    let balance = chain.token_balance(&leg.token_id).await?;
    let sold = (quoted_shares - balance).max(Decimal::ZERO);
    if sold > Decimal::ZERO {
        realized += (last_limit - leg.entry_price) * sold;
    }
    if balance >= DUST {
        match gateway
            .market_sell(market, leg.outcome, balance, CUT_SELL_WORST_PRICE)
            .await?
        {
            Some(price) => {
                leg.filled = true;
                leg.fill_price = Some(price);
                realized += (price - leg.entry_price) * balance;
                info!(outcome = %leg.outcome, %price, "deadline market sell");
            }
            None => {
                warn!(outcome = %leg.outcome, "no liquidity at deadline, leaving to resolution");
            }
        }
    } else {
        leg.filled = true;
        leg.fill_price = Some(last_limit);
    }
    Ok(realized)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: Decimal = dec!(0.60);
    const SELL: Decimal = dec!(0.60);

    #[test]
    fn test_no_quote_below_floor() {
        assert_eq!(quote_action(None, dec!(0.59), FLOOR, SELL), QuoteAction::Hold);
        assert_eq!(quote_action(None, dec!(0.35), FLOOR, SELL), QuoteAction::Hold);
    }

    #[test]
    fn test_post_at_or_above_floor_capped_at_sell() {
        assert_eq!(
            quote_action(None, dec!(0.60), FLOOR, SELL),
            QuoteAction::Post(dec!(0.60))
        );
        // Capped: never quote above the configured sell target.
        assert_eq!(
            quote_action(None, dec!(0.75), FLOOR, SELL),
            QuoteAction::Post(dec!(0.60))
        );
    }

    #[test]
    fn test_posted_price_respects_floor() {
        for mid in [dec!(0.60), dec!(0.62), dec!(0.99)] {
            if let QuoteAction::Post(target) = quote_action(None, mid, FLOOR, SELL) {
                let price = quote_price(target, FLOOR, dec!(0.01));
                assert!(price >= FLOOR, "posted {price} below floor {FLOOR}");
            }
        }
        // Tick alignment never drops below an off-grid floor.
        let price = quote_price(dec!(0.613), dec!(0.613), dec!(0.01));
        assert!(price >= dec!(0.613));
    }

    #[test]
    fn test_cancel_when_mid_drops_below_floor() {
        assert_eq!(
            quote_action(Some(dec!(0.62)), dec!(0.59), FLOOR, SELL),
            QuoteAction::Cancel
        );
    }

    #[test]
    fn test_cancel_on_hard_drop() {
        // Floor 0.30 here so the floor rule is not the trigger.
        assert_eq!(
            quote_action(Some(dec!(0.80)), dec!(0.75), dec!(0.30), dec!(0.90)),
            QuoteAction::Cancel
        );
        // 0.77 >= 0.95 * 0.80: hold.
        assert_eq!(
            quote_action(Some(dec!(0.80)), dec!(0.77), dec!(0.30), dec!(0.90)),
            QuoteAction::Hold
        );
    }

    #[test]
    fn test_repost_on_improvement() {
        // Target 0.55 > 1.02 * 0.50.
        assert_eq!(
            quote_action(Some(dec!(0.50)), dec!(0.55), dec!(0.30), dec!(0.90)),
            QuoteAction::Repost(dec!(0.55))
        );
        // 0.505 < 1.02 * 0.50: not worth the churn.
        assert_eq!(
            quote_action(Some(dec!(0.50)), dec!(0.505), dec!(0.30), dec!(0.90)),
            QuoteAction::Hold
        );
    }
}
