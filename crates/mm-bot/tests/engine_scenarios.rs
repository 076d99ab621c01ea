//! End-to-end scenarios for the position state machine and dispatcher,
//! driven against a scripted venue on the paused tokio clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::B256;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, Instant};

use mm_bot::engine::{Engine, MmParams, PositionStatus, PositionTask};
use mm_bot::stats::SessionStats;
use mm_bot::venue::{ChainClient, FillStatus, OrderGateway, VenueError};
use mm_chain::ChainError;
use mm_common::{normalize_shares, Asset, Outcome, MIN_SHARES_PER_SIDE};
use mm_market::Market;

/// Midpoint schedule: (seconds from venue start, midpoint).
type Schedule = Vec<(u64, Decimal)>;

#[derive(Debug, Clone)]
struct MockOrder {
    token_id: String,
    price: Decimal,
    size: Decimal,
    filled: bool,
    cancelled: bool,
}

struct Inner {
    start: Instant,
    mids: HashMap<String, Schedule>,
    orders: Mutex<HashMap<String, MockOrder>>,
    collateral: Mutex<Decimal>,
    tokens: Mutex<HashMap<String, Decimal>>,
    next_id: AtomicU64,
    events: Mutex<Vec<String>>,
}

/// Scripted venue implementing both sides of the venue boundary.
#[derive(Clone)]
struct MockVenue(Arc<Inner>);

impl MockVenue {
    fn new(collateral: Decimal, mids: HashMap<String, Schedule>) -> Self {
        Self(Arc::new(Inner {
            start: Instant::now(),
            mids,
            orders: Mutex::new(HashMap::new()),
            collateral: Mutex::new(collateral),
            tokens: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events: Mutex::new(Vec::new()),
        }))
    }

    fn mid(&self, token_id: &str) -> Decimal {
        let elapsed = self.0.start.elapsed().as_secs();
        let schedule = self.0.mids.get(token_id).expect("unscripted token");
        schedule
            .iter()
            .rev()
            .find(|(t, _)| *t <= elapsed)
            .map(|(_, mid)| *mid)
            .unwrap_or(schedule[0].1)
    }

    fn note(&self, event: String) {
        self.0.events.lock().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.0.events.lock().clone()
    }

    fn collateral(&self) -> Decimal {
        *self.0.collateral.lock()
    }

    fn token(&self, token_id: &str) -> Decimal {
        self.0.tokens.lock().get(token_id).copied().unwrap_or_default()
    }

    fn settle_sell(&self, token_id: &str, shares: Decimal, price: Decimal) -> Decimal {
        let mut tokens = self.0.tokens.lock();
        let held = tokens.get(token_id).copied().unwrap_or_default();
        let sold = shares.min(held);
        *tokens.entry(token_id.to_string()).or_default() -= sold;
        *self.0.collateral.lock() += sold * price;
        sold
    }
}

#[async_trait]
impl OrderGateway for MockVenue {
    async fn post_limit_sell(
        &self,
        market: &Market,
        outcome: Outcome,
        price: Decimal,
        size: Decimal,
    ) -> Result<String, VenueError> {
        let id = format!("mock-{}", self.0.next_id.fetch_add(1, Ordering::Relaxed));
        self.0.orders.lock().insert(
            id.clone(),
            MockOrder {
                token_id: market.token_id(outcome).to_string(),
                price,
                size,
                filled: false,
                cancelled: false,
            },
        );
        self.note(format!("limit {outcome} {price}"));
        Ok(id)
    }

    async fn market_sell(
        &self,
        market: &Market,
        outcome: Outcome,
        shares: Decimal,
        _worst_price: Decimal,
    ) -> Result<Option<Decimal>, VenueError> {
        let mid = self.mid(market.token_id(outcome));
        self.settle_sell(market.token_id(outcome), shares, mid);
        self.note(format!("market-sell {outcome} {mid}"));
        Ok(Some(mid))
    }

    async fn market_buy(
        &self,
        market: &Market,
        outcome: Outcome,
        collateral: Decimal,
        _worst_price: Decimal,
    ) -> Result<Option<Decimal>, VenueError> {
        let mid = self.mid(market.token_id(outcome));
        let shares = collateral / mid;
        *self.0.collateral.lock() -= collateral;
        *self
            .0
            .tokens
            .lock()
            .entry(market.token_id(outcome).to_string())
            .or_default() += shares;
        self.note(format!("market-buy {outcome} {mid}"));
        Ok(Some(mid))
    }

    async fn cancel(&self, order_id: &str) -> Result<(), VenueError> {
        if let Some(order) = self.0.orders.lock().get_mut(order_id) {
            order.cancelled = true;
        }
        Ok(())
    }

    async fn poll_fill(
        &self,
        order_id: &str,
        _expected_size: Decimal,
    ) -> Result<FillStatus, VenueError> {
        let order = match self.0.orders.lock().get(order_id).cloned() {
            Some(order) => order,
            None => return Ok(FillStatus::Cancelled),
        };
        if order.filled {
            return Ok(FillStatus::Filled(order.price));
        }
        if order.cancelled {
            return Ok(FillStatus::Cancelled);
        }
        if self.mid(&order.token_id) >= order.price {
            self.settle_sell(&order.token_id, order.size, order.price);
            if let Some(order) = self.0.orders.lock().get_mut(order_id) {
                order.filled = true;
            }
            self.note(format!("filled {} @ {}", order.token_id, order.price));
            return Ok(FillStatus::Filled(order.price));
        }
        Ok(FillStatus::Pending)
    }

    async fn midpoint(&self, token_id: &str) -> Result<Decimal, VenueError> {
        Ok(self.mid(token_id))
    }
}

#[async_trait]
impl ChainClient for MockVenue {
    async fn collateral_balance(&self) -> Result<Decimal, VenueError> {
        Ok(self.collateral())
    }

    async fn token_balance(&self, token_id: &str) -> Result<Decimal, VenueError> {
        Ok(self.token(token_id))
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
        *self.0.collateral.lock() -= collateral;
        let mut tokens = self.0.tokens.lock();
        *tokens.entry(market.yes_token_id.clone()).or_default() += collateral;
        *tokens.entry(market.no_token_id.clone()).or_default() += collateral;
        self.note(format!("split {} {}", market.condition_id, collateral));
        Ok(collateral)
    }

    async fn merge(&self, market: &Market, shares: Decimal) -> Result<Decimal, VenueError> {
        let mut tokens = self.0.tokens.lock();
        *tokens.entry(market.yes_token_id.clone()).or_default() -= shares;
        *tokens.entry(market.no_token_id.clone()).or_default() -= shares;
        *self.0.collateral.lock() += shares;
        self.note(format!("merge {shares}"));
        Ok(shares)
    }

    async fn redeem(&self, _condition_id: B256) -> Result<(), VenueError> {
        self.note("redeem".to_string());
        Ok(())
    }

    async fn payout_denominator(&self, _condition_id: B256) -> Result<u64, VenueError> {
        Ok(0)
    }
}

fn market(asset: Asset, tag: u8, yes: &str, no: &str, lifetime_secs: i64) -> Market {
    Market {
        asset,
        slot_start: 0,
        condition_id: B256::repeat_byte(tag),
        question: format!("{asset} up or down?"),
        open_time: Utc::now(),
        end_time: Utc::now() + chrono::Duration::seconds(lifetime_secs),
        yes_token_id: yes.to_string(),
        no_token_id: no.to_string(),
        tick_size: dec!(0.01),
        neg_risk: false,
    }
}

fn params() -> MmParams {
    MmParams {
        trade_size: dec!(5),
        sell_price: dec!(0.60),
        cut_loss_time: Duration::from_secs(60),
        monitor_interval: Duration::from_secs(10),
        adaptive_cut_loss: true,
        adaptive_min_combined: dec!(1.20),
        adaptive_monitor: Duration::from_secs(5),
        recovery_buy: false,
        recovery_threshold: dec!(0.60),
        recovery_size: Decimal::ZERO,
    }
}

async fn run_position(market: Market, params: MmParams, venue: &MockVenue) -> mm_bot::engine::PositionReport {
    let (shutdown, _) = broadcast::channel(4);
    PositionTask::new(
        market,
        params,
        Arc::new(venue.clone()),
        Arc::new(venue.clone()),
        shutdown.subscribe(),
    )
    .run()
    .await
}

/// Both legs fill early: P&L is (sell - entry) on each leg.
#[tokio::test(start_paused = true)]
async fn both_legs_fill_early() {
    let venue = MockVenue::new(
        dec!(100),
        HashMap::from([
            ("Y".to_string(), vec![(0, dec!(0.50)), (40, dec!(0.62))]),
            ("N".to_string(), vec![(0, dec!(0.50)), (50, dec!(0.61))]),
        ]),
    );
    let report = run_position(market(Asset::Btc, 1, "Y", "N", 300), params(), &venue).await;

    assert_eq!(report.status, PositionStatus::Done);
    assert_eq!(report.pnl, dec!(1.00));
    // 100 - 5 split + 3 + 3 from the two sells.
    assert_eq!(venue.collateral(), dec!(101));
    assert_eq!(venue.token("Y"), Decimal::ZERO);
    assert_eq!(venue.token("N"), Decimal::ZERO);
}

/// Both legs cross between two monitor ticks: the position closes on the
/// both-filled branch without ever touching a cut path.
#[tokio::test(start_paused = true)]
async fn both_legs_fill_in_one_tick() {
    let venue = MockVenue::new(
        dec!(100),
        HashMap::from([
            ("Y".to_string(), vec![(0, dec!(0.50)), (41, dec!(0.62))]),
            ("N".to_string(), vec![(0, dec!(0.50)), (45, dec!(0.61))]),
        ]),
    );
    let report = run_position(market(Asset::Btc, 10, "Y", "N", 300), params(), &venue).await;

    assert_eq!(report.status, PositionStatus::Done);
    assert_eq!(report.pnl, dec!(1.00));
    // Entry sells only; nothing was cancelled or re-quoted.
    assert_eq!(
        venue
            .events()
            .iter()
            .filter(|e| e.starts_with("limit"))
            .count(),
        2
    );
}

/// Neither leg fills: both orders cancelled, the pair merges back with no
/// venue slippage.
#[tokio::test(start_paused = true)]
async fn neither_leg_fills_merges_flat() {
    let venue = MockVenue::new(
        dec!(100),
        HashMap::from([
            ("Y".to_string(), vec![(0, dec!(0.52))]),
            ("N".to_string(), vec![(0, dec!(0.48))]),
        ]),
    );
    let report = run_position(market(Asset::Btc, 2, "Y", "N", 300), params(), &venue).await;

    assert_eq!(report.status, PositionStatus::Done);
    assert_eq!(report.pnl, Decimal::ZERO);
    assert_eq!(venue.collateral(), dec!(100));
    assert!(venue.events().iter().any(|e| e == "merge 5"));
    assert!(!venue.events().iter().any(|e| e.starts_with("market-sell")));
}

/// One leg fills; the adaptive controller holds above the floor and exits
/// at the combined minimum.
#[tokio::test(start_paused = true)]
async fn adaptive_holds_above_floor() {
    let venue = MockVenue::new(
        dec!(100),
        HashMap::from([
            ("Y".to_string(), vec![(0, dec!(0.50)), (60, dec!(0.62))]),
            (
                "N".to_string(),
                vec![(0, dec!(0.50)), (60, dec!(0.55)), (120, dec!(0.58)), (150, dec!(0.62))],
            ),
        ]),
    );
    let report = run_position(market(Asset::Btc, 3, "Y", "N", 300), params(), &venue).await;

    assert_eq!(report.status, PositionStatus::Done);
    // Combined 1.20: (0.60 - 0.50) * 5 * 2.
    assert_eq!(report.pnl, dec!(1.00));
    // The adaptive limit never rested below the 0.60 floor.
    for event in venue.events() {
        if let Some(rest) = event.strip_prefix("limit NO ") {
            let price: Decimal = rest.parse().unwrap();
            assert!(price >= dec!(0.60), "adaptive quoted {price} below floor");
        }
    }
}

/// One leg fills, the other side collapses below the floor: no limit is
/// ever posted and the deadline market-sells the remainder.
#[tokio::test(start_paused = true)]
async fn adaptive_floor_collapse_market_sells_at_deadline() {
    let venue = MockVenue::new(
        dec!(100),
        HashMap::from([
            ("Y".to_string(), vec![(0, dec!(0.50)), (60, dec!(0.62))]),
            ("N".to_string(), vec![(0, dec!(0.50)), (60, dec!(0.35)), (200, dec!(0.34))]),
        ]),
    );
    let report = run_position(market(Asset::Btc, 4, "Y", "N", 300), params(), &venue).await;

    assert_eq!(report.status, PositionStatus::Done);
    // +0.50 on the filled leg, (0.34 - 0.50) * 5 = -0.80 on the cut.
    assert_eq!(report.pnl, dec!(-0.30));
    // Below the floor the controller never quoted the unfilled leg.
    assert_eq!(
        venue
            .events()
            .iter()
            .filter(|e| e.starts_with("limit NO"))
            .count(),
        1, // the initial entry sell only
    );
    assert!(venue.events().iter().any(|e| e.starts_with("market-sell NO")));
}

/// Trade size below the venue minimum: the split rejects and the position
/// never leaves `entering`.
#[tokio::test(start_paused = true)]
async fn split_rejected_below_minimum() {
    let venue = MockVenue::new(
        dec!(100),
        HashMap::from([
            ("Y".to_string(), vec![(0, dec!(0.50))]),
            ("N".to_string(), vec![(0, dec!(0.50))]),
        ]),
    );
    let mut p = params();
    p.trade_size = dec!(2.0);
    let report = run_position(market(Asset::Btc, 5, "Y", "N", 300), p, &venue).await;

    assert_eq!(report.status, PositionStatus::Entering);
    assert_eq!(report.pnl, Decimal::ZERO);
    assert_eq!(venue.collateral(), dec!(100));
    assert!(venue.events().iter().all(|e| !e.starts_with("limit")));
}

/// One leg fills with the adaptive controller disabled: the unfilled leg
/// is market-sold inside the cut window.
#[tokio::test(start_paused = true)]
async fn immediate_cut_without_adaptive() {
    let venue = MockVenue::new(
        dec!(100),
        HashMap::from([
            ("Y".to_string(), vec![(0, dec!(0.50)), (60, dec!(0.62))]),
            ("N".to_string(), vec![(0, dec!(0.50)), (230, dec!(0.40))]),
        ]),
    );
    let mut p = params();
    p.adaptive_cut_loss = false;
    let report = run_position(market(Asset::Btc, 6, "Y", "N", 300), p, &venue).await;

    assert_eq!(report.status, PositionStatus::Done);
    // +0.50 on YES, (0.40 - 0.50) * 5 = -0.50 on the market-sold NO.
    assert_eq!(report.pnl, dec!(0.00));
    assert!(venue.events().iter().any(|e| e.starts_with("market-sell NO")));
}

/// Dispatcher: a busy asset queues (last writer wins) and the queued entry
/// is discarded when its remaining lifetime is inside the cut-loss horizon.
#[tokio::test(start_paused = true)]
async fn dispatcher_queues_and_discards_stale_pending() {
    let venue = MockVenue::new(
        dec!(100),
        HashMap::from([
            ("Y".to_string(), vec![(0, dec!(0.52))]),
            ("N".to_string(), vec![(0, dec!(0.48))]),
            ("Y2".to_string(), vec![(0, dec!(0.52))]),
            ("N2".to_string(), vec![(0, dec!(0.48))]),
            ("Y3".to_string(), vec![(0, dec!(0.52))]),
            ("N3".to_string(), vec![(0, dec!(0.48))]),
        ]),
    );
    let stats = SessionStats::new(None);
    let (shutdown, _) = broadcast::channel(4);
    let engine = Engine::new(
        params(),
        Arc::new(venue.clone()),
        Arc::new(venue.clone()),
        stats.clone(),
        shutdown.clone(),
    );

    let (tx, rx) = mpsc::channel(8);
    // First market runs its course (cut at 60s remaining => ~40s in).
    tx.send(market(Asset::Btc, 7, "Y", "N", 100)).await.unwrap();
    // Two more arrive while busy; the second replaces the first, and its
    // lifetime is already inside the 60s cut-loss horizon at dequeue time.
    tx.send(market(Asset::Btc, 8, "Y2", "N2", 200)).await.unwrap();
    tx.send(market(Asset::Btc, 9, "Y3", "N3", 50)).await.unwrap();

    let handle = tokio::spawn(async move { engine.run(rx).await });
    tokio::time::sleep(Duration::from_secs(300)).await;
    drop(tx);
    handle.await.unwrap();

    let splits: Vec<String> = venue
        .events()
        .into_iter()
        .filter(|e| e.starts_with("split"))
        .collect();
    // Only the first market ever entered: the replaced entry never ran and
    // the stale replacement was discarded at dequeue.
    assert_eq!(splits.len(), 1);
    assert!(splits[0].contains(&B256::repeat_byte(7).to_string()));

    let snap = stats.snapshot();
    assert_eq!(snap.positions_closed, 1);
    assert_eq!(snap.session_pnl, Decimal::ZERO);
}
