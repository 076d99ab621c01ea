//! Engine: detector-event dispatch and per-asset position tasks.
//!
//! The dispatcher is the single owner of the active-position and
//! pending-market maps, which is what enforces the mutual-exclusion rule
//! (at most one live position per asset, at most one pending market per
//! asset, last writer wins) without any locking.

pub mod adaptive;
pub mod position;
pub mod recovery;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mm_common::Asset;
use mm_market::Market;

use crate::config::MmConfig;
use crate::stats::SessionStats;
use crate::venue::{ChainClient, OrderGateway};

pub use position::{Leg, Position, PositionReport, PositionStatus, PositionTask};

/// Status log cadence.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Cooperative drain budget per task at shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(300);

/// Engine parameter snapshot handed to every position task.
#[derive(Debug, Clone)]
pub struct MmParams {
    pub trade_size: Decimal,
    pub sell_price: Decimal,
    pub cut_loss_time: Duration,
    pub monitor_interval: Duration,
    pub adaptive_cut_loss: bool,
    pub adaptive_min_combined: Decimal,
    pub adaptive_monitor: Duration,
    pub recovery_buy: bool,
    pub recovery_threshold: Decimal,
    pub recovery_size: Decimal,
}

impl MmParams {
    pub fn from_config(config: &MmConfig) -> Self {
        Self {
            trade_size: config.trade_size,
            sell_price: config.sell_price,
            cut_loss_time: Duration::from_secs(config.cut_loss_time),
            monitor_interval: Duration::from_secs(config.monitor_interval),
            adaptive_cut_loss: config.adaptive_cut_loss,
            adaptive_min_combined: config.adaptive_min_combined,
            adaptive_monitor: Duration::from_secs(config.adaptive_monitor_sec),
            recovery_buy: config.recovery_buy,
            recovery_threshold: config.recovery_threshold,
            recovery_size: config.recovery_size,
        }
    }
}

struct ActivePosition {
    condition_id: B256,
    handle: JoinHandle<()>,
}

/// Dispatcher over detector events and position tasks.
pub struct Engine {
    params: MmParams,
    gateway: Arc<dyn OrderGateway>,
    chain: Arc<dyn ChainClient>,
    stats: Arc<SessionStats>,
    shutdown: broadcast::Sender<()>,
}

impl Engine {
    pub fn new(
        params: MmParams,
        gateway: Arc<dyn OrderGateway>,
        chain: Arc<dyn ChainClient>,
        stats: Arc<SessionStats>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            params,
            gateway,
            chain,
            stats,
            shutdown,
        }
    }

    /// Consume detector events until the channel closes or shutdown fires.
    pub async fn run(&self, mut markets: mpsc::Receiver<Market>) {
        let (done_tx, mut done_rx) = mpsc::channel::<PositionReport>(16);
        let mut active: HashMap<Asset, ActivePosition> = HashMap::new();
        let mut pending: HashMap<Asset, Market> = HashMap::new();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut status = tokio::time::interval(STATUS_INTERVAL);
        status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("engine started");
        loop {
            tokio::select! {
                maybe_market = markets.recv() => match maybe_market {
                    Some(market) => self.dispatch(market, &mut active, &mut pending, &done_tx),
                    None => break,
                },
                Some(report) = done_rx.recv() => {
                    self.on_position_done(report, &mut active, &mut pending, &done_tx);
                }
                _ = status.tick() => {
                    let snapshot = self.stats.snapshot();
                    info!(
                        active = active.len(),
                        pending = pending.len(),
                        closed = snapshot.positions_closed,
                        pnl = %snapshot.session_pnl,
                        "engine status"
                    );
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("engine stopping, draining position tasks");
        for (asset, entry) in active {
            if tokio::time::timeout(SHUTDOWN_DRAIN, entry.handle).await.is_err() {
                warn!(asset = %asset, "position task did not stop in time");
            }
        }
    }

    /// Dispatch rule: idle asset starts a task, busy asset replaces its
    /// pending entry.
    fn dispatch(
        &self,
        market: Market,
        active: &mut HashMap<Asset, ActivePosition>,
        pending: &mut HashMap<Asset, Market>,
        done_tx: &mpsc::Sender<PositionReport>,
    ) {
        let asset = market.asset;
        if let Some(existing) = active.get(&asset) {
            if existing.condition_id == market.condition_id {
                debug!(asset = %asset, "duplicate market event ignored");
                return;
            }
            info!(
                asset = %asset,
                condition = %market.condition_id,
                "asset busy, queuing market (replacing any prior entry)"
            );
            pending.insert(asset, market);
            return;
        }
        self.start_position(market, active, done_tx);
    }

    fn on_position_done(
        &self,
        report: PositionReport,
        active: &mut HashMap<Asset, ActivePosition>,
        pending: &mut HashMap<Asset, Market>,
        done_tx: &mpsc::Sender<PositionReport>,
    ) {
        active.remove(&report.asset);
        info!(
            asset = %report.asset,
            status = %report.status,
            pnl = %report.pnl,
            "position terminated"
        );
        self.stats.record(&report);

        if let Some(next) = pending.remove(&report.asset) {
            let remaining = next.remaining();
            if remaining.to_std().unwrap_or_default() > self.params.cut_loss_time {
                info!(asset = %report.asset, "starting queued market");
                self.start_position(next, active, done_tx);
            } else {
                info!(
                    asset = %report.asset,
                    remaining = remaining.num_seconds(),
                    "queued market inside cut-loss horizon, discarding"
                );
            }
        }
    }

    fn start_position(
        &self,
        market: Market,
        active: &mut HashMap<Asset, ActivePosition>,
        done_tx: &mpsc::Sender<PositionReport>,
    ) {
        let asset = market.asset;
        let condition_id = market.condition_id;
        let task = PositionTask::new(
            market,
            self.params.clone(),
            self.gateway.clone(),
            self.chain.clone(),
            self.shutdown.subscribe(),
        );
        let done = done_tx.clone();
        let handle = tokio::spawn(async move {
            let report = task.run().await;
            let _ = done.send(report).await;
        });
        active.insert(
            asset,
            ActivePosition {
                condition_id,
                handle,
            },
        );
    }
}
