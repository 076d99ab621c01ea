//! Deterministic slot-aligned market detection.
//!
//! No feed subscription: each configured asset participates in a sequence
//! of fixed-duration slots aligned to the Unix epoch, so the upcoming
//! market's metadata slug is known in advance. The detector polls the
//! metadata service for the *next* slot of every asset and emits a
//! `Market` event the moment the metadata shows up, which puts entry
//! at-or-before the market open.
//!
//! Slots whose metadata only appears after the freshness window are
//! dropped; entering a market mid-life defeats the symmetric entry price.

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use mm_common::{Asset, SlotDuration};

use crate::gamma::GammaClient;
use crate::types::Market;

/// How long after open a discovered market is still worth entering.
const FRESHNESS_WINDOW: chrono::Duration = chrono::Duration::seconds(15);

/// Minimum lifetime remaining for current-slot emission.
const CURRENT_SLOT_MIN_REMAINING: chrono::Duration = chrono::Duration::seconds(30);

/// Detector configuration.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Assets to watch; one pending market slot each.
    pub assets: Vec<Asset>,
    /// Slot period.
    pub duration: SlotDuration,
    /// Poll cadence against the metadata service.
    pub poll_interval: Duration,
    /// Also emit the currently-active slot when enough lifetime remains.
    /// Off for the maker engine; entry must happen at-or-before open.
    pub include_current_slot: bool,
}

/// Slot-aligned market detector.
pub struct MarketDetector {
    gamma: GammaClient,
    config: DetectorConfig,
    /// Slots already handled (emitted or discarded), by (asset, slot start).
    seen: HashSet<(Asset, u64)>,
}

impl MarketDetector {
    pub fn new(gamma: GammaClient, config: DetectorConfig) -> Self {
        Self {
            gamma,
            config,
            seen: HashSet::new(),
        }
    }

    /// Run until shutdown or until the consumer goes away. Errors are
    /// logged and the loop continues.
    pub async fn run(mut self, events: mpsc::Sender<Market>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            assets = ?self.config.assets,
            duration = %self.config.duration,
            "market detector started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.poll_once(&events).await.is_err() {
                        // Consumer dropped; nothing left to do.
                        break;
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("market detector stopped");
    }

    /// One poll pass over all assets. `Err` only when the event channel is
    /// closed.
    async fn poll_once(&mut self, events: &mpsc::Sender<Market>) -> Result<(), ()> {
        let unix_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        for asset in self.config.assets.clone() {
            let mut slots = vec![self.config.duration.next_slot(unix_now)];
            if self.config.include_current_slot {
                slots.push(self.config.duration.current_slot(unix_now));
            }
            for slot_start in slots {
                self.check_slot(asset, slot_start, events).await?;
            }
        }
        Ok(())
    }

    async fn check_slot(
        &mut self,
        asset: Asset,
        slot_start: u64,
        events: &mpsc::Sender<Market>,
    ) -> Result<(), ()> {
        if self.seen.contains(&(asset, slot_start)) {
            return Ok(());
        }

        let slug = Market::slug(asset, self.config.duration, slot_start);
        let meta = match self.gamma.market_by_slug(&slug).await {
            Ok(Some(meta)) => meta,
            // Not published yet; retry on the next tick.
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(%slug, error = %e, "metadata fetch failed");
                return Ok(());
            }
        };

        let Some(market) = meta.into_market(asset, self.config.duration, slot_start) else {
            // Unusable metadata (missing token ids); never retry this slot.
            self.seen.insert((asset, slot_start));
            debug!(%slug, "discarding market with missing token ids");
            return Ok(());
        };

        let now = Utc::now();
        if now - market.open_time > FRESHNESS_WINDOW {
            self.seen.insert((asset, slot_start));
            debug!(%slug, open = %market.open_time, "discarding stale slot");
            return Ok(());
        }
        if self.config.include_current_slot
            && slot_start == self.config.duration.current_slot(now.timestamp() as u64)
            && market.remaining() < CURRENT_SLOT_MIN_REMAINING
        {
            self.seen.insert((asset, slot_start));
            debug!(%slug, "current slot too close to settlement");
            return Ok(());
        }

        self.seen.insert((asset, slot_start));
        info!(
            asset = %asset,
            %slug,
            condition = %market.condition_id,
            ends = %market.end_time,
            "market detected"
        );
        events.send(market).await.map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_window_bound() {
        // The guard is `now - open > 15s`; exactly 15s is still fresh.
        let open = Utc::now() - chrono::Duration::seconds(15);
        assert!(Utc::now() - open <= FRESHNESS_WINDOW + chrono::Duration::milliseconds(100));
    }

    #[test]
    fn test_detector_config_targets_next_slot() {
        let d = SlotDuration::FiveMin;
        let now = 1_754_049_700u64; // mid-slot
        assert_eq!(d.next_slot(now), 1_754_049_900);
        assert_ne!(d.next_slot(now), d.current_slot(now));
    }
}
