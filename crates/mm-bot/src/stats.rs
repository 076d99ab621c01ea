//! Session accounting and the persisted dry-run stats blob.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::{PositionReport, PositionStatus};

/// Cumulative session counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub session_pnl: Decimal,
    pub positions_closed: u64,
    pub wins: u64,
    pub losses: u64,
    pub expired: u64,
    pub skipped: u64,
}

/// Shared session stats. When a persist path is set (dry-run), the blob is
/// loaded at startup and rewritten atomically after every position.
pub struct SessionStats {
    inner: Mutex<StatsSnapshot>,
    persist_path: Option<PathBuf>,
}

impl SessionStats {
    pub fn new(persist_path: Option<PathBuf>) -> Arc<Self> {
        let initial = persist_path
            .as_ref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        Arc::new(Self {
            inner: Mutex::new(initial),
            persist_path,
        })
    }

    pub fn record(&self, report: &PositionReport) {
        let snapshot = {
            let mut inner = self.inner.lock();
            match report.status {
                PositionStatus::Done => {
                    inner.positions_closed += 1;
                    inner.session_pnl += report.pnl;
                    if report.pnl >= Decimal::ZERO {
                        inner.wins += 1;
                    } else {
                        inner.losses += 1;
                    }
                }
                PositionStatus::Expired => {
                    inner.positions_closed += 1;
                    inner.expired += 1;
                }
                // Never entered (insufficient balance, rejected split).
                PositionStatus::Entering => inner.skipped += 1,
                PositionStatus::Monitoring | PositionStatus::Cutting => {}
            }
            inner.clone()
        };
        self.persist(&snapshot);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().clone()
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn persist(&self, snapshot: &StatsSnapshot) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let tmp = path.with_extension("tmp");
        let result = serde_json::to_string_pretty(snapshot)
            .map_err(|e| e.to_string())
            .and_then(|raw| std::fs::write(&tmp, raw).map_err(|e| e.to_string()))
            .and_then(|_| std::fs::rename(&tmp, path).map_err(|e| e.to_string()));
        match result {
            Ok(()) => debug!(path = %path.display(), "stats persisted"),
            Err(e) => warn!(path = %path.display(), error = %e, "stats persist failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;
    use mm_common::Asset;
    use rust_decimal_macros::dec;

    fn report(status: PositionStatus, pnl: Decimal) -> PositionReport {
        PositionReport {
            asset: Asset::Btc,
            condition_id: B256::ZERO,
            status,
            pnl,
        }
    }

    #[test]
    fn test_record_done_positions() {
        let stats = SessionStats::new(None);
        stats.record(&report(PositionStatus::Done, dec!(1.00)));
        stats.record(&report(PositionStatus::Done, dec!(-0.30)));
        let snap = stats.snapshot();
        assert_eq!(snap.positions_closed, 2);
        assert_eq!(snap.session_pnl, dec!(0.70));
        assert_eq!(snap.wins, 1);
        assert_eq!(snap.losses, 1);
    }

    #[test]
    fn test_record_expired_and_skipped() {
        let stats = SessionStats::new(None);
        stats.record(&report(PositionStatus::Expired, Decimal::ZERO));
        stats.record(&report(PositionStatus::Entering, Decimal::ZERO));
        let snap = stats.snapshot();
        assert_eq!(snap.expired, 1);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.session_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = std::env::temp_dir().join("mm-bot-stats-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stats.json");
        let _ = std::fs::remove_file(&path);

        let stats = SessionStats::new(Some(path.clone()));
        stats.record(&report(PositionStatus::Done, dec!(2.5)));
        drop(stats);

        let reloaded = SessionStats::new(Some(path.clone()));
        assert_eq!(reloaded.snapshot().session_pnl, dec!(2.5));
        assert_eq!(reloaded.snapshot().positions_closed, 1);
        // No stray temp file left behind.
        assert!(!path.with_extension("tmp").exists());
        let _ = std::fs::remove_file(&path);
    }
}
