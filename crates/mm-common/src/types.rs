//! Asset, slot, side and outcome types shared across the workspace.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Venue minimum shares per outcome side for a split entry.
pub const MIN_SHARES_PER_SIDE: Decimal = dec!(2.5);

/// Crypto assets with scheduled up/down markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Btc,
    Eth,
    Sol,
    Xrp,
}

impl Asset {
    /// Fragment used in the deterministic market slug
    /// (`{asset}-updown-{duration}-{slot_start}`).
    pub fn slug_fragment(&self) -> &'static str {
        match self {
            Asset::Btc => "btc",
            Asset::Eth => "eth",
            Asset::Sol => "solana",
            Asset::Xrp => "xrp",
        }
    }

    /// Returns the display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
            Asset::Sol => "SOL",
            Asset::Xrp => "XRP",
        }
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Asset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BTC" => Ok(Asset::Btc),
            "ETH" => Ok(Asset::Eth),
            "SOL" | "SOLANA" => Ok(Asset::Sol),
            "XRP" => Ok(Asset::Xrp),
            _ => Err(format!("Unknown asset: {}", s)),
        }
    }
}

/// Duration of a scheduled market slot, aligned to the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SlotDuration {
    /// 5-minute markets.
    #[serde(rename = "5m")]
    #[default]
    FiveMin,
    /// 15-minute markets.
    #[serde(rename = "15m")]
    FifteenMin,
}

impl SlotDuration {
    /// Slot period in seconds.
    pub fn secs(&self) -> u64 {
        match self {
            SlotDuration::FiveMin => 300,
            SlotDuration::FifteenMin => 900,
        }
    }

    /// Fragment used in the deterministic market slug.
    pub fn slug_fragment(&self) -> &'static str {
        match self {
            SlotDuration::FiveMin => "5m",
            SlotDuration::FifteenMin => "15m",
        }
    }

    /// Start timestamp of the slot containing `unix_now`.
    pub fn current_slot(&self, unix_now: u64) -> u64 {
        unix_now / self.secs() * self.secs()
    }

    /// Start timestamp of the slot after the one containing `unix_now`.
    pub fn next_slot(&self, unix_now: u64) -> u64 {
        self.current_slot(unix_now) + self.secs()
    }
}

impl std::fmt::Display for SlotDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug_fragment())
    }
}

impl std::str::FromStr for SlotDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "5m" | "5min" | "300" => Ok(SlotDuration::FiveMin),
            "15m" | "15min" | "900" => Ok(SlotDuration::FifteenMin),
            _ => Err(format!("Unknown slot duration: {}", s)),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Outcome leg of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }

    /// CTF outcome index set for this leg of a binary condition.
    pub fn index_set(&self) -> u8 {
        match self {
            Outcome::Yes => 1,
            Outcome::No => 2,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_round_trip() {
        for asset in [Asset::Btc, Asset::Eth, Asset::Sol, Asset::Xrp] {
            let parsed: Asset = asset.as_str().parse().unwrap();
            assert_eq!(parsed, asset);
        }
        assert!("DOGE".parse::<Asset>().is_err());
    }

    #[test]
    fn test_slug_fragments() {
        assert_eq!(Asset::Btc.slug_fragment(), "btc");
        assert_eq!(Asset::Sol.slug_fragment(), "solana");
        assert_eq!(SlotDuration::FiveMin.slug_fragment(), "5m");
    }

    #[test]
    fn test_slot_arithmetic() {
        let d = SlotDuration::FiveMin;
        assert_eq!(d.current_slot(1_700_000_123), 1_700_000_100);
        assert_eq!(d.next_slot(1_700_000_123), 1_700_000_400);
        // Exactly on a boundary the "next" slot is still one period ahead.
        assert_eq!(d.next_slot(1_700_000_100), 1_700_000_400);

        let d = SlotDuration::FifteenMin;
        assert_eq!(d.secs(), 900);
        assert_eq!(d.current_slot(1_700_000_123) % 900, 0);
    }

    #[test]
    fn test_duration_parse() {
        assert_eq!("5m".parse::<SlotDuration>().unwrap(), SlotDuration::FiveMin);
        assert_eq!(
            "15min".parse::<SlotDuration>().unwrap(),
            SlotDuration::FifteenMin
        );
        assert!("1h".parse::<SlotDuration>().is_err());
    }

    #[test]
    fn test_outcome_index_sets() {
        assert_eq!(Outcome::Yes.index_set(), 1);
        assert_eq!(Outcome::No.index_set(), 2);
        assert_eq!(Outcome::Yes.opposite(), Outcome::No);
    }
}
