//! Market model and venue wire types.

use alloy::primitives::B256;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use mm_common::{Asset, Outcome, SlotDuration};

/// A scheduled up/down market, immutable once emitted by the detector.
#[derive(Debug, Clone)]
pub struct Market {
    pub asset: Asset,
    /// Unix timestamp of the slot start; part of the dedup key.
    pub slot_start: u64,
    /// Authoritative market identity.
    pub condition_id: B256,
    pub question: String,
    pub open_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub tick_size: Decimal,
    pub neg_risk: bool,
}

impl Market {
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Yes => &self.yes_token_id,
            Outcome::No => &self.no_token_id,
        }
    }

    /// Lifetime remaining until settlement. Negative once expired.
    pub fn remaining(&self) -> chrono::Duration {
        self.end_time - Utc::now()
    }

    /// Deterministic metadata slug for a slot.
    pub fn slug(asset: Asset, duration: SlotDuration, slot_start: u64) -> String {
        format!(
            "{}-updown-{}-{}",
            asset.slug_fragment(),
            duration.slug_fragment(),
            slot_start
        )
    }
}

/// `clob_token_ids` arrives either as a JSON array or as a JSON-encoded
/// string containing one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TokenIds {
    List(Vec<String>),
    Encoded(String),
}

impl TokenIds {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            TokenIds::List(v) => v,
            TokenIds::Encoded(s) => serde_json::from_str(&s).unwrap_or_default(),
        }
    }
}

/// Market metadata as served by the Gamma API.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    #[serde(rename = "conditionId", alias = "condition_id", default)]
    pub condition_id: Option<String>,

    #[serde(default)]
    pub question: Option<String>,

    #[serde(default)]
    pub slug: Option<String>,

    #[serde(rename = "endDateIso", alias = "end_date_iso", default)]
    pub end_date_iso: Option<String>,

    #[serde(rename = "eventStartTime", alias = "event_start_time", default)]
    pub event_start_time: Option<String>,

    #[serde(rename = "clobTokenIds", alias = "clob_token_ids", default)]
    pub clob_token_ids: Option<TokenIds>,

    #[serde(rename = "negRisk", alias = "neg_risk", default)]
    pub neg_risk: Option<bool>,

    #[serde(
        rename = "orderPriceMinTickSize",
        alias = "minimum_tick_size",
        default
    )]
    pub minimum_tick_size: Option<Decimal>,

    #[serde(default)]
    pub active: Option<bool>,

    #[serde(default)]
    pub closed: Option<bool>,
}

impl GammaMarket {
    /// Both outcome token ids, YES first, when present and well formed.
    pub fn token_pair(&self) -> Option<(String, String)> {
        let ids = self.clob_token_ids.clone()?.into_vec();
        if ids.len() != 2 || ids[0].is_empty() || ids[1].is_empty() {
            return None;
        }
        Some((ids[0].clone(), ids[1].clone()))
    }

    /// Materialize a `Market` for a known slot. Returns `None` when the
    /// metadata is unusable (missing condition or token ids).
    pub fn into_market(
        self,
        asset: Asset,
        duration: SlotDuration,
        slot_start: u64,
    ) -> Option<Market> {
        let condition_id = self.condition_id.as_deref()?.parse::<B256>().ok()?;
        let (yes_token_id, no_token_id) = self.token_pair()?;

        let slot_open = Utc
            .timestamp_opt(slot_start as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let open_time = self
            .event_start_time
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(slot_open);
        let end_time = self
            .end_date_iso
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(slot_open + chrono::Duration::seconds(duration.secs() as i64));

        Some(Market {
            asset,
            slot_start,
            condition_id,
            question: self.question.unwrap_or_default(),
            open_time,
            end_time,
            yes_token_id,
            no_token_id,
            tick_size: self.minimum_tick_size.unwrap_or(dec!(0.01)),
            neg_risk: self.neg_risk.unwrap_or(false),
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONDITION: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn sample_json(token_ids: &str) -> String {
        format!(
            r#"{{
                "conditionId": "{CONDITION}",
                "question": "Bitcoin Up or Down?",
                "endDateIso": "2026-08-01T12:05:00Z",
                "eventStartTime": "2026-08-01T12:00:00Z",
                "clobTokenIds": {token_ids},
                "negRisk": false,
                "orderPriceMinTickSize": 0.01
            }}"#
        )
    }

    #[test]
    fn test_token_ids_as_array() {
        let gm: GammaMarket = serde_json::from_str(&sample_json(r#"["111", "222"]"#)).unwrap();
        assert_eq!(
            gm.token_pair(),
            Some(("111".to_string(), "222".to_string()))
        );
    }

    #[test]
    fn test_token_ids_as_json_string() {
        let gm: GammaMarket =
            serde_json::from_str(&sample_json(r#""[\"111\", \"222\"]""#)).unwrap();
        assert_eq!(
            gm.token_pair(),
            Some(("111".to_string(), "222".to_string()))
        );
    }

    #[test]
    fn test_into_market() {
        let gm: GammaMarket = serde_json::from_str(&sample_json(r#"["111", "222"]"#)).unwrap();
        let market = gm
            .into_market(Asset::Btc, SlotDuration::FiveMin, 1_754_049_600)
            .unwrap();
        assert_eq!(market.asset, Asset::Btc);
        assert_eq!(market.yes_token_id, "111");
        assert_eq!(market.token_id(Outcome::No), "222");
        assert_eq!(market.tick_size, dec!(0.01));
        assert_eq!((market.end_time - market.open_time).num_seconds(), 300);
    }

    #[test]
    fn test_into_market_missing_tokens() {
        let gm: GammaMarket = serde_json::from_str(&sample_json("null")).unwrap();
        assert!(gm
            .into_market(Asset::Btc, SlotDuration::FiveMin, 1_754_049_600)
            .is_none());
    }

    #[test]
    fn test_slug_format() {
        assert_eq!(
            Market::slug(Asset::Btc, SlotDuration::FiveMin, 1_754_049_600),
            "btc-updown-5m-1754049600"
        );
        assert_eq!(
            Market::slug(Asset::Sol, SlotDuration::FifteenMin, 1_754_049_600),
            "solana-updown-15m-1754049600"
        );
    }
}
