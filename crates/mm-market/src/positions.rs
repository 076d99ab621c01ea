//! Data-API positions listing.
//!
//! The venue's positions endpoint reports every outcome-token holding of a
//! wallet. Cleanup and the redeemer group these by condition id.

use std::collections::BTreeMap;
use std::time::Duration;

use alloy::primitives::Address;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

/// Default data-API base URL.
const DEFAULT_DATA_API_URL: &str = "https://data-api.polymarket.com";

/// Request timeout for positions calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the positions API.
#[derive(Debug, Error)]
pub enum DataApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: status {status}, body: {body}")]
    Api { status: u16, body: String },
}

/// One outcome-token holding.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionRecord {
    #[serde(rename = "conditionId", alias = "condition_id")]
    pub condition_id: String,
    /// Outcome-token id.
    #[serde(rename = "asset")]
    pub token_id: String,
    #[serde(default)]
    pub size: Decimal,
}

/// Positions HTTP client.
#[derive(Clone)]
pub struct DataApiClient {
    http: Client,
    base_url: String,
}

impl DataApiClient {
    pub fn new(base_url: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_DATA_API_URL.to_string()),
        }
    }

    /// All current holdings of a wallet.
    pub async fn positions(&self, wallet: Address) -> Result<Vec<PositionRecord>, DataApiError> {
        let resp = self
            .http
            .get(format!("{}/positions", self.base_url))
            .query(&[("user", format!("{wallet:#x}"))])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(DataApiError::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }
}

/// Group holdings by condition id, preserving a stable order.
pub fn group_by_condition(
    records: Vec<PositionRecord>,
) -> BTreeMap<String, Vec<PositionRecord>> {
    let mut grouped: BTreeMap<String, Vec<PositionRecord>> = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.condition_id.clone())
            .or_default()
            .push(record);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_group_by_condition() {
        let records: Vec<PositionRecord> = serde_json::from_str(
            r#"[
                {"conditionId": "0xaa", "asset": "1", "size": 5},
                {"conditionId": "0xbb", "asset": "3", "size": 2.5},
                {"conditionId": "0xaa", "asset": "2", "size": 5}
            ]"#,
        )
        .unwrap();
        let grouped = group_by_condition(records);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["0xaa"].len(), 2);
        assert_eq!(grouped["0xbb"][0].size, dec!(2.5));
    }
}
