//! Market metadata client for the Gamma API.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::types::GammaMarket;

/// Default Gamma API base URL.
const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";

/// Request timeout for metadata calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from metadata lookups.
#[derive(Debug, Error)]
pub enum GammaError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: status {status}, body: {body}")]
    Api { status: u16, body: String },

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Metadata HTTP client.
#[derive(Clone)]
pub struct GammaClient {
    http: Client,
    base_url: String,
}

impl GammaClient {
    pub fn new(base_url: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_GAMMA_URL.to_string()),
        }
    }

    /// Fetch a market by its deterministic slug. `None` when the slot's
    /// metadata is not published yet.
    pub async fn market_by_slug(&self, slug: &str) -> Result<Option<GammaMarket>, GammaError> {
        let url = format!("{}/markets/slug/{}", self.base_url, slug);
        let resp = self.http.get(&url).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(slug, "market slug not found");
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(GammaError::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let market = resp.json::<GammaMarket>().await?;
        Ok(Some(market))
    }

    /// Fetch a market by condition id.
    pub async fn market_by_condition(
        &self,
        condition_id: &str,
    ) -> Result<Option<GammaMarket>, GammaError> {
        self.market_by_query("condition_id", condition_id).await
    }

    /// Fetch a market by one of its CLOB token ids.
    pub async fn market_by_token_id(
        &self,
        token_id: &str,
    ) -> Result<Option<GammaMarket>, GammaError> {
        self.market_by_query("clob_token_ids", token_id).await
    }

    async fn market_by_query(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<GammaMarket>, GammaError> {
        let url = format!("{}/markets", self.base_url);
        let resp = self.http.get(&url).query(&[(key, value)]).send().await?;

        if !resp.status().is_success() {
            return Err(GammaError::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let mut markets = resp.json::<Vec<GammaMarket>>().await?;
        if markets.is_empty() {
            return Ok(None);
        }
        Ok(Some(markets.swap_remove(0)))
    }
}
