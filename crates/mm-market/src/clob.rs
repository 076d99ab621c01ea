//! CLOB order gateway.
//!
//! Limit and market order placement, cancellation, order status and
//! midpoint quotes against the venue's REST API. Midpoint is public;
//! everything else carries L2 auth headers.

use std::time::Duration;

use alloy::primitives::Address;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use mm_common::Side;

use crate::auth::{l2_headers, ApiCreds};
use crate::order::OrderSigner;

/// Default CLOB API base URL.
const DEFAULT_CLOB_URL: &str = "https://clob.polymarket.com";

/// Request timeout for CLOB calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An order counts as filled at `MATCHED`, or at this fraction of its size
/// matched.
pub const FILL_TOLERANCE: Decimal = dec!(0.99);

/// Protective bounds for market-order worst prices.
const MAX_BUY_WORST_PRICE: Decimal = dec!(0.99);
const MIN_SELL_WORST_PRICE: Decimal = dec!(0.01);

/// Errors from the order gateway.
#[derive(Debug, Error)]
pub enum ClobError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: status {status}, body: {body}")]
    Api { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("operation requires API credentials")]
    MissingCredentials,
}

/// Time-in-force for order placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tif {
    /// Good till cancelled.
    Gtc,
    /// Fill or kill: full fill or nothing.
    Fok,
    /// Fill and kill: take available liquidity, cancel the rest.
    Fak,
}

impl Tif {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tif::Gtc => "GTC",
            Tif::Fok => "FOK",
            Tif::Fak => "FAK",
        }
    }
}

/// Accepted resting order.
#[derive(Debug, Clone)]
pub struct PostedOrder {
    pub order_id: String,
    pub status: String,
}

/// Outcome of a market order. A fill price of `None` means no liquidity
/// was taken (FAK no-op).
#[derive(Debug, Clone)]
pub struct MarketFill {
    pub fill_price: Option<Decimal>,
    /// Amount received (collateral for SELL, shares for BUY).
    pub taking: Decimal,
    /// Amount given (shares for SELL, collateral for BUY).
    pub making: Decimal,
}

/// Order record from the status endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size_matched: Option<String>,
    #[serde(default)]
    pub original_size: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
}

impl OrderInfo {
    pub fn size_matched_dec(&self) -> Decimal {
        parse_dec(self.size_matched.as_deref())
    }

    pub fn price_dec(&self) -> Option<Decimal> {
        self.price.as_deref().and_then(|s| s.parse().ok())
    }

    /// `MATCHED`, or matched size within tolerance of the expected size.
    pub fn is_filled(&self, expected_size: Decimal) -> bool {
        if self.status.eq_ignore_ascii_case("matched") {
            return true;
        }
        expected_size > Decimal::ZERO
            && self.size_matched_dec() >= FILL_TOLERANCE * expected_size
    }
}

#[derive(Debug, Deserialize)]
struct PostOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "takingAmount", default)]
    taking_amount: Option<String>,
    #[serde(rename = "makingAmount", default)]
    making_amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MidpointResponse {
    mid: String,
}

struct AuthContext {
    creds: ApiCreds,
    address: Address,
    signer: OrderSigner,
}

/// CLOB REST client.
pub struct ClobClient {
    http: Client,
    base_url: String,
    auth: Option<AuthContext>,
}

impl ClobClient {
    /// Fully authenticated client.
    pub fn new(base_url: Option<String>, creds: ApiCreds, signer: OrderSigner) -> Self {
        let address = signer.address();
        Self {
            http: http_client(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_CLOB_URL.to_string()),
            auth: Some(AuthContext {
                creds,
                address,
                signer,
            }),
        }
    }

    /// Public client: midpoint only. Used by the dry-run gateway.
    pub fn public(base_url: Option<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_CLOB_URL.to_string()),
            auth: None,
        }
    }

    fn auth(&self) -> Result<&AuthContext, ClobError> {
        self.auth.as_ref().ok_or(ClobError::MissingCredentials)
    }

    /// Place a resting limit order.
    pub async fn post_limit(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        neg_risk: bool,
    ) -> Result<PostedOrder, ClobError> {
        let auth = self.auth()?;
        let payload = auth.signer.build(token_id, side, price, size, neg_risk)?;
        let resp = self.post_order(&payload, Tif::Gtc).await?;

        if !resp.success {
            return Err(ClobError::Rejected(
                resp.error_msg.unwrap_or_else(|| "unknown rejection".into()),
            ));
        }
        let order_id = resp
            .order_id
            .ok_or_else(|| ClobError::Rejected("accepted order without id".into()))?;
        debug!(%order_id, %side, %price, %size, "limit order posted");
        Ok(PostedOrder {
            order_id,
            status: resp.status.unwrap_or_default(),
        })
    }

    /// Place a market order.
    ///
    /// `amount` is collateral for BUY and shares for SELL. `worst_price`
    /// bounds slippage and is clamped to the protective range.
    pub async fn post_market(
        &self,
        token_id: &str,
        side: Side,
        amount: Decimal,
        worst_price: Decimal,
        neg_risk: bool,
        tif: Tif,
    ) -> Result<MarketFill, ClobError> {
        let auth = self.auth()?;
        let worst_price = match side {
            Side::Buy => worst_price.min(MAX_BUY_WORST_PRICE),
            Side::Sell => worst_price.max(MIN_SELL_WORST_PRICE),
        };
        let size = match side {
            Side::Buy => amount / worst_price,
            Side::Sell => amount,
        };
        let payload = auth
            .signer
            .build(token_id, side, worst_price, size, neg_risk)?;
        let resp = self.post_order(&payload, tif).await?;

        if !resp.success {
            let msg = resp.error_msg.unwrap_or_else(|| "unknown rejection".into());
            if msg.to_lowercase().contains("liquidity") {
                // FAK against an empty book takes nothing; not an error.
                return Ok(MarketFill {
                    fill_price: None,
                    taking: Decimal::ZERO,
                    making: Decimal::ZERO,
                });
            }
            return Err(ClobError::Rejected(msg));
        }

        let taking = parse_dec(resp.taking_amount.as_deref());
        let making = parse_dec(resp.making_amount.as_deref());
        let fill_price = match side {
            // SELL: gave shares (making), received collateral (taking).
            Side::Sell if making > Decimal::ZERO => Some(taking / making),
            // BUY: gave collateral (making), received shares (taking).
            Side::Buy if taking > Decimal::ZERO => Some(making / taking),
            _ => None,
        };
        Ok(MarketFill {
            fill_price,
            taking,
            making,
        })
    }

    async fn post_order(
        &self,
        payload: &crate::order::OrderPayload,
        tif: Tif,
    ) -> Result<PostOrderResponse, ClobError> {
        let auth = self.auth()?;
        let body = json!({
            "order": payload,
            "owner": auth.creds.key,
            "orderType": tif.as_str(),
        })
        .to_string();

        let path = "/order";
        let headers = l2_headers(&auth.creds, auth.address, "POST", path, Some(&body))?;
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            // Rejections arrive as JSON bodies on 4xx as well.
            if let Ok(parsed) = serde_json::from_str::<PostOrderResponse>(&text) {
                return Ok(parsed);
            }
            return Err(ClobError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| ClobError::Rejected(format!("bad response: {e}")))
    }

    /// Cancel an order. Idempotent: unknown or already-settled orders are
    /// not an error.
    pub async fn cancel(&self, order_id: &str) -> Result<(), ClobError> {
        let auth = self.auth()?;
        let body = json!({ "orderID": order_id }).to_string();
        let path = "/order";
        let headers = l2_headers(&auth.creds, auth.address, "DELETE", path, Some(&body))?;
        let resp = self
            .http
            .delete(format!("{}{}", self.base_url, path))
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        if text.to_lowercase().contains("not found") {
            debug!(order_id, "cancel of unknown order");
            return Ok(());
        }
        warn!(order_id, status = status.as_u16(), "cancel failed");
        Err(ClobError::Api {
            status: status.as_u16(),
            body: text,
        })
    }

    /// Cancel every open order of this account.
    pub async fn cancel_all(&self) -> Result<(), ClobError> {
        let auth = self.auth()?;
        let path = "/cancel-all";
        let headers = l2_headers(&auth.creds, auth.address, "DELETE", path, None)?;
        let resp = self
            .http
            .delete(format!("{}{}", self.base_url, path))
            .headers(headers)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClobError::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Open orders, optionally filtered to one token.
    pub async fn open_orders(&self, asset_id: Option<&str>) -> Result<Vec<OrderInfo>, ClobError> {
        let auth = self.auth()?;
        let path = match asset_id {
            Some(id) => format!("/data/orders?asset_id={id}"),
            None => "/data/orders".to_string(),
        };
        let headers = l2_headers(&auth.creds, auth.address, "GET", &path, None)?;
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .headers(headers)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClobError::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Status of one order.
    pub async fn order_status(&self, order_id: &str) -> Result<OrderInfo, ClobError> {
        let auth = self.auth()?;
        let path = format!("/data/order/{order_id}");
        let headers = l2_headers(&auth.creds, auth.address, "GET", &path, None)?;
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .headers(headers)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClobError::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Midpoint quote for a token. Public endpoint.
    pub async fn midpoint(&self, token_id: &str) -> Result<Decimal, ClobError> {
        let resp = self
            .http
            .get(format!("{}/midpoint", self.base_url))
            .query(&[("token_id", token_id)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClobError::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let mid: MidpointResponse = resp.json().await?;
        mid.mid
            .parse()
            .map_err(|_| ClobError::Rejected(format!("bad midpoint: {}", mid.mid)))
    }
}

fn http_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("Failed to create HTTP client")
}

fn parse_dec(s: Option<&str>) -> Decimal {
    s.and_then(|s| s.parse().ok()).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: &str, matched: &str) -> OrderInfo {
        OrderInfo {
            id: "o1".into(),
            status: status.into(),
            size_matched: Some(matched.into()),
            original_size: Some("5".into()),
            price: Some("0.60".into()),
            asset_id: None,
        }
    }

    #[test]
    fn test_filled_on_matched_status() {
        assert!(order("MATCHED", "0").is_filled(dec!(5)));
        assert!(order("matched", "0").is_filled(dec!(5)));
    }

    #[test]
    fn test_filled_on_size_tolerance() {
        assert!(order("LIVE", "4.95").is_filled(dec!(5)));
        assert!(!order("LIVE", "4.94").is_filled(dec!(5)));
        assert!(!order("LIVE", "0").is_filled(dec!(5)));
    }

    #[test]
    fn test_zero_expected_is_never_filled_by_tolerance() {
        assert!(!order("LIVE", "0").is_filled(Decimal::ZERO));
    }

    #[test]
    fn test_tif_wire_names() {
        assert_eq!(Tif::Gtc.as_str(), "GTC");
        assert_eq!(Tif::Fok.as_str(), "FOK");
        assert_eq!(Tif::Fak.as_str(), "FAK");
    }

    #[test]
    fn test_order_info_parsing() {
        let info: OrderInfo = serde_json::from_str(
            r#"{"id":"0xabc","status":"LIVE","size_matched":"1.5","original_size":"5","price":"0.60"}"#,
        )
        .unwrap();
        assert_eq!(info.size_matched_dec(), dec!(1.5));
        assert_eq!(info.price_dec(), Some(dec!(0.60)));
    }
}
