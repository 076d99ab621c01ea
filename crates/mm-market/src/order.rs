//! EIP-712 order construction and signing.
//!
//! Matches the on-chain `Order` struct of the CTF exchange
//! (OrderStructs.sol). Neg-risk markets verify against a different
//! exchange contract, so two domains are kept. When a proxy wallet is
//! configured it becomes the maker and the order carries the proxy
//! signature type; the EOA key signs either way.

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol;
use alloy::sol_types::{eip712_domain, Eip712Domain, SolStruct};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use mm_common::Side;

use crate::clob::ClobError;

const DOMAIN_NAME: &str = "Polymarket CTF Exchange";
const DOMAIN_VERSION: &str = "1";
const POLYGON_CHAIN_ID: u64 = 137;

/// EOA signs and is maker.
const SIG_TYPE_EOA: u8 = 0;
/// Proxy wallet is maker, EOA signs on its behalf.
const SIG_TYPE_PROXY: u8 = 1;

sol! {
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

/// Signed order in the wire shape the CLOB expects.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub salt: u64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: String,
    pub signature_type: u8,
    pub signature: String,
}

/// Order signer bound to one trading key.
pub struct OrderSigner {
    signer: PrivateKeySigner,
    maker: Address,
    signature_type: u8,
    exchange: Address,
    neg_risk_exchange: Address,
}

impl OrderSigner {
    pub fn new(
        signer: PrivateKeySigner,
        proxy_wallet: Option<Address>,
        exchange: Address,
        neg_risk_exchange: Address,
    ) -> Self {
        let (maker, signature_type) = match proxy_wallet {
            Some(proxy) => (proxy, SIG_TYPE_PROXY),
            None => (signer.address(), SIG_TYPE_EOA),
        };
        Self {
            signer,
            maker,
            signature_type,
            exchange,
            neg_risk_exchange,
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Build and sign an order.
    pub fn build(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        neg_risk: bool,
    ) -> Result<OrderPayload, ClobError> {
        // Salt fits in a JSON number without precision loss.
        let salt = rand::thread_rng().gen_range(0..=9_007_199_254_740_991u64);
        self.build_with_salt(token_id, side, price, size, neg_risk, salt)
    }

    fn build_with_salt(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        neg_risk: bool,
        salt: u64,
    ) -> Result<OrderPayload, ClobError> {
        let token = token_id
            .parse::<U256>()
            .map_err(|_| ClobError::InvalidOrder(format!("token id {token_id}")))?;
        if price <= Decimal::ZERO || price >= Decimal::ONE {
            return Err(ClobError::InvalidOrder(format!("price {price}")));
        }
        if size <= Decimal::ZERO {
            return Err(ClobError::InvalidOrder(format!("size {size}")));
        }

        let (maker_amount, taker_amount) = amounts(side, price, size);
        let order = Order {
            salt: U256::from(salt),
            maker: self.maker,
            signer: self.signer.address(),
            taker: Address::ZERO,
            tokenId: token,
            makerAmount: U256::from(maker_amount),
            takerAmount: U256::from(taker_amount),
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            feeRateBps: U256::ZERO,
            side: match side {
                Side::Buy => 0,
                Side::Sell => 1,
            },
            signatureType: self.signature_type,
        };

        let digest = order.eip712_signing_hash(&self.domain_for(neg_risk));
        let signature = self
            .signer
            .sign_hash_sync(&digest)
            .map_err(|e| ClobError::InvalidOrder(format!("signing failed: {e}")))?;

        Ok(OrderPayload {
            salt,
            maker: self.maker.to_checksum(None),
            signer: self.signer.address().to_checksum(None),
            taker: Address::ZERO.to_checksum(None),
            token_id: token.to_string(),
            maker_amount: maker_amount.to_string(),
            taker_amount: taker_amount.to_string(),
            expiration: "0".to_string(),
            nonce: "0".to_string(),
            fee_rate_bps: "0".to_string(),
            side: side.to_string(),
            signature_type: self.signature_type,
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        })
    }

    fn domain_for(&self, neg_risk: bool) -> Eip712Domain {
        let verifying_contract = if neg_risk {
            self.neg_risk_exchange
        } else {
            self.exchange
        };
        eip712_domain! {
            name: DOMAIN_NAME,
            version: DOMAIN_VERSION,
            chain_id: POLYGON_CHAIN_ID,
            verifying_contract: verifying_contract,
        }
    }
}

/// Maker/taker amounts in 6-decimal units.
///
/// BUY: maker is collateral paid (2 dp), taker is shares received.
/// SELL: maker is shares paid (floored to 2 dp, never oversell), taker is
/// collateral received (4 dp).
fn amounts(side: Side, price: Decimal, size: Decimal) -> (u128, u128) {
    let shares = size.round_dp_with_strategy(2, RoundingStrategy::ToZero);
    match side {
        Side::Buy => {
            let collateral = (shares * price).round_dp(2);
            (scale6(collateral), scale6(shares))
        }
        Side::Sell => {
            let collateral = (shares * price).round_dp_with_strategy(4, RoundingStrategy::ToZero);
            (scale6(shares), scale6(collateral))
        }
    }
}

fn scale6(amount: Decimal) -> u128 {
    (amount * Decimal::new(1_000_000, 0))
        .round()
        .to_u128()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945387dc9f5a59e86cdc84e64546a1d8f76d59";
    const EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
    const NEG_RISK: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

    fn test_signer(proxy: Option<Address>) -> OrderSigner {
        OrderSigner::new(
            PrivateKeySigner::from_str(TEST_KEY).unwrap(),
            proxy,
            EXCHANGE.parse().unwrap(),
            NEG_RISK.parse().unwrap(),
        )
    }

    #[test]
    fn test_sell_amounts() {
        // SELL 5 shares at 0.60: maker 5 shares, taker 3 USDC.
        let (maker, taker) = amounts(Side::Sell, dec!(0.60), dec!(5));
        assert_eq!(maker, 5_000_000);
        assert_eq!(taker, 3_000_000);
    }

    #[test]
    fn test_buy_amounts() {
        // BUY 10 shares at 0.45: maker 4.50 USDC, taker 10 shares.
        let (maker, taker) = amounts(Side::Buy, dec!(0.45), dec!(10));
        assert_eq!(maker, 4_500_000);
        assert_eq!(taker, 10_000_000);
    }

    #[test]
    fn test_sell_size_floors_to_two_decimals() {
        let (maker, _) = amounts(Side::Sell, dec!(0.60), dec!(4.999999));
        assert_eq!(maker, 4_990_000);
    }

    #[test]
    fn test_build_signs_and_serializes() {
        let signer = test_signer(None);
        let payload = signer
            .build_with_salt("1234", Side::Sell, dec!(0.60), dec!(5), false, 42)
            .unwrap();
        assert_eq!(payload.side, "SELL");
        assert_eq!(payload.signature_type, 0);
        assert!(payload.signature.starts_with("0x"));
        assert_eq!(payload.signature.len(), 2 + 130);
        // Deterministic for a fixed salt.
        let again = signer
            .build_with_salt("1234", Side::Sell, dec!(0.60), dec!(5), false, 42)
            .unwrap();
        assert_eq!(payload.signature, again.signature);
        // Different domain for neg-risk markets.
        let neg = signer
            .build_with_salt("1234", Side::Sell, dec!(0.60), dec!(5), true, 42)
            .unwrap();
        assert_ne!(payload.signature, neg.signature);
    }

    #[test]
    fn test_proxy_wallet_is_maker() {
        let proxy: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let signer = test_signer(Some(proxy));
        let payload = signer
            .build_with_salt("1234", Side::Buy, dec!(0.50), dec!(10), false, 7)
            .unwrap();
        assert_eq!(payload.signature_type, 1);
        assert_eq!(payload.maker, proxy.to_checksum(None));
        assert_ne!(payload.maker, payload.signer);
    }

    #[test]
    fn test_build_rejects_out_of_range() {
        let signer = test_signer(None);
        assert!(signer
            .build("1234", Side::Sell, dec!(1.0), dec!(5), false)
            .is_err());
        assert!(signer
            .build("1234", Side::Sell, dec!(0.5), dec!(0), false)
            .is_err());
        assert!(signer
            .build("not-a-number", Side::Sell, dec!(0.5), dec!(5), false)
            .is_err());
    }
}
