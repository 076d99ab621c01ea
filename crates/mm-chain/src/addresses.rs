//! Contract address record, built once at startup.

use alloy::primitives::{address, Address};

/// Polygon mainnet chain id.
pub const POLYGON_CHAIN_ID: u64 = 137;

/// Contract addresses the terminal talks to.
///
/// Defaults cover Polygon mainnet; a different deployment only needs a
/// different record, never a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addresses {
    /// Collateral token (USDC.e).
    pub collateral: Address,
    /// Conditional-token framework (ERC-1155 outcome tokens).
    pub conditional_tokens: Address,
    /// CTF exchange (standard markets).
    pub exchange: Address,
    /// CTF exchange for neg-risk markets.
    pub neg_risk_exchange: Address,
    /// Neg-risk adapter.
    pub neg_risk_adapter: Address,
}

impl Addresses {
    /// Polygon mainnet deployment.
    pub fn polygon() -> Self {
        Self {
            collateral: address!("0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
            conditional_tokens: address!("0x4D97DCd97eC945f40cF65F87097ACe5EA0476045"),
            exchange: address!("0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E"),
            neg_risk_exchange: address!("0xC5d563A36AE78145C45a50134d48A1215220f80a"),
            neg_risk_adapter: address!("0xd91E80cF2E7be2e162c6513ceD06f1dD0dA35296"),
        }
    }

    /// Exchange operator for a market, selected by its neg-risk flag.
    pub fn exchange_for(&self, neg_risk: bool) -> Address {
        if neg_risk {
            self.neg_risk_exchange
        } else {
            self.exchange
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_selection() {
        let addrs = Addresses::polygon();
        assert_eq!(addrs.exchange_for(false), addrs.exchange);
        assert_eq!(addrs.exchange_for(true), addrs.neg_risk_exchange);
        assert_ne!(addrs.exchange, addrs.neg_risk_exchange);
    }
}
