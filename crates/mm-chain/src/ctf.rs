//! Conditional-token framework primitives: split, merge, redeem.
//!
//! All three mutate on-chain state and therefore emit exactly one call
//! through the [`WalletExecutor`]. Reads (balances, payout vector) go
//! straight to the node.
//!
//! A binary condition has outcome index sets `[1, 2]` under the zero parent
//! collection. Splitting `x` collateral mints `x` units of each outcome
//! token, so the effective entry price per leg is exactly 0.5; merging is
//! the inverse and burns equal amounts of both.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::DynProvider;
use alloy::sol;
use alloy::sol_types::SolCall;
use rust_decimal::Decimal;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use mm_common::{normalize_shares, MIN_SHARES_PER_SIDE};

use crate::addresses::Addresses;
use crate::error::ChainError;
use crate::units::{from_units, to_units};
use crate::wallet::WalletExecutor;

sol! {
    #[sol(rpc)]
    interface IErc20 {
        function approve(address spender, uint256 value) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IConditionalTokens {
        function splitPosition(
            address collateralToken,
            bytes32 parentCollectionId,
            bytes32 conditionId,
            uint256[] calldata partition,
            uint256 amount
        ) external;
        function mergePositions(
            address collateralToken,
            bytes32 parentCollectionId,
            bytes32 conditionId,
            uint256[] calldata partition,
            uint256 amount
        ) external;
        function redeemPositions(
            address collateralToken,
            bytes32 parentCollectionId,
            bytes32 conditionId,
            uint256[] calldata indexSets
        ) external;
        function balanceOf(address owner, uint256 id) external view returns (uint256);
        function setApprovalForAll(address operator, bool approved) external;
        function isApprovedForAll(address owner, address operator) external view returns (bool);
        function payoutDenominator(bytes32 conditionId) external view returns (uint256);
        function payoutNumerators(bytes32 conditionId, uint256 index) external view returns (uint256);
    }
}

/// Binary partition: index sets {1} and {2}.
fn binary_partition() -> Vec<U256> {
    vec![U256::from(1u8), U256::from(2u8)]
}

/// Parse a 0x-prefixed 32-byte condition id.
pub fn parse_condition_id(s: &str) -> Result<B256, ChainError> {
    s.parse::<B256>()
        .map_err(|_| ChainError::InvalidId(format!("condition id {s}")))
}

/// Parse a decimal ERC-1155 token id.
pub fn parse_token_id(s: &str) -> Result<U256, ChainError> {
    s.parse::<U256>()
        .map_err(|_| ChainError::InvalidId(format!("token id {s}")))
}

/// CTF client bound to one proxy wallet.
pub struct CtfClient {
    provider: DynProvider,
    executor: WalletExecutor,
    addresses: Addresses,
    /// Proxy wallet; owner of collateral and outcome tokens.
    wallet: Address,
    approvals: OnceCell<()>,
}

impl CtfClient {
    pub fn new(
        provider: DynProvider,
        executor: WalletExecutor,
        addresses: Addresses,
        wallet: Address,
    ) -> Self {
        Self {
            provider,
            executor,
            addresses,
            wallet,
            approvals: OnceCell::new(),
        }
    }

    /// Collateral balance of the proxy wallet.
    pub async fn collateral_balance(&self) -> Result<Decimal, ChainError> {
        let usdc = IErc20::new(self.addresses.collateral, self.provider.clone());
        let raw = usdc
            .balanceOf(self.wallet)
            .call()
            .await
            .map_err(|e| ChainError::classify("collateral balance", &e.to_string()))?;
        Ok(from_units(raw))
    }

    /// Outcome-token balance of the proxy wallet.
    pub async fn token_balance(&self, token_id: &str) -> Result<Decimal, ChainError> {
        let id = parse_token_id(token_id)?;
        let ctf = IConditionalTokens::new(self.addresses.conditional_tokens, self.provider.clone());
        let raw = ctf
            .balanceOf(self.wallet, id)
            .call()
            .await
            .map_err(|e| ChainError::classify("token balance", &e.to_string()))?;
        Ok(from_units(raw))
    }

    /// Zero iff the condition is unresolved.
    pub async fn payout_denominator(&self, condition_id: B256) -> Result<u64, ChainError> {
        let ctf = IConditionalTokens::new(self.addresses.conditional_tokens, self.provider.clone());
        let raw = ctf
            .payoutDenominator(condition_id)
            .call()
            .await
            .map_err(|e| ChainError::classify("payout denominator", &e.to_string()))?;
        Ok(raw.try_into().unwrap_or(u64::MAX))
    }

    /// Payout numerator for one outcome index (0-based).
    pub async fn payout_numerator(
        &self,
        condition_id: B256,
        outcome_index: u8,
    ) -> Result<u64, ChainError> {
        let ctf = IConditionalTokens::new(self.addresses.conditional_tokens, self.provider.clone());
        let raw = ctf
            .payoutNumerators(condition_id, U256::from(outcome_index))
            .call()
            .await
            .map_err(|e| ChainError::classify("payout numerator", &e.to_string()))?;
        Ok(raw.try_into().unwrap_or(u64::MAX))
    }

    /// Split collateral into equal amounts of both outcome tokens.
    ///
    /// Returns the shares minted per side. Rejects amounts below the venue
    /// minimum before touching the chain.
    pub async fn split(&self, condition_id: B256, collateral: Decimal) -> Result<Decimal, ChainError> {
        let collateral = normalize_shares(collateral);
        if collateral < MIN_SHARES_PER_SIDE {
            return Err(ChainError::BelowMinimum {
                amount: collateral.to_string(),
                min: MIN_SHARES_PER_SIDE.to_string(),
            });
        }

        self.ensure_approvals(collateral).await?;

        let calldata = split_calldata(self.addresses.collateral, condition_id, collateral);
        self.executor
            .exec(self.addresses.conditional_tokens, calldata, "ctf split")
            .await?;

        info!(condition = %condition_id, amount = %collateral, "split collateral");
        Ok(collateral)
    }

    /// Merge equal amounts of both outcome tokens back to collateral.
    pub async fn merge(&self, condition_id: B256, shares: Decimal) -> Result<Decimal, ChainError> {
        let shares = normalize_shares(shares);
        let calldata = IConditionalTokens::mergePositionsCall {
            collateralToken: self.addresses.collateral,
            parentCollectionId: B256::ZERO,
            conditionId: condition_id,
            partition: binary_partition(),
            amount: to_units(shares),
        }
        .abi_encode();
        self.executor
            .exec(
                self.addresses.conditional_tokens,
                Bytes::from(calldata),
                "ctf merge",
            )
            .await?;

        info!(condition = %condition_id, amount = %shares, "merged outcome tokens");
        Ok(shares)
    }

    /// Redeem all held outcome tokens of a resolved condition.
    pub async fn redeem(&self, condition_id: B256) -> Result<(), ChainError> {
        let calldata = IConditionalTokens::redeemPositionsCall {
            collateralToken: self.addresses.collateral,
            parentCollectionId: B256::ZERO,
            conditionId: condition_id,
            indexSets: binary_partition(),
        }
        .abi_encode();
        self.executor
            .exec(
                self.addresses.conditional_tokens,
                Bytes::from(calldata),
                "ctf redeem",
            )
            .await?;

        info!(condition = %condition_id, "redeemed condition");
        Ok(())
    }

    /// Ensure collateral allowances and ERC-1155 operator approvals.
    ///
    /// Check-then-set: nothing is re-approved when the allowance already
    /// covers `amount` and the operator is already approved. Runs at most
    /// once per process (guarded), before the first split.
    async fn ensure_approvals(&self, amount: Decimal) -> Result<(), ChainError> {
        self.approvals
            .get_or_try_init(|| self.set_missing_approvals(amount))
            .await?;
        Ok(())
    }

    async fn set_missing_approvals(&self, amount: Decimal) -> Result<(), ChainError> {
        let usdc = IErc20::new(self.addresses.collateral, self.provider.clone());
        let ctf = IConditionalTokens::new(self.addresses.conditional_tokens, self.provider.clone());
        let required = to_units(amount);

        // The CTF contract pulls collateral on split; the exchanges and the
        // adapter settle fills and merges.
        let spenders = [
            ("ctf", self.addresses.conditional_tokens),
            ("exchange", self.addresses.exchange),
            ("neg-risk exchange", self.addresses.neg_risk_exchange),
            ("neg-risk adapter", self.addresses.neg_risk_adapter),
        ];
        for (name, spender) in spenders {
            let current = usdc
                .allowance(self.wallet, spender)
                .call()
                .await
                .map_err(|e| ChainError::classify("allowance read", &e.to_string()))?;
            if current >= required {
                debug!(spender = name, "collateral allowance current");
                continue;
            }
            let calldata = IErc20::approveCall {
                spender,
                value: U256::MAX,
            }
            .abi_encode();
            self.executor
                .exec(
                    self.addresses.collateral,
                    Bytes::from(calldata),
                    format!("approve collateral: {name}"),
                )
                .await?;
            info!(spender = name, "collateral allowance set");
        }

        let operators = [
            ("exchange", self.addresses.exchange),
            ("neg-risk exchange", self.addresses.neg_risk_exchange),
            ("neg-risk adapter", self.addresses.neg_risk_adapter),
        ];
        for (name, operator) in operators {
            let approved = ctf
                .isApprovedForAll(self.wallet, operator)
                .call()
                .await
                .map_err(|e| ChainError::classify("operator read", &e.to_string()))?;
            if approved {
                debug!(operator = name, "token operator current");
                continue;
            }
            let calldata = IConditionalTokens::setApprovalForAllCall {
                operator,
                approved: true,
            }
            .abi_encode();
            self.executor
                .exec(
                    self.addresses.conditional_tokens,
                    Bytes::from(calldata),
                    format!("approve operator: {name}"),
                )
                .await?;
            info!(operator = name, "token operator set");
        }

        Ok(())
    }
}

fn split_calldata(collateral: Address, condition_id: B256, amount: Decimal) -> Bytes {
    Bytes::from(
        IConditionalTokens::splitPositionCall {
            collateralToken: collateral,
            parentCollectionId: B256::ZERO,
            conditionId: condition_id,
            partition: binary_partition(),
            amount: to_units(amount),
        }
        .abi_encode(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;
    use rust_decimal_macros::dec;

    #[test]
    fn test_split_calldata_selector_and_shape() {
        let calldata = split_calldata(
            Addresses::polygon().collateral,
            B256::repeat_byte(0xab),
            dec!(5),
        );
        let selector =
            &keccak256(b"splitPosition(address,bytes32,bytes32,uint256[],uint256)")[..4];
        assert_eq!(&calldata[..4], selector);
        // 5 head words + dynamic array (length + 2 elements).
        assert_eq!(calldata.len(), 4 + 8 * 32);
    }

    #[test]
    fn test_parse_condition_id() {
        let ok = parse_condition_id(
            "0xabababababababababababababababababababababababababababababababab",
        )
        .unwrap();
        assert_eq!(ok, B256::repeat_byte(0xab));
        assert!(parse_condition_id("0x1234").is_err());
        assert!(parse_condition_id("not-hex").is_err());
    }

    #[test]
    fn test_parse_token_id() {
        let id = parse_token_id("123456789012345678901234567890").unwrap();
        assert_eq!(id.to_string(), "123456789012345678901234567890");
        assert!(parse_token_id("0xzz").is_err());
        assert!(parse_token_id("").is_err());
    }

    #[test]
    fn test_binary_partition() {
        let p = binary_partition();
        assert_eq!(p, vec![U256::from(1u8), U256::from(2u8)]);
    }
}
