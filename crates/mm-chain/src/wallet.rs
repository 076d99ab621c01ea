//! Single-writer transaction serializer over the proxy wallet.
//!
//! The proxy wallet holds the collateral; the configured signing key only
//! authorizes transactions the wallet then executes. Wallet nonces are
//! sequential integers, so two concurrent writers would read the same nonce
//! and one of them would bounce at inclusion time. Instead of nonce
//! bookkeeping, every write in the process goes through one queue consumed
//! by one worker task: operation N+1 does not read its nonce until
//! operation N has resolved.
//!
//! A failed operation answers its caller and the worker moves on; the queue
//! survives member failures.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::ChainError;

/// Priority-fee floor. Polygon inclusion below this is unreliable for
/// deadline-bound writes.
const PRIORITY_FEE_FLOOR: u128 = 30_000_000_000;

/// Absolute fee cap per gas.
const FEE_CAP: u128 = 500_000_000_000;

/// Retries after the initial attempt, transient failures only.
const RETRY_LIMIT: u32 = 3;

/// Back-off between transient retries.
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Timeout for handing a transaction to the node.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for inclusion of a sent transaction.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(120);

sol! {
    #[sol(rpc)]
    interface IProxyWallet {
        function nonce() external view returns (uint256);
        function getTransactionHash(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            uint256 _nonce
        ) external view returns (bytes32);
        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);
    }
}

/// Receipt of a serialized wallet write.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

struct ExecRequest {
    target: Address,
    calldata: Bytes,
    label: String,
    reply: oneshot::Sender<Result<TxReceipt, ChainError>>,
}

/// Handle to the wallet serializer. Cheap to clone; all clones feed the
/// same queue. The worker exits when every handle is dropped.
#[derive(Clone)]
pub struct WalletExecutor {
    queue: mpsc::Sender<ExecRequest>,
}

impl WalletExecutor {
    /// Spawn the worker task and return the queue handle.
    ///
    /// `provider` must carry the signing wallet for the outer transaction;
    /// `signer` produces the inner wallet-transaction signature.
    pub fn spawn(
        provider: DynProvider,
        signer: PrivateKeySigner,
        wallet: Address,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(worker(provider, signer, wallet, rx));
        (Self { queue: tx }, handle)
    }

    /// Execute a contract call through the wallet. The sole write entry
    /// point of the whole process.
    pub async fn exec(
        &self,
        target: Address,
        calldata: Bytes,
        label: impl Into<String>,
    ) -> Result<TxReceipt, ChainError> {
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(ExecRequest {
                target,
                calldata,
                label: label.into(),
                reply,
            })
            .await
            .map_err(|_| ChainError::ExecutorStopped)?;
        rx.await.map_err(|_| ChainError::ExecutorStopped)?
    }
}

async fn worker(
    provider: DynProvider,
    signer: PrivateKeySigner,
    wallet: Address,
    mut rx: mpsc::Receiver<ExecRequest>,
) {
    let contract = IProxyWallet::new(wallet, provider.clone());
    info!(wallet = %wallet, "wallet serializer started");

    while let Some(req) = rx.recv().await {
        let result = exec_with_retry(&provider, &contract, &signer, &req).await;
        match &result {
            Ok(receipt) => info!(
                label = %req.label,
                tx = %receipt.tx_hash,
                block = receipt.block_number,
                "wallet tx confirmed"
            ),
            Err(e) => warn!(label = %req.label, error = %e, "wallet tx failed"),
        }
        // Caller may have given up; the queue keeps going either way.
        let _ = req.reply.send(result);
    }

    info!("wallet serializer stopped");
}

async fn exec_with_retry(
    provider: &DynProvider,
    contract: &IProxyWallet::IProxyWalletInstance<DynProvider>,
    signer: &PrivateKeySigner,
    req: &ExecRequest,
) -> Result<TxReceipt, ChainError> {
    let mut attempt = 0;
    loop {
        match submit_once(provider, contract, signer, req).await {
            Ok(receipt) => return Ok(receipt),
            Err(e) if e.is_transient() && attempt < RETRY_LIMIT => {
                attempt += 1;
                warn!(
                    label = %req.label,
                    attempt,
                    error = %e,
                    "transient RPC failure, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn submit_once(
    provider: &DynProvider,
    contract: &IProxyWallet::IProxyWalletInstance<DynProvider>,
    signer: &PrivateKeySigner,
    req: &ExecRequest,
) -> Result<TxReceipt, ChainError> {
    let label = req.label.as_str();

    // Nonce is read fresh per operation; an out-of-band transaction just
    // shows up as a higher nonce here.
    let nonce: U256 = contract
        .nonce()
        .call()
        .await
        .map_err(|e| classify(label, "nonce read", &e.to_string()))?;

    let tx_hash: B256 = contract
        .getTransactionHash(
            req.target,
            U256::ZERO,
            req.calldata.clone(),
            0, // CALL
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            Address::ZERO,
            Address::ZERO,
            nonce,
        )
        .call()
        .await
        .map_err(|e| classify(label, "tx hash", &e.to_string()))?;

    // Raw ECDSA over the wallet tx hash; the wallet verifies it, so no
    // EIP-191 message prefix.
    let signature = signer
        .sign_hash_sync(&tx_hash)
        .map_err(|e| ChainError::Execution {
            label: label.to_string(),
            reason: format!("signing failed: {e}"),
        })?;
    let sig_bytes = Bytes::from(signature.as_bytes().to_vec());

    let fees = provider
        .estimate_eip1559_fees()
        .await
        .map_err(|e| classify(label, "fee oracle", &e.to_string()))?;
    let tip = fees.max_priority_fee_per_gas.max(PRIORITY_FEE_FLOOR);
    let max_fee = fees.max_fee_per_gas.max(tip).min(FEE_CAP);
    let tip = tip.min(max_fee);
    debug!(label, nonce = %nonce, tip, max_fee, "submitting wallet tx");

    let call = contract
        .execTransaction(
            req.target,
            U256::ZERO,
            req.calldata.clone(),
            0,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            Address::ZERO,
            Address::ZERO,
            sig_bytes,
        )
        .max_priority_fee_per_gas(tip)
        .max_fee_per_gas(max_fee);

    let pending = timeout(SEND_TIMEOUT, call.send())
        .await
        .map_err(|_| ChainError::Transient(format!("{label}: send timed out")))?
        .map_err(|e| classify(label, "send", &e.to_string()))?;

    let receipt = timeout(CONFIRM_TIMEOUT, pending.get_receipt())
        .await
        .map_err(|_| ChainError::Transient(format!("{label}: confirmation timed out")))?
        .map_err(|e| classify(label, "confirmation", &e.to_string()))?;

    if !receipt.status() {
        return Err(ChainError::Reverted {
            label: label.to_string(),
            tx_hash: receipt.transaction_hash.to_string(),
        });
    }

    Ok(TxReceipt {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number.unwrap_or_default(),
        gas_used: receipt.gas_used,
    })
}

fn classify(label: &str, stage: &str, raw: &str) -> ChainError {
    debug!(label, stage, raw, "provider error");
    ChainError::classify(label, raw)
}
