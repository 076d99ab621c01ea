//! Chain error type and transient/terminal classification.

use thiserror::Error;

/// Errors from the wallet serializer and CTF primitives.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC transport or node failure that may succeed on retry.
    #[error("RPC transient failure: {0}")]
    Transient(String),

    /// Terminal on-chain failure. One human-readable line; the raw provider
    /// error is logged at debug level only.
    #[error("{label}: {reason}")]
    Execution { label: String, reason: String },

    /// Transaction was included but reverted.
    #[error("{label}: transaction reverted ({tx_hash})")]
    Reverted { label: String, tx_hash: String },

    /// Serializer queue is gone (shutdown).
    #[error("wallet executor stopped")]
    ExecutorStopped,

    /// Split amount below the venue minimum.
    #[error("MM_TRADE_SIZE below minimum: {amount} < {min} shares per side")]
    BelowMinimum { amount: String, min: String },

    /// Malformed on-chain identifier (condition or token id).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl ChainError {
    /// Whether the wallet serializer should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }

    /// Classify a raw provider error string.
    ///
    /// Retry only genuinely transient node conditions. Nonce collisions are
    /// listed terminal on purpose: the queue discipline makes them
    /// impossible, so seeing one means something else is writing with our
    /// key and retrying would just burn gas.
    pub fn classify(label: &str, raw: &str) -> Self {
        let lower = raw.to_lowercase();

        let transient = [
            "timeout",
            "timed out",
            "server error",
            "bad gateway",
            "service unavailable",
            "network",
            "connection refused",
            "connection reset",
            "header not found",
        ];
        if transient.iter().any(|m| lower.contains(m)) {
            return ChainError::Transient(format!("{label}: {raw}"));
        }

        let reason = if lower.contains("execution reverted") {
            "execution reverted"
        } else if lower.contains("insufficient funds") {
            "insufficient funds for gas"
        } else if lower.contains("gas required exceeds") || lower.contains("cannot estimate gas") {
            "gas estimation failed (call would revert)"
        } else if lower.contains("nonce too low") || lower.contains("already known") {
            "wallet nonce already used (out-of-band writer?)"
        } else {
            "submission failed"
        };

        ChainError::Execution {
            label: label.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        for raw in [
            "request timed out",
            "502 Bad Gateway",
            "network is unreachable",
            "Connection refused (os error 111)",
            "header not found",
        ] {
            assert!(
                ChainError::classify("split", raw).is_transient(),
                "{raw} should be transient"
            );
        }
    }

    #[test]
    fn test_terminal_classification() {
        for raw in [
            "execution reverted: ERC20: transfer amount exceeds balance",
            "insufficient funds for gas * price + value",
            "gas required exceeds allowance",
            "nonce too low",
        ] {
            let err = ChainError::classify("merge", raw);
            assert!(!err.is_transient(), "{raw} should be terminal");
        }
    }

    #[test]
    fn test_terminal_error_is_single_line() {
        let err = ChainError::classify("split btc", "execution reverted: blah\nblah");
        let line = err.to_string();
        assert!(!line.contains('\n'));
        assert!(line.starts_with("split btc: "));
    }
}
