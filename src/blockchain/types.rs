//! Chain-specific types and error definitions.

use alloy::network::TransactionBuilder;
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

// Re-export BlockchainConfig from config module to avoid duplication
pub use crate::config::schema::BlockchainConfig;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors that can occur during blockchain operations.
///
/// Every variant carries enough context (address, nonce, tx hash) for an
/// operator to reconcile by hand.
#[derive(Debug, Error)]
pub enum BlockchainError {
    /// RPC endpoint unreachable or every provider failed.
    #[error("Chain unavailable during {operation}: {reason}")]
    ChainUnavailable {
        operation: &'static str,
        reason: String,
    },

    /// Address failed hex or EIP-55 checksum validation.
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    /// Name could not be resolved to an address.
    #[error("Could not resolve '{name}': {reason}")]
    Resolution { name: String, reason: String },

    /// Amount string could not be parsed or is not positive.
    #[error("Invalid amount '{0}'")]
    InvalidAmount(String),

    /// Value plus maximum fee exceeds the known balance.
    #[error("Insufficient balance for {address}: required {required} wei, available {available} wei")]
    InsufficientBalance {
        address: Address,
        required: U256,
        available: U256,
    },

    /// A claimed nonce does not match the next usable nonce.
    #[error("Stale nonce {claimed} for {address}: expected {expected}")]
    NonceStale {
        address: Address,
        claimed: u64,
        expected: u64,
    },

    /// The node refused the raw transaction.
    #[error("Submission rejected ({context}): {reason}")]
    SubmissionRejected { context: String, reason: String },

    /// Transaction was mined but execution failed.
    #[error("Transaction {tx_hash} (nonce {nonce}) reverted in block {block}")]
    Reverted {
        tx_hash: TxHash,
        nonce: u64,
        block: u64,
    },

    /// No receipt within the confirmation window; outcome unknown.
    #[error("Transaction {tx_hash} (nonce {nonce}) not confirmed after {waited_secs}s, outcome unknown")]
    Timeout {
        tx_hash: TxHash,
        nonce: u64,
        waited_secs: u64,
    },

    /// Network fee query failed.
    #[error("Fee estimation failed: {0}")]
    FeeEstimationFailed(String),

    /// Gas estimation for a contract call failed.
    #[error("Gas estimation failed: {0}")]
    GasEstimationFailed(String),

    /// Gas price exceeded maximum allowed.
    #[error("Gas price {current_gwei} gwei exceeds maximum {max_gwei} gwei")]
    GasPriceTooHigh { current_gwei: u64, max_gwei: u64 },

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// Invalid private key format or signing failure.
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// The signing key does not control the source address.
    #[error("Signer {actual} does not control {expected}")]
    SignerMismatch { expected: Address, actual: Address },

    /// A replacement transaction was requested before the nonce was revalidated.
    #[error("Replacement refused: {0}")]
    ReplacementRefused(String),
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// Fee parameters attached to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeParams {
    /// Pre-London gas price.
    Legacy { gas_price: u128 },
    /// EIP-1559 fee caps.
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl FeeParams {
    /// Highest price per gas this transaction can pay.
    pub fn max_price_per_gas(&self) -> u128 {
        match self {
            FeeParams::Legacy { gas_price } => *gas_price,
            FeeParams::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }

    /// Apply the configured safety multiplier.
    pub fn scaled(&self, multiplier: f64) -> Self {
        let scale = |v: u128| (v as f64 * multiplier) as u128;
        match *self {
            FeeParams::Legacy { gas_price } => FeeParams::Legacy {
                gas_price: scale(gas_price),
            },
            FeeParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => FeeParams::Eip1559 {
                max_fee_per_gas: scale(max_fee_per_gas),
                max_priority_fee_per_gas: scale(max_priority_fee_per_gas),
            },
        }
    }

    /// Raise every component by `percent`, rounding up.
    ///
    /// Nodes only accept a same-nonce replacement when all fee fields grow.
    pub fn bumped(&self, percent: u32) -> Self {
        let bump = |v: u128| v + (v * percent as u128).div_ceil(100);
        match *self {
            FeeParams::Legacy { gas_price } => FeeParams::Legacy {
                gas_price: bump(gas_price),
            },
            FeeParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => FeeParams::Eip1559 {
                max_fee_per_gas: bump(max_fee_per_gas),
                max_priority_fee_per_gas: bump(max_priority_fee_per_gas),
            },
        }
    }

    /// Component-wise maximum of two fee sets of the same kind.
    ///
    /// Mixed kinds keep `self`.
    pub fn max(&self, other: &FeeParams) -> Self {
        match (*self, *other) {
            (FeeParams::Legacy { gas_price: a }, FeeParams::Legacy { gas_price: b }) => {
                FeeParams::Legacy { gas_price: a.max(b) }
            }
            (
                FeeParams::Eip1559 {
                    max_fee_per_gas: a_max,
                    max_priority_fee_per_gas: a_tip,
                },
                FeeParams::Eip1559 {
                    max_fee_per_gas: b_max,
                    max_priority_fee_per_gas: b_tip,
                },
            ) => FeeParams::Eip1559 {
                max_fee_per_gas: a_max.max(b_max),
                max_priority_fee_per_gas: a_tip.max(b_tip),
            },
            _ => *self,
        }
    }
}

/// What the caller wants on chain, before gas, fees and nonce are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIntent {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    /// Call data (empty for simple transfers).
    pub input: Bytes,
}

impl TxIntent {
    /// A plain value transfer.
    pub fn transfer(from: Address, to: Address, value: U256) -> Self {
        Self {
            from,
            to,
            value,
            input: Bytes::new(),
        }
    }

    /// A contract call, optionally carrying value.
    pub fn call(from: Address, to: Address, value: U256, input: Bytes) -> Self {
        Self {
            from,
            to,
            value,
            input,
        }
    }

    /// Request used for `eth_estimateGas` and `eth_call`.
    pub fn to_request(&self) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.from)
            .with_to(self.to)
            .with_value(self.value)
            .with_input(self.input.clone())
    }
}

/// A fully resolved, signable transaction.
///
/// Immutable once built: a retry that changes nonce or fee builds a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub fees: FeeParams,
    pub nonce: u64,
}

impl UnsignedTransaction {
    /// Worst-case fee: gas limit times the maximum price per gas.
    pub fn max_fee_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.fees.max_price_per_gas())
    }

    /// Value plus worst-case fee.
    pub fn max_total_cost(&self) -> U256 {
        self.value + self.max_fee_cost()
    }

    /// Same transaction at the same nonce with different fees.
    pub fn with_fees(&self, fees: FeeParams) -> Self {
        Self {
            fees,
            ..self.clone()
        }
    }

    /// Cost summary for display before signing.
    pub fn cost_estimate(&self) -> CostEstimate {
        CostEstimate::new(self.value, self.max_fee_cost())
    }

    /// Convert into an alloy request ready for signing.
    pub fn to_request(&self) -> TransactionRequest {
        let tx = TransactionRequest::default()
            .with_from(self.from)
            .with_to(self.to)
            .with_value(self.value)
            .with_input(self.input.clone())
            .with_nonce(self.nonce)
            .with_chain_id(self.chain_id)
            .with_gas_limit(self.gas_limit);

        match self.fees {
            FeeParams::Legacy { gas_price } => tx.with_gas_price(gas_price),
            FeeParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => tx
                .with_max_fee_per_gas(max_fee_per_gas)
                .with_max_priority_fee_per_gas(max_priority_fee_per_gas),
        }
    }
}

/// Signed payload ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub request: UnsignedTransaction,
    pub raw: Bytes,
    pub hash: TxHash,
}

/// Amount, fee and total in wei and ETH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub amount_wei: U256,
    pub gas_cost_wei: U256,
    pub total_cost_wei: U256,
    pub amount_eth: String,
    pub gas_cost_eth: String,
    pub total_cost_eth: String,
}

impl CostEstimate {
    pub fn new(amount: U256, gas_cost: U256) -> Self {
        let total = amount + gas_cost;
        Self {
            amount_wei: amount,
            gas_cost_wei: gas_cost,
            total_cost_wei: total,
            amount_eth: format_ether(amount),
            gas_cost_eth: format_ether(gas_cost),
            total_cost_eth: format_ether(total),
        }
    }
}

/// Receipt fields the orchestrator cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: u64,
}

/// Lifecycle of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    /// Submitted (or about to be), no receipt yet.
    Pending,
    /// Mined with a success receipt and enough confirmations.
    Confirmed,
    /// Mined with a failed receipt, or dropped before inclusion.
    Failed,
    /// No receipt within the confirmation window.
    TimedOut,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::TimedOut => "timed_out",
        }
    }
}

/// A transaction the system has submitted, and what became of it.
///
/// Mutated only by the confirmation tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub(crate) request: UnsignedTransaction,
    pub(crate) signed_payload: Bytes,
    pub(crate) submission_hash: TxHash,
    pub(crate) status: TxStatus,
    /// Unix seconds.
    pub(crate) submitted_at: u64,
    pub(crate) confirmed_block: Option<u64>,
    pub(crate) gas_used: Option<u64>,
    pub(crate) failure_reason: Option<String>,
    /// Set only by an explicit reconcile after a timeout.
    pub(crate) nonce_revalidated: bool,
    /// Another transaction was mined at this nonce.
    #[serde(default)]
    pub(crate) nonce_spent: bool,
    /// Same-nonce replacement submitted for this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) replaced_by: Option<TxHash>,
}

impl TransactionRecord {
    pub(crate) fn new(signed: SignedTransaction) -> Self {
        Self {
            request: signed.request,
            signed_payload: signed.raw,
            submission_hash: signed.hash,
            status: TxStatus::Pending,
            submitted_at: unix_now(),
            confirmed_block: None,
            gas_used: None,
            failure_reason: None,
            nonce_revalidated: false,
            nonce_spent: false,
            replaced_by: None,
        }
    }

    pub fn request(&self) -> &UnsignedTransaction {
        &self.request
    }

    pub fn signed_payload(&self) -> &Bytes {
        &self.signed_payload
    }

    pub fn submission_hash(&self) -> TxHash {
        self.submission_hash
    }

    pub fn nonce(&self) -> u64 {
        self.request.nonce
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn submitted_at(&self) -> u64 {
        self.submitted_at
    }

    pub fn confirmed_block(&self) -> Option<u64> {
        self.confirmed_block
    }

    pub fn gas_used(&self) -> Option<u64> {
        self.gas_used
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn nonce_revalidated(&self) -> bool {
        self.nonce_revalidated
    }

    pub fn replaced_by(&self) -> Option<TxHash> {
        self.replaced_by
    }

    /// Point at the replacement; the record stays open until reconciled.
    pub(crate) fn mark_replaced(&mut self, by: TxHash) {
        self.replaced_by = Some(by);
        self.nonce_revalidated = false;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TxStatus::Confirmed | TxStatus::Failed)
    }

    /// The error a caller should see for a non-successful record.
    ///
    /// `Timeout` stays distinct from `Reverted` so nobody assumes funds are safe.
    pub fn outcome_error(&self) -> Option<BlockchainError> {
        match self.status {
            TxStatus::Failed => match self.confirmed_block {
                Some(block) => Some(BlockchainError::Reverted {
                    tx_hash: self.submission_hash,
                    nonce: self.request.nonce,
                    block,
                }),
                None => Some(BlockchainError::SubmissionRejected {
                    context: format!("nonce {}", self.request.nonce),
                    reason: self
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "not included".to_string()),
                }),
            },
            TxStatus::TimedOut => Some(BlockchainError::Timeout {
                tx_hash: self.submission_hash,
                nonce: self.request.nonce,
                waited_secs: unix_now().saturating_sub(self.submitted_at),
            }),
            TxStatus::Pending | TxStatus::Confirmed => None,
        }
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(fees: FeeParams) -> UnsignedTransaction {
        UnsignedTransaction {
            from: Address::ZERO,
            to: Address::repeat_byte(0x11),
            value: U256::from(1_000_000_000_000_000u64),
            input: Bytes::new(),
            chain_id: 1,
            gas_limit: 21_000,
            fees,
            nonce: 7,
        }
    }

    #[test]
    fn test_chain_id_conversion() {
        let chain_id = ChainId::from(1u64);
        assert_eq!(chain_id.0, 1);
        assert_eq!(u64::from(chain_id), 1);
    }

    #[test]
    fn test_default_config() {
        let config = BlockchainConfig::default();
        assert_eq!(config.rpc_timeout_secs, 10);
        assert_eq!(config.confirmation_blocks, 1);
    }

    #[test]
    fn test_error_display() {
        let err = BlockchainError::GasPriceTooHigh {
            current_gwei: 600,
            max_gwei: 500,
        };
        assert!(err.to_string().contains("600"));

        let err = BlockchainError::NonceStale {
            address: Address::ZERO,
            claimed: 136,
            expected: 137,
        };
        assert!(err.to_string().contains("136"));
        assert!(err.to_string().contains("137"));
    }

    #[test]
    fn test_cost_includes_max_fee() {
        let tx = sample_tx(FeeParams::Legacy {
            gas_price: 10_000_000_000,
        });
        assert_eq!(tx.max_fee_cost(), U256::from(210_000_000_000_000u64));
        assert_eq!(
            tx.max_total_cost(),
            U256::from(1_210_000_000_000_000u64)
        );

        let estimate = tx.cost_estimate();
        assert_eq!(estimate.total_cost_wei, tx.max_total_cost());
        assert!(estimate.amount_eth.starts_with("0.001"));
    }

    #[test]
    fn test_fee_bump_rounds_up_every_field() {
        let fees = FeeParams::Eip1559 {
            max_fee_per_gas: 101,
            max_priority_fee_per_gas: 1,
        };
        assert_eq!(
            fees.bumped(10),
            FeeParams::Eip1559 {
                max_fee_per_gas: 112,
                max_priority_fee_per_gas: 2,
            }
        );
    }

    #[test]
    fn test_fee_max_keeps_larger_components() {
        let a = FeeParams::Eip1559 {
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 5,
        };
        let b = FeeParams::Eip1559 {
            max_fee_per_gas: 90,
            max_priority_fee_per_gas: 7,
        };
        assert_eq!(
            a.max(&b),
            FeeParams::Eip1559 {
                max_fee_per_gas: 100,
                max_priority_fee_per_gas: 7,
            }
        );
    }

    #[test]
    fn test_timed_out_is_not_reported_as_reverted() {
        let signed = SignedTransaction {
            request: sample_tx(FeeParams::Legacy { gas_price: 1 }),
            raw: Bytes::from_static(b"raw"),
            hash: TxHash::repeat_byte(0xaa),
        };
        let mut record = TransactionRecord::new(signed);
        record.status = TxStatus::TimedOut;
        assert!(matches!(
            record.outcome_error(),
            Some(BlockchainError::Timeout { nonce: 7, .. })
        ));

        record.status = TxStatus::Failed;
        record.confirmed_block = Some(12);
        assert!(matches!(
            record.outcome_error(),
            Some(BlockchainError::Reverted { block: 12, .. })
        ));
    }

    #[test]
    fn test_record_serde_keeps_status() {
        let signed = SignedTransaction {
            request: sample_tx(FeeParams::Legacy { gas_price: 1 }),
            raw: Bytes::from_static(b"raw"),
            hash: TxHash::repeat_byte(0xaa),
        };
        let record = TransactionRecord::new(signed);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"PENDING\""));
        let decoded: TransactionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }
}
