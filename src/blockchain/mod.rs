//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! TxIntent (from, to, value, calldata)
//!     → resolver.rs (address validation, name resolution)
//!     → transaction.rs (gas, fees, balance check)
//!         → nonce.rs (per-address reservation)
//!     → wallet.rs (caller-supplied signer)
//!     → tracker.rs (broadcast, poll receipts, reconcile)
//!         → client.rs (RPC connection with timeouts and failover)
//! ```
//!
//! # Security Constraints
//! - Private keys arrive per request and are dropped after signing
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts
//! - Graceful degradation when blockchain unreachable

pub mod client;
pub mod nonce;
pub mod resolver;
pub mod tracker;
pub mod transaction;
pub mod types;
pub mod wallet;
pub mod warehouse;

pub use client::{ChainClient, RpcChainClient};
pub use nonce::{NonceCheck, NonceManager, NonceStatus};
pub use resolver::{AddressResolver, NameResolver};
pub use tracker::{ConfirmationTracker, ReconcileOutcome};
pub use transaction::{BuildPolicy, TxBuilder};
pub use types::{
    BlockchainConfig, BlockchainError, BlockchainResult, ChainId, ChainReceipt, CostEstimate,
    FeeParams, SignedTransaction, TransactionRecord, TxIntent, TxStatus, UnsignedTransaction,
};
pub use wallet::{KeyMaterial, LocalKeySigner, TransactionSigner};
