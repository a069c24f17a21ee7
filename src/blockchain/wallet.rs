//! Key handling and transaction signing.
//!
//! # Security
//! - Keys arrive per request (or from an environment variable for the CLI)
//! - Keys are never logged or serialized
//! - Key material is zeroized when dropped

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::blockchain::types::{
    BlockchainError, BlockchainResult, SignedTransaction, UnsignedTransaction,
};

/// Environment variable name for the private key.
pub const PRIVATE_KEY_ENV_VAR: &str = "WITHDRAW_PRIVATE_KEY";

/// Hex-encoded private key, wiped from memory on drop.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct KeyMaterial(String);

impl KeyMaterial {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Read the key from `WITHDRAW_PRIVATE_KEY`.
    pub fn from_env() -> BlockchainResult<Self> {
        std::env::var(PRIVATE_KEY_ENV_VAR).map(Self).map_err(|_| {
            BlockchainError::Wallet(format!(
                "Environment variable {} not set",
                PRIVATE_KEY_ENV_VAR
            ))
        })
    }

    fn expose(&self) -> &str {
        self.0.trim()
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// Signing capability handed to the orchestrator for one operation.
///
/// The orchestrator never stores a signer beyond the request that carried it.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Address this signer controls.
    fn address(&self) -> Address;

    /// Sign a fully resolved transaction.
    async fn sign(&self, tx: &UnsignedTransaction) -> BlockchainResult<SignedTransaction>;
}

/// Signer over an in-memory secp256k1 key.
pub struct LocalKeySigner {
    wallet: EthereumWallet,
    address: Address,
}

impl LocalKeySigner {
    /// Create a signer from a hex-encoded private key (with or without 0x prefix).
    pub fn from_private_key(key: KeyMaterial) -> BlockchainResult<Self> {
        let raw = key.expose();
        let key_hex = raw.strip_prefix("0x").unwrap_or(raw);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| BlockchainError::Wallet(format!("Invalid private key format: {}", e)))?;
        let address = signer.address();

        tracing::debug!(address = %address, "Signer loaded");

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
        })
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> BlockchainResult<SignedTransaction> {
        if tx.from != self.address {
            return Err(BlockchainError::SignerMismatch {
                expected: tx.from,
                actual: self.address,
            });
        }

        let envelope = tx
            .to_request()
            .build(&self.wallet)
            .await
            .map_err(|e| BlockchainError::Wallet(format!("Signing failed: {}", e)))?;

        Ok(SignedTransaction {
            request: tx.clone(),
            raw: envelope.encoded_2718().into(),
            hash: *envelope.tx_hash(),
        })
    }
}
