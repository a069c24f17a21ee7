//! Transaction building.
//!
//! # Responsibilities
//! - Resolve gas limit, fee parameters and nonce for an intent
//! - Enforce the gas price ceiling and the balance check
//! - Build same-nonce replacements for stuck transactions

use std::sync::Arc;

use crate::blockchain::client::ChainClient;
use crate::blockchain::nonce::NonceManager;
use crate::blockchain::types::{
    BlockchainError, BlockchainResult, CostEstimate, FeeParams, TransactionRecord, TxIntent,
    TxStatus, UnsignedTransaction,
};
use crate::config::{BlockchainConfig, TransactionConfig};

const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Gas and fee policy applied by [`TxBuilder`].
#[derive(Debug, Clone)]
pub struct BuildPolicy {
    pub chain_id: u64,
    pub default_gas_limit: u64,
    pub gas_limit_buffer_percent: u64,
    pub gas_price_multiplier: f64,
    pub max_gas_price_gwei: u64,
}

impl BuildPolicy {
    pub fn from_config(chain: &BlockchainConfig, txs: &TransactionConfig) -> Self {
        Self {
            chain_id: chain.chain_id,
            default_gas_limit: txs.default_gas_limit,
            gas_limit_buffer_percent: txs.gas_limit_buffer_percent,
            gas_price_multiplier: chain.gas_price_multiplier,
            max_gas_price_gwei: chain.max_gas_price_gwei,
        }
    }
}

/// Assembles signable transactions.
pub struct TxBuilder {
    client: Arc<dyn ChainClient>,
    nonces: Arc<NonceManager>,
    policy: BuildPolicy,
}

impl TxBuilder {
    /// Create a new transaction builder.
    pub fn new(client: Arc<dyn ChainClient>, nonces: Arc<NonceManager>, policy: BuildPolicy) -> Self {
        Self {
            client,
            nonces,
            policy,
        }
    }

    /// Build a transaction, reserving a nonce unless one is supplied.
    ///
    /// A supplied nonce must be the next usable one (`NonceStale` otherwise).
    /// Nothing is reserved if any check fails.
    pub async fn build(
        &self,
        intent: &TxIntent,
        chain_id: u64,
        nonce: Option<u64>,
    ) -> BlockchainResult<UnsignedTransaction> {
        let (gas_limit, fees) = self.prepare(intent, chain_id).await?;

        let nonce = match nonce {
            Some(n) => {
                self.nonces.reserve_exact(intent.from, n).await?;
                n
            }
            None => self.nonces.next_nonce(intent.from).await?,
        };

        let tx = assemble(intent, chain_id, gas_limit, fees, nonce);
        tracing::info!(
            from = %tx.from,
            to = %tx.to,
            value = %tx.value,
            nonce = tx.nonce,
            gas_limit = tx.gas_limit,
            max_fee_per_gas = tx.fees.max_price_per_gas(),
            "Transaction built"
        );
        Ok(tx)
    }

    /// Same as [`build`](Self::build) without reserving a nonce, plus a cost summary.
    pub async fn preview(
        &self,
        intent: &TxIntent,
        chain_id: u64,
    ) -> BlockchainResult<(UnsignedTransaction, CostEstimate)> {
        let (gas_limit, fees) = self.prepare(intent, chain_id).await?;
        let nonce = self.nonces.peek(intent.from).await?;

        let tx = assemble(intent, chain_id, gas_limit, fees, nonce);
        let cost = tx.cost_estimate();
        Ok((tx, cost))
    }

    /// Same request at the same nonce with fees raised by `bump_percent`.
    ///
    /// Only allowed once a reconcile has found the original unmined with its
    /// nonce still open, and never for a record that was already replaced.
    pub async fn replacement(
        &self,
        record: &TransactionRecord,
        bump_percent: u32,
    ) -> BlockchainResult<UnsignedTransaction> {
        if !matches!(record.status(), TxStatus::TimedOut | TxStatus::Pending) {
            return Err(BlockchainError::ReplacementRefused(format!(
                "transaction {} is {}",
                record.submission_hash(),
                record.status().as_str()
            )));
        }
        if let Some(by) = record.replaced_by() {
            return Err(BlockchainError::ReplacementRefused(format!(
                "transaction {} was already replaced by {}",
                record.submission_hash(),
                by
            )));
        }
        if !record.nonce_revalidated() {
            return Err(BlockchainError::ReplacementRefused(format!(
                "nonce {} of {} has not been reconciled",
                record.nonce(),
                record.submission_hash()
            )));
        }
        if let Some(receipt) = self.client.get_receipt(record.submission_hash()).await? {
            return Err(BlockchainError::ReplacementRefused(format!(
                "transaction {} is already mined in block {}",
                record.submission_hash(),
                receipt.block_number
            )));
        }

        let original = record.request();
        let current = self
            .client
            .estimate_fee()
            .await?
            .scaled(self.policy.gas_price_multiplier);
        let fees = original.fees.bumped(bump_percent).max(&current);
        self.check_ceiling(&fees)?;

        let tx = original.with_fees(fees);
        self.check_balance(&tx).await?;

        tracing::info!(
            from = %tx.from,
            nonce = tx.nonce,
            replaces = %record.submission_hash(),
            max_fee_per_gas = fees.max_price_per_gas(),
            "Replacement transaction built"
        );
        Ok(tx)
    }

    /// Gas limit and fees for an intent, after the chain, address, ceiling
    /// and balance checks.
    async fn prepare(&self, intent: &TxIntent, chain_id: u64) -> BlockchainResult<(u64, FeeParams)> {
        if chain_id != self.policy.chain_id {
            return Err(BlockchainError::ChainMismatch {
                expected: self.policy.chain_id,
                actual: chain_id,
            });
        }
        if intent.to.is_zero() {
            return Err(BlockchainError::InvalidAddress(intent.to.to_string()));
        }

        let gas_limit = if intent.input.is_empty() {
            self.policy.default_gas_limit
        } else {
            let estimate = self.client.estimate_gas(intent).await?;
            estimate + estimate * self.policy.gas_limit_buffer_percent / 100
        };

        let estimated = self.client.estimate_fee().await?;
        self.check_ceiling(&estimated)?;
        let fees = estimated.scaled(self.policy.gas_price_multiplier);

        let probe = assemble(intent, chain_id, gas_limit, fees, 0);
        self.check_balance(&probe).await?;

        Ok((gas_limit, fees))
    }

    fn check_ceiling(&self, fees: &FeeParams) -> BlockchainResult<()> {
        let gwei = fees.max_price_per_gas() / WEI_PER_GWEI;
        if gwei > self.policy.max_gas_price_gwei as u128 {
            return Err(BlockchainError::GasPriceTooHigh {
                current_gwei: u64::try_from(gwei).unwrap_or(u64::MAX),
                max_gwei: self.policy.max_gas_price_gwei,
            });
        }
        Ok(())
    }

    async fn check_balance(&self, tx: &UnsignedTransaction) -> BlockchainResult<()> {
        let available = self.client.get_balance(tx.from).await?;
        let required = tx.max_total_cost();
        if required > available {
            return Err(BlockchainError::InsufficientBalance {
                address: tx.from,
                required,
                available,
            });
        }
        Ok(())
    }
}

fn assemble(
    intent: &TxIntent,
    chain_id: u64,
    gas_limit: u64,
    fees: FeeParams,
    nonce: u64,
) -> UnsignedTransaction {
    UnsignedTransaction {
        from: intent.from,
        to: intent.to,
        value: intent.value,
        input: intent.input.clone(),
        chain_id,
        gas_limit,
        fees,
        nonce,
    }
}
