//! Submission and confirmation tracking.
//!
//! # Responsibilities
//! - Broadcast signed payloads and record the outcome
//! - Poll for receipts until confirmed, reverted or out of time
//! - Re-validate timed-out transactions on explicit request
//!
//! Nothing here retries on its own. A timeout means the outcome is unknown,
//! and only [`ConfirmationTracker::reconcile`] may move such a record again.

use alloy::primitives::TxHash;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::blockchain::client::ChainClient;
use crate::blockchain::types::{
    unix_now, BlockchainError, BlockchainResult, ChainReceipt, SignedTransaction,
    TransactionRecord, TxStatus,
};
use crate::observability::metrics;

/// What an explicit reconcile found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileOutcome {
    Confirmed,
    Reverted,
    /// No receipt yet, but the nonce is still occupied in the pool.
    StillPending,
    /// No receipt and the nonce is free again; the transaction is gone.
    Dropped,
    /// No receipt, but another transaction from the sender was mined at
    /// this nonce. This hash can never be included.
    Replaced,
}

/// Submits signed transactions and follows them to a terminal status.
pub struct ConfirmationTracker {
    client: Arc<dyn ChainClient>,
    required_confirmations: u64,
}

impl ConfirmationTracker {
    pub fn new(client: Arc<dyn ChainClient>, required_confirmations: u64) -> Self {
        Self {
            client,
            required_confirmations: required_confirmations.max(1),
        }
    }

    /// A PENDING record for a payload about to be broadcast.
    ///
    /// Callers that must persist before touching the chain use this and
    /// [`broadcast`](Self::broadcast) separately.
    pub fn prepare(&self, signed: SignedTransaction) -> TransactionRecord {
        TransactionRecord::new(signed)
    }

    /// Send the record's payload.
    ///
    /// A node refusal marks the record FAILED with the node's message. A
    /// transport failure leaves it PENDING since the node may have accepted it.
    pub async fn broadcast(&self, record: &mut TransactionRecord) -> BlockchainResult<()> {
        match self
            .client
            .send_raw_transaction(&record.signed_payload)
            .await
        {
            Ok(hash) => {
                if hash != record.submission_hash {
                    tracing::warn!(
                        expected = %record.submission_hash,
                        reported = %hash,
                        "Node reported a different transaction hash"
                    );
                }
                record.submitted_at = unix_now();
                metrics::record_tx_submitted();
                tracing::info!(
                    tx_hash = %record.submission_hash,
                    from = %record.request.from,
                    nonce = record.nonce(),
                    "Transaction submitted"
                );
                Ok(())
            }
            Err(BlockchainError::SubmissionRejected { context, reason }) => {
                record.status = TxStatus::Failed;
                record.failure_reason = Some(reason.clone());
                metrics::record_tx_status(TxStatus::Failed);
                tracing::warn!(
                    tx_hash = %record.submission_hash,
                    nonce = record.nonce(),
                    reason = %reason,
                    "Transaction rejected by node"
                );
                Err(BlockchainError::SubmissionRejected { context, reason })
            }
            Err(e) => {
                tracing::error!(
                    tx_hash = %record.submission_hash,
                    nonce = record.nonce(),
                    error = %e,
                    "Broadcast outcome unknown"
                );
                Err(e)
            }
        }
    }

    /// Prepare and broadcast in one step.
    pub async fn submit(&self, signed: SignedTransaction) -> BlockchainResult<TransactionRecord> {
        let mut record = self.prepare(signed);
        self.broadcast(&mut record).await?;
        Ok(record)
    }

    /// Poll until the record is confirmed, reverted, or `wait` elapses.
    ///
    /// Returns the resulting status. Chain errors while polling propagate and
    /// leave the record PENDING. Records that are not PENDING are returned as is.
    pub async fn await_confirmation(
        &self,
        record: &mut TransactionRecord,
        wait: Duration,
        poll_interval: Duration,
    ) -> BlockchainResult<TxStatus> {
        if record.status != TxStatus::Pending {
            return Ok(record.status);
        }

        let tx_hash = record.submission_hash;
        let started = Instant::now();

        let polled = timeout(wait, async {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Some(receipt) = self.conclusive_receipt(tx_hash).await? {
                    return Ok::<ChainReceipt, BlockchainError>(receipt);
                }
            }
        })
        .await;

        match polled {
            Ok(Ok(receipt)) => {
                self.apply_receipt(record, &receipt);
                if record.status == TxStatus::Confirmed {
                    metrics::record_confirmation_latency(started.elapsed());
                }
                Ok(record.status)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                record.status = TxStatus::TimedOut;
                metrics::record_tx_status(TxStatus::TimedOut);
                tracing::warn!(
                    tx_hash = %tx_hash,
                    nonce = record.nonce(),
                    waited_secs = wait.as_secs(),
                    "Transaction not confirmed in time, outcome unknown"
                );
                Ok(TxStatus::TimedOut)
            }
        }
    }

    /// One receipt check without waiting.
    ///
    /// Applies a conclusive receipt; otherwise the record stays PENDING.
    pub async fn poll_once(&self, record: &mut TransactionRecord) -> BlockchainResult<TxStatus> {
        if record.status == TxStatus::Pending {
            if let Some(receipt) = self.conclusive_receipt(record.submission_hash).await? {
                self.apply_receipt(record, &receipt);
            }
        }
        Ok(record.status)
    }

    /// A receipt that settles the outcome: reverted, or deep enough.
    async fn conclusive_receipt(&self, tx_hash: TxHash) -> BlockchainResult<Option<ChainReceipt>> {
        let receipt = match self.client.get_receipt(tx_hash).await? {
            Some(r) => r,
            None => {
                tracing::debug!(tx_hash = %tx_hash, "Transaction pending");
                return Ok(None);
            }
        };

        if !receipt.success {
            return Ok(Some(receipt));
        }

        let head = self.client.block_number().await?;
        let confirmations = confirmations(head, receipt.block_number);
        if confirmations >= self.required_confirmations {
            return Ok(Some(receipt));
        }

        tracing::debug!(
            tx_hash = %tx_hash,
            confirmations,
            required = self.required_confirmations,
            "Waiting for confirmations"
        );
        Ok(None)
    }

    /// Re-examine a record after a timeout.
    ///
    /// Sets `nonce_revalidated` only when the chain shows no receipt for the
    /// hash and the nonce still unresolved, which is what unlocks a
    /// same-nonce replacement.
    pub async fn reconcile(&self, record: &mut TransactionRecord) -> BlockchainResult<ReconcileOutcome> {
        match record.status {
            TxStatus::Confirmed => return Ok(ReconcileOutcome::Confirmed),
            TxStatus::Failed if record.confirmed_block.is_some() => {
                return Ok(ReconcileOutcome::Reverted)
            }
            TxStatus::Failed if record.nonce_spent => return Ok(ReconcileOutcome::Replaced),
            TxStatus::Failed => return Ok(ReconcileOutcome::Dropped),
            TxStatus::Pending | TxStatus::TimedOut => {}
        }

        let tx_hash = record.submission_hash;
        let from = record.request.from;
        let nonce = record.nonce();

        // Mined count first: if the nonce is spent by then, a receipt for
        // this hash must already exist when it is ours.
        let mined_nonce = self.client.get_mined_nonce(from).await?;
        if let Some(receipt) = self.client.get_receipt(tx_hash).await? {
            return self.settle(record, &receipt).await;
        }

        if mined_nonce > nonce {
            record.status = TxStatus::Failed;
            record.nonce_spent = true;
            record.nonce_revalidated = false;
            record.failure_reason = Some(format!(
                "replaced: nonce {} was mined by another transaction",
                nonce
            ));
            metrics::record_tx_status(TxStatus::Failed);
            tracing::warn!(
                tx_hash = %tx_hash,
                nonce,
                mined_nonce,
                "Reconcile: nonce consumed by another transaction"
            );
            return Ok(ReconcileOutcome::Replaced);
        }

        let pending_nonce = self.client.get_nonce(from).await?;
        record.nonce_revalidated = true;

        if pending_nonce > nonce {
            record.status = TxStatus::Pending;
            tracing::info!(
                tx_hash = %tx_hash,
                nonce,
                pending_nonce,
                "Reconcile: still pending"
            );
            Ok(ReconcileOutcome::StillPending)
        } else {
            record.status = TxStatus::Failed;
            record.failure_reason = Some(format!(
                "dropped: nonce {} is free again (pending nonce {})",
                nonce, pending_nonce
            ));
            metrics::record_tx_status(TxStatus::Failed);
            tracing::warn!(
                tx_hash = %tx_hash,
                nonce,
                pending_nonce,
                "Reconcile: transaction dropped"
            );
            Ok(ReconcileOutcome::Dropped)
        }
    }

    /// Reconcile against a receipt that exists for the record's hash.
    async fn settle(
        &self,
        record: &mut TransactionRecord,
        receipt: &ChainReceipt,
    ) -> BlockchainResult<ReconcileOutcome> {
        // A mined transaction can never be replaced, however shallow.
        record.nonce_revalidated = false;

        let head = self.client.block_number().await?;
        if !receipt.success || confirmations(head, receipt.block_number) >= self.required_confirmations {
            self.apply_receipt(record, receipt);
            return Ok(if record.status == TxStatus::Confirmed {
                ReconcileOutcome::Confirmed
            } else {
                ReconcileOutcome::Reverted
            });
        }

        record.status = TxStatus::Pending;
        tracing::info!(
            tx_hash = %record.submission_hash,
            block = receipt.block_number,
            "Reconcile: mined, awaiting confirmations"
        );
        Ok(ReconcileOutcome::StillPending)
    }

    fn apply_receipt(&self, record: &mut TransactionRecord, receipt: &ChainReceipt) {
        record.confirmed_block = Some(receipt.block_number);
        record.gas_used = Some(receipt.gas_used);

        if receipt.success {
            record.status = TxStatus::Confirmed;
            tracing::info!(
                tx_hash = %record.submission_hash,
                nonce = record.nonce(),
                block = receipt.block_number,
                gas_used = receipt.gas_used,
                "Transaction confirmed"
            );
        } else {
            record.status = TxStatus::Failed;
            record.failure_reason = Some("reverted".to_string());
            tracing::warn!(
                tx_hash = %record.submission_hash,
                nonce = record.nonce(),
                block = receipt.block_number,
                "Transaction reverted"
            );
        }
        metrics::record_tx_status(record.status);
    }
}

/// Confirmations including the inclusion block.
fn confirmations(head: u64, included_in: u64) -> u64 {
    if head < included_in {
        // Lagging node behind the one that served the receipt
        1
    } else {
        head - included_in + 1
    }
}
