//! Withdrawal service facade.
//!
//! Wires the nonce manager, builder, tracker and coordinator together and
//! exposes the operations the HTTP layer calls. Signers are passed per call
//! and never retained beyond it.

use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, TxHash, U256};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::blockchain::client::ChainClient;
use crate::blockchain::nonce::{NonceManager, NonceStatus};
use crate::blockchain::resolver::{parse_address, AddressResolver};
use crate::blockchain::tracker::{ConfirmationTracker, ReconcileOutcome};
use crate::blockchain::transaction::{BuildPolicy, TxBuilder};
use crate::blockchain::types::{
    BlockchainError, BlockchainResult, CostEstimate, TransactionRecord, TxIntent,
    UnsignedTransaction,
};
use crate::blockchain::wallet::TransactionSigner;
use crate::config::ServiceConfig;
use crate::withdrawals::coordinator::{CoordinatorSettings, WithdrawalCoordinator};
use crate::withdrawals::store::JobStore;
use crate::withdrawals::types::{WithdrawalError, WithdrawalJob, WithdrawalResult};

/// Unsigned transaction plus what it will cost.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSummary {
    pub transaction: UnsignedTransaction,
    pub cost_estimate: CostEstimate,
    pub ready_to_sign: bool,
}

/// A simple withdrawal request.
#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub from: String,
    pub to: String,
    pub amount_eth: String,
    /// Explicit nonce; must be the next usable one.
    pub nonce: Option<u64>,
    pub wait_for_confirmation: bool,
    /// Overrides the configured confirmation timeout.
    pub timeout: Option<Duration>,
}

/// A two-phase withdrawal request.
#[derive(Debug, Clone)]
pub struct WarehouseRequest {
    pub source: String,
    /// Falls back to the configured warehouse.
    pub warehouse: Option<String>,
    pub destination: String,
    pub amount_eth: String,
    /// Run the job to completion before returning.
    pub wait: bool,
}

/// What happened to a simple withdrawal.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalOutcome {
    /// Destination as the caller wrote it (name or address).
    pub original_to: String,
    #[serde(flatten)]
    pub record: TransactionRecord,
    /// Present when the transaction is not confirmed.
    pub error: Option<String>,
}

/// Nonce view for one address.
#[derive(Debug, Clone, Serialize)]
pub struct NonceReport {
    pub address: Address,
    pub nonce: u64,
    pub next_available: u64,
    pub is_valid: bool,
}

/// Result of checking a claimed nonce.
#[derive(Debug, Clone, Serialize)]
pub struct NonceValidation {
    pub address: Address,
    pub requested_nonce: u64,
    pub current_nonce: u64,
    pub is_valid: bool,
}

/// Entry point for all withdrawal operations.
pub struct WithdrawalService {
    client: Arc<dyn ChainClient>,
    resolver: Arc<dyn AddressResolver>,
    nonces: Arc<NonceManager>,
    builder: Arc<TxBuilder>,
    tracker: Arc<ConfirmationTracker>,
    coordinator: Arc<WithdrawalCoordinator>,
    /// Simple-withdrawal records kept until their terminal status is read.
    records: DashMap<TxHash, TransactionRecord>,
    chain_id: u64,
    default_warehouse: Option<Address>,
    confirmation_timeout: Duration,
    /// Longest wait a caller may ask for; must end before the HTTP request times out.
    max_wait: Duration,
    poll_interval: Duration,
    replacement_bump_percent: u32,
}

impl WithdrawalService {
    pub fn new(
        client: Arc<dyn ChainClient>,
        resolver: Arc<dyn AddressResolver>,
        store: JobStore,
        config: &ServiceConfig,
    ) -> BlockchainResult<Self> {
        let nonces = Arc::new(NonceManager::new(client.clone()));
        let builder = Arc::new(TxBuilder::new(
            client.clone(),
            nonces.clone(),
            BuildPolicy::from_config(&config.blockchain, &config.transactions),
        ));
        let tracker = Arc::new(ConfirmationTracker::new(
            client.clone(),
            config.blockchain.confirmation_blocks,
        ));

        let confirmation_timeout = Duration::from_secs(config.transactions.confirmation_timeout_secs);
        let poll_interval = Duration::from_millis(config.transactions.poll_interval_ms);
        let max_wait = Duration::from_secs(config.server.request_timeout_secs.saturating_sub(1).max(1));

        let coordinator = Arc::new(WithdrawalCoordinator::new(
            client.clone(),
            nonces.clone(),
            builder.clone(),
            tracker.clone(),
            store,
            CoordinatorSettings {
                chain_id: config.blockchain.chain_id,
                claim_policy: config.warehouse.claim_policy,
                confirmation_timeout,
                poll_interval,
            },
        ));

        let default_warehouse = config
            .warehouse
            .default_address
            .as_deref()
            .map(parse_address)
            .transpose()?;

        Ok(Self {
            client,
            resolver,
            nonces,
            builder,
            tracker,
            coordinator,
            records: DashMap::new(),
            chain_id: config.blockchain.chain_id,
            default_warehouse,
            confirmation_timeout,
            max_wait,
            poll_interval,
            replacement_bump_percent: config.transactions.replacement_fee_bump_percent,
        })
    }

    pub fn coordinator(&self) -> Arc<WithdrawalCoordinator> {
        self.coordinator.clone()
    }

    /// Build a transfer without reserving a nonce or signing.
    pub async fn create_transaction(
        &self,
        from: &str,
        to: &str,
        amount_eth: &str,
    ) -> BlockchainResult<TransactionSummary> {
        let from = parse_address(from)?;
        let to = self.resolver.resolve_input(to).await?;
        let amount = parse_amount(amount_eth)?;

        let (transaction, cost_estimate) = self
            .builder
            .preview(&TxIntent::transfer(from, to, amount), self.chain_id)
            .await?;

        Ok(TransactionSummary {
            transaction,
            cost_estimate,
            ready_to_sign: true,
        })
    }

    /// Build, sign, submit and optionally wait for a plain transfer.
    pub async fn execute_withdrawal(
        &self,
        request: WithdrawalRequest,
        signer: &dyn TransactionSigner,
    ) -> BlockchainResult<WithdrawalOutcome> {
        let from = parse_address(&request.from)?;
        if signer.address() != from {
            return Err(BlockchainError::SignerMismatch {
                expected: from,
                actual: signer.address(),
            });
        }
        let to = self.resolver.resolve_input(&request.to).await?;
        let amount = parse_amount(&request.amount_eth)?;

        let unsigned = self
            .builder
            .build(&TxIntent::transfer(from, to, amount), self.chain_id, request.nonce)
            .await?;
        let mut record = self.sign_and_submit(&unsigned, signer).await?;
        let hash = record.submission_hash();
        // Tracked as soon as it is on the wire, even if the caller goes away
        // while waiting.
        self.records.insert(hash, record.clone());

        let mut error = None;
        if request.wait_for_confirmation {
            let wait = self.confirmation_wait(request.timeout);
            match self
                .tracker
                .await_confirmation(&mut record, wait, self.poll_interval)
                .await
            {
                Ok(_) => error = record.outcome_error().map(|e| e.to_string()),
                // Sent but unobservable; the caller still needs the hash.
                Err(e) => error = Some(e.to_string()),
            }
            if let Some(mut tracked) = self.records.get_mut(&hash) {
                *tracked = record.clone();
            }
        }

        Ok(WithdrawalOutcome {
            original_to: request.to,
            record,
            error,
        })
    }

    fn confirmation_wait(&self, requested: Option<Duration>) -> Duration {
        let wait = requested.unwrap_or(self.confirmation_timeout);
        if wait > self.max_wait {
            tracing::warn!(
                requested_secs = wait.as_secs(),
                max_secs = self.max_wait.as_secs(),
                "Confirmation wait capped below the request timeout"
            );
            return self.max_wait;
        }
        wait
    }

    /// Current state of a simple withdrawal.
    ///
    /// A PENDING record is checked once against the chain. Terminal records
    /// are forgotten after being returned.
    pub async fn get_transaction(&self, hash: TxHash) -> WithdrawalResult<TransactionRecord> {
        let mut record = self
            .records
            .get(&hash)
            .map(|r| r.value().clone())
            .ok_or(WithdrawalError::TransactionNotFound(hash))?;

        self.tracker.poll_once(&mut record).await?;
        if record.is_terminal() {
            self.records.remove(&hash);
        } else {
            self.records.insert(hash, record.clone());
        }
        Ok(record)
    }

    /// Re-validate a timed-out simple withdrawal.
    pub async fn reconcile_transaction(
        &self,
        hash: TxHash,
    ) -> WithdrawalResult<(TransactionRecord, ReconcileOutcome)> {
        let mut record = self
            .records
            .get(&hash)
            .map(|r| r.value().clone())
            .ok_or(WithdrawalError::TransactionNotFound(hash))?;

        let was_open = !record.is_terminal();
        let outcome = self.tracker.reconcile(&mut record).await?;
        if was_open && outcome == ReconcileOutcome::Dropped {
            self.nonces.release(record.request().from, record.nonce()).await;
        }
        self.records.insert(hash, record.clone());
        Ok((record, outcome))
    }

    /// Replace a reconciled, still-pending transaction at the same nonce.
    ///
    /// Each record can be replaced once; a later speed-up goes through the
    /// replacement's own hash.
    pub async fn speed_up(
        &self,
        hash: TxHash,
        signer: &dyn TransactionSigner,
    ) -> WithdrawalResult<TransactionRecord> {
        let original = self
            .records
            .get(&hash)
            .map(|r| r.value().clone())
            .ok_or(WithdrawalError::TransactionNotFound(hash))?;

        let unsigned = self
            .builder
            .replacement(&original, self.replacement_bump_percent)
            .await?;
        let signed = signer.sign(&unsigned).await?;
        let record = self.tracker.submit(signed).await?;

        tracing::info!(
            replaced = %hash,
            tx_hash = %record.submission_hash(),
            nonce = record.nonce(),
            "Transaction replaced"
        );
        // The original stays readable: it may still be the one that mines.
        if let Some(mut superseded) = self.records.get_mut(&hash) {
            superseded.mark_replaced(record.submission_hash());
        }
        self.records.insert(record.submission_hash(), record.clone());
        Ok(record)
    }

    /// Start a two-phase withdrawal.
    ///
    /// With `wait` the job runs to its first stopping point before returning;
    /// otherwise it runs on a background task and the INIT job is returned
    /// for polling.
    pub async fn execute_warehouse_withdrawal(
        &self,
        request: WarehouseRequest,
        signer: Arc<dyn TransactionSigner>,
    ) -> WithdrawalResult<WithdrawalJob> {
        let source = parse_address(&request.source)?;
        if signer.address() != source {
            return Err(BlockchainError::SignerMismatch {
                expected: source,
                actual: signer.address(),
            }
            .into());
        }
        let warehouse = match &request.warehouse {
            Some(w) => self.resolver.resolve_input(w).await?,
            None => self.default_warehouse.ok_or_else(|| {
                BlockchainError::InvalidAddress("no warehouse given or configured".to_string())
            })?,
        };
        let destination = self.resolver.resolve_input(&request.destination).await?;
        let amount = parse_amount(&request.amount_eth)?;

        let job = self
            .coordinator
            .create_job(WithdrawalJob::new(source, warehouse, destination, amount))?;

        if request.wait {
            return self.coordinator.drive(job.id, signer.as_ref()).await;
        }

        let coordinator = self.coordinator.clone();
        let id = job.id;
        tokio::spawn(async move {
            if let Err(e) = coordinator.drive(id, signer.as_ref()).await {
                tracing::error!(job_id = %id, error = %e, "Background withdrawal stopped");
            }
        });
        Ok(job)
    }

    pub fn get_job(&self, id: Uuid) -> WithdrawalResult<WithdrawalJob> {
        self.coordinator.get_job(id)
    }

    pub fn list_jobs(&self) -> Vec<WithdrawalJob> {
        self.coordinator.store().list()
    }

    /// Continue a job from its persisted phase.
    pub async fn resume_job(
        &self,
        id: Uuid,
        signer: &dyn TransactionSigner,
    ) -> WithdrawalResult<WithdrawalJob> {
        self.coordinator.drive(id, signer).await
    }

    pub async fn reconcile_job(
        &self,
        id: Uuid,
    ) -> WithdrawalResult<(WithdrawalJob, ReconcileOutcome)> {
        self.coordinator.reconcile_job(id).await
    }

    pub async fn cancel_job(&self, id: Uuid) -> WithdrawalResult<WithdrawalJob> {
        self.coordinator.cancel(id).await
    }

    pub async fn get_nonce(&self, address: &str) -> BlockchainResult<NonceReport> {
        let address = parse_address(address)?;
        let NonceStatus {
            chain_nonce,
            next_available,
            is_valid,
        } = self.nonces.status(address).await?;
        Ok(NonceReport {
            address,
            nonce: chain_nonce,
            next_available,
            is_valid,
        })
    }

    pub async fn validate_nonce(&self, address: &str, nonce: u64) -> BlockchainResult<NonceValidation> {
        let address = parse_address(address)?;
        let check = self.nonces.validate(address, nonce).await?;
        Ok(NonceValidation {
            address,
            requested_nonce: nonce,
            current_nonce: check.chain_nonce,
            is_valid: check.is_valid,
        })
    }

    /// Whether the chain answers.
    pub async fn health(&self) -> bool {
        self.client.is_healthy().await
    }

    async fn sign_and_submit(
        &self,
        unsigned: &UnsignedTransaction,
        signer: &dyn TransactionSigner,
    ) -> BlockchainResult<TransactionRecord> {
        let signed = match signer.sign(unsigned).await {
            Ok(signed) => signed,
            Err(e) => {
                self.nonces.release(unsigned.from, unsigned.nonce).await;
                return Err(e);
            }
        };

        match self.tracker.submit(signed).await {
            Ok(record) => Ok(record),
            Err(e @ BlockchainError::SubmissionRejected { .. }) => {
                self.nonces.release(unsigned.from, unsigned.nonce).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

/// Parse a positive decimal ETH amount into wei.
pub fn parse_amount(amount_eth: &str) -> BlockchainResult<U256> {
    let trimmed = amount_eth.trim();
    // parse_ether takes the absolute value of negative input
    if trimmed.starts_with('-') {
        return Err(BlockchainError::InvalidAmount(trimmed.to_string()));
    }
    let wei = parse_ether(trimmed).map_err(|_| BlockchainError::InvalidAmount(trimmed.to_string()))?;
    if wei.is_zero() {
        return Err(BlockchainError::InvalidAmount(trimmed.to_string()));
    }
    Ok(wei)
}
