//! Two-phase withdrawal coordinator.
//!
//! Drives a job through source → warehouse → destination. Every transition is
//! persisted before the next chain call, and a leg that has been confirmed is
//! never sent again. A leg whose outcome is unknown (timed out) stops the job
//! until an operator reconciles it.

use alloy::primitives::U256;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::blockchain::client::ChainClient;
use crate::blockchain::nonce::NonceManager;
use crate::blockchain::tracker::{ConfirmationTracker, ReconcileOutcome};
use crate::blockchain::transaction::TxBuilder;
use crate::blockchain::types::{
    BlockchainError, TransactionRecord, TxIntent, TxStatus, UnsignedTransaction,
};
use crate::blockchain::wallet::TransactionSigner;
use crate::blockchain::warehouse;
use crate::config::ClaimPolicy;
use crate::withdrawals::store::JobStore;
use crate::withdrawals::types::{
    JobPhase, JobStatus, Leg, WithdrawalError, WithdrawalJob, WithdrawalResult,
};

/// Coordinator settings taken from configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub chain_id: u64,
    pub claim_policy: ClaimPolicy,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

/// Marks a job as owned by one task until dropped.
struct ActiveJob<'a> {
    active: &'a DashMap<Uuid, ()>,
    id: Uuid,
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// What the step machine should do after a step.
enum Step {
    Continue,
    Stop,
}

pub struct WithdrawalCoordinator {
    client: Arc<dyn ChainClient>,
    nonces: Arc<NonceManager>,
    builder: Arc<TxBuilder>,
    tracker: Arc<ConfirmationTracker>,
    store: JobStore,
    settings: CoordinatorSettings,
    active: DashMap<Uuid, ()>,
}

impl WithdrawalCoordinator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        nonces: Arc<NonceManager>,
        builder: Arc<TxBuilder>,
        tracker: Arc<ConfirmationTracker>,
        store: JobStore,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            client,
            nonces,
            builder,
            tracker,
            store,
            settings,
            active: DashMap::new(),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Record a new job in INIT. Nothing touches the chain yet.
    pub fn create_job(&self, job: WithdrawalJob) -> WithdrawalResult<WithdrawalJob> {
        if job.amount.is_zero() {
            return Err(BlockchainError::InvalidAmount("0".to_string()).into());
        }
        for address in [job.warehouse, job.destination] {
            if address.is_zero() {
                return Err(BlockchainError::InvalidAddress(address.to_string()).into());
            }
        }

        self.store.put(&job)?;
        tracing::info!(
            job_id = %job.id,
            source = %job.source,
            warehouse = %job.warehouse,
            destination = %job.destination,
            amount = %job.amount,
            "Withdrawal job created"
        );
        Ok(job)
    }

    pub fn get_job(&self, id: Uuid) -> WithdrawalResult<WithdrawalJob> {
        self.store.get(&id).ok_or(WithdrawalError::JobNotFound(id))
    }

    /// Advance a job as far as it can go in one pass.
    ///
    /// Returns the job as persisted. A leg that fails before or at submission
    /// leaves the job in `FAILED(leg)` and returns `Ok`; a chain outage while
    /// waiting for a receipt returns `Err` with the job unchanged.
    pub async fn drive(
        &self,
        id: Uuid,
        signer: &dyn TransactionSigner,
    ) -> WithdrawalResult<WithdrawalJob> {
        let _active = self.acquire(id)?;
        let mut job = self.get_job(id)?;

        if signer.address() != job.source {
            return Err(BlockchainError::SignerMismatch {
                expected: job.source,
                actual: signer.address(),
            }
            .into());
        }
        if job.overall_status == JobStatus::Cancelled {
            return Err(WithdrawalError::JobClosed {
                id,
                status: job.overall_status,
            });
        }

        loop {
            let step = match job.phase.clone() {
                JobPhase::Init | JobPhase::Failed { leg: Leg::Phase1, .. } => {
                    self.submit_leg(&mut job, Leg::Phase1, signer).await?
                }
                JobPhase::Phase1Submitted => self.follow(&mut job, Leg::Phase1).await?,
                JobPhase::Phase1Confirmed | JobPhase::Failed { leg: Leg::Phase2, .. } => {
                    self.submit_leg(&mut job, Leg::Phase2, signer).await?
                }
                JobPhase::Phase2Submitted => self.follow(&mut job, Leg::Phase2).await?,
                JobPhase::Phase2Confirmed => Step::Stop,
            };
            if let Step::Stop = step {
                return Ok(job);
            }
        }
    }

    /// Check a submitted leg once, without waiting and without signing.
    ///
    /// A job whose phase 1 confirms here stops at PHASE1_CONFIRMED; phase 2
    /// needs a signer and so a `drive` call. A leg with no receipt yet is left
    /// as it is for the next check.
    pub async fn poll_job(&self, id: Uuid) -> WithdrawalResult<WithdrawalJob> {
        let _active = self.acquire(id)?;
        let mut job = self.get_job(id)?;
        if job.overall_status != JobStatus::InProgress {
            return Ok(job);
        }

        let (leg, mut record) = match job.submitted_leg() {
            Some(leg) => match job.record(leg) {
                Some(record) => (leg, record.clone()),
                None => return Ok(job),
            },
            None => return Ok(job),
        };

        match self.tracker.poll_once(&mut record).await? {
            TxStatus::Confirmed => {
                job.set_record(leg, record);
                job.transition(confirmed(leg))?;
                self.store.put(&job)?;
            }
            TxStatus::Failed => {
                job.set_record(leg, record);
                let reason = self.leg_failure_reason(&job, leg);
                self.fail_leg(&mut job, leg, reason)?;
            }
            TxStatus::Pending | TxStatus::TimedOut => {}
        }
        Ok(job)
    }

    /// Resolve a leg whose outcome is unknown by asking the chain again.
    pub async fn reconcile_job(
        &self,
        id: Uuid,
    ) -> WithdrawalResult<(WithdrawalJob, ReconcileOutcome)> {
        let _active = self.acquire(id)?;
        let mut job = self.get_job(id)?;

        let leg = job
            .submitted_leg()
            .ok_or(WithdrawalError::NothingToReconcile {
                id,
                phase: job.phase.name(),
            })?;
        let mut record = job
            .record(leg)
            .cloned()
            .ok_or(WithdrawalError::NothingToReconcile {
                id,
                phase: job.phase.name(),
            })?;

        let outcome = self.tracker.reconcile(&mut record).await?;
        let nonce = record.nonce();
        job.set_record(leg, record);

        match outcome {
            ReconcileOutcome::Confirmed => {
                job.transition(confirmed(leg))?;
                self.store.put(&job)?;
            }
            ReconcileOutcome::Reverted => {
                let reason = self.leg_failure_reason(&job, leg);
                self.fail_leg(&mut job, leg, reason)?;
            }
            ReconcileOutcome::Dropped => {
                self.nonces.release(job.source, nonce).await;
                if leg == Leg::Phase2 {
                    job.phase2_unsent_nonce = Some(nonce);
                }
                let reason = self.leg_failure_reason(&job, leg);
                self.fail_leg(&mut job, leg, reason)?;
            }
            ReconcileOutcome::Replaced => {
                // The nonce is spent on chain, so nothing is handed back.
                let reason = self.leg_failure_reason(&job, leg);
                self.fail_leg(&mut job, leg, reason)?;
            }
            ReconcileOutcome::StillPending => {
                job.overall_status = JobStatus::AwaitingOperator;
                job.touch();
                self.store.put(&job)?;
            }
        }

        tracing::info!(job_id = %id, leg = %leg, outcome = ?outcome, "Job reconciled");
        Ok((job, outcome))
    }

    /// Cancel a job that has nothing on chain.
    pub async fn cancel(&self, id: Uuid) -> WithdrawalResult<WithdrawalJob> {
        let _active = self.acquire(id)?;
        let mut job = self.get_job(id)?;

        if job.overall_status == JobStatus::Cancelled {
            return Ok(job);
        }
        if !job.nothing_on_chain() {
            return Err(WithdrawalError::AlreadySubmitted {
                id,
                phase: job.phase.name(),
            });
        }

        job.overall_status = JobStatus::Cancelled;
        job.touch();
        self.store.put(&job)?;
        tracing::info!(job_id = %id, phase = job.phase.name(), "Job cancelled");
        Ok(job)
    }

    fn acquire(&self, id: Uuid) -> WithdrawalResult<ActiveJob<'_>> {
        if self.active.insert(id, ()).is_some() {
            return Err(WithdrawalError::JobBusy(id));
        }
        Ok(ActiveJob {
            active: &self.active,
            id,
        })
    }

    /// Build, sign, persist, then broadcast one leg.
    async fn submit_leg(
        &self,
        job: &mut WithdrawalJob,
        leg: Leg,
        signer: &dyn TransactionSigner,
    ) -> WithdrawalResult<Step> {
        let intent = match leg {
            Leg::Phase1 => {
                warehouse::deposit_intent(job.source, job.warehouse, job.destination, job.amount)
            }
            Leg::Phase2 => match self.phase2_intent(job).await {
                Ok(intent) => intent,
                Err(reason) => {
                    self.fail_leg(job, leg, reason)?;
                    return Ok(Step::Stop);
                }
            },
        };

        match leg {
            Leg::Phase1 => job.phase1_attempts += 1,
            Leg::Phase2 => job.phase2_attempts += 1,
        }

        let unsigned = match self.build(job, leg, &intent).await {
            Ok(tx) => tx,
            Err(e) => {
                self.fail_leg(job, leg, e.to_string())?;
                return Ok(Step::Stop);
            }
        };
        let nonce = unsigned.nonce;

        let signed = match signer.sign(&unsigned).await {
            Ok(signed) => signed,
            Err(e) => {
                self.nonces.release(job.source, nonce).await;
                self.fail_leg(job, leg, e.to_string())?;
                return Ok(Step::Stop);
            }
        };

        let mut record = self.tracker.prepare(signed);
        job.set_record(leg, record.clone());
        job.phase2_unsent_nonce = None;
        job.transition(submitted(leg))?;
        // Persisted before broadcast: after a crash the job points at this
        // exact payload rather than at a leg that looks unsent.
        self.store.put(job)?;

        let sent = self.tracker.broadcast(&mut record).await;
        job.set_record(leg, record);
        match sent {
            Ok(()) => {
                job.touch();
                self.store.put(job)?;
                Ok(Step::Continue)
            }
            Err(BlockchainError::SubmissionRejected { reason, .. }) => {
                self.nonces.release(job.source, nonce).await;
                if leg == Leg::Phase2 {
                    job.phase2_unsent_nonce = Some(nonce);
                }
                self.fail_leg(job, leg, format!("submission rejected: {}", reason))?;
                Ok(Step::Stop)
            }
            Err(e) => {
                // The node may hold the payload; keep following the stored hash.
                job.last_error = Some(e.to_string());
                job.touch();
                self.store.put(job)?;
                Err(e.into())
            }
        }
    }

    /// Phase-2 call sized against a fresh claimable balance.
    ///
    /// The error side is the reason the leg fails without a submission.
    async fn phase2_intent(&self, job: &mut WithdrawalJob) -> Result<TxIntent, String> {
        let claimable = self
            .client
            .warehouse_balance(job.warehouse, job.destination)
            .await
            .map_err(|e| e.to_string())?;

        let claim = self
            .claim_amount(job, claimable)
            .map_err(|e| e.to_string())?;

        tracing::info!(
            job_id = %job.id,
            claimable = %claimable,
            claim = %claim,
            policy = ?self.settings.claim_policy,
            "Warehouse balance checked"
        );
        job.claimed_amount = Some(claim);
        Ok(warehouse::withdraw_intent(
            job.source,
            job.warehouse,
            job.destination,
            claim,
        ))
    }

    fn claim_amount(&self, job: &WithdrawalJob, claimable: U256) -> WithdrawalResult<U256> {
        let insufficient = || WithdrawalError::InsufficientClaimable {
            id: job.id,
            required: job.amount,
            claimable,
        };
        match self.settings.claim_policy {
            ClaimPolicy::Exact if claimable >= job.amount => Ok(job.amount),
            ClaimPolicy::Exact => Err(insufficient()),
            ClaimPolicy::Capped if claimable.is_zero() => Err(insufficient()),
            ClaimPolicy::Capped => Ok(job.amount.min(claimable)),
        }
    }

    async fn build(
        &self,
        job: &WithdrawalJob,
        leg: Leg,
        intent: &TxIntent,
    ) -> Result<UnsignedTransaction, BlockchainError> {
        let chain_id = self.settings.chain_id;

        let hint = match (leg, job.phase2_unsent_nonce) {
            (Leg::Phase2, Some(n)) => match self.nonces.validate(job.source, n).await {
                Ok(check) if check.is_valid => Some(n),
                _ => None,
            },
            _ => None,
        };

        if let Some(n) = hint {
            match self.builder.build(intent, chain_id, Some(n)).await {
                Err(BlockchainError::NonceStale { .. }) => {
                    tracing::debug!(job_id = %job.id, nonce = n, "Unsent nonce taken, allocating fresh");
                }
                other => return other,
            }
        }
        self.builder.build(intent, chain_id, None).await
    }

    /// Wait on a submitted leg and apply what the chain says.
    async fn follow(&self, job: &mut WithdrawalJob, leg: Leg) -> WithdrawalResult<Step> {
        let mut record = match job.record(leg) {
            Some(record) => record.clone(),
            None => {
                return Err(WithdrawalError::InvalidTransition {
                    id: job.id,
                    from: job.phase.name(),
                    to: confirmed(leg).name(),
                })
            }
        };

        if record.status() == TxStatus::TimedOut {
            return Err(WithdrawalError::NeedsReconciliation {
                id: job.id,
                leg,
                tx_hash: record.submission_hash(),
            });
        }
        if job.overall_status == JobStatus::AwaitingOperator {
            job.overall_status = JobStatus::InProgress;
        }

        let status = self
            .tracker
            .await_confirmation(
                &mut record,
                self.settings.confirmation_timeout,
                self.settings.poll_interval,
            )
            .await?;
        job.set_record(leg, record);

        match status {
            TxStatus::Confirmed => {
                job.transition(confirmed(leg))?;
                self.store.put(job)?;
                Ok(Step::Continue)
            }
            TxStatus::Failed => {
                let reason = self.leg_failure_reason(job, leg);
                self.fail_leg(job, leg, reason)?;
                Ok(Step::Stop)
            }
            TxStatus::TimedOut => {
                let reason = job
                    .record(leg)
                    .and_then(TransactionRecord::outcome_error)
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "timed out".to_string());
                tracing::warn!(job_id = %job.id, leg = %leg, "Leg timed out, awaiting operator");
                job.overall_status = JobStatus::AwaitingOperator;
                job.last_error = Some(reason);
                job.touch();
                self.store.put(job)?;
                Ok(Step::Stop)
            }
            TxStatus::Pending => Ok(Step::Stop),
        }
    }

    fn leg_failure_reason(&self, job: &WithdrawalJob, leg: Leg) -> String {
        job.record(leg)
            .and_then(TransactionRecord::outcome_error)
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("{} failed", leg))
    }

    fn fail_leg(&self, job: &mut WithdrawalJob, leg: Leg, reason: String) -> WithdrawalResult<()> {
        tracing::warn!(job_id = %job.id, leg = %leg, reason = %reason, "Leg failed");
        job.transition(JobPhase::Failed { leg, reason })?;
        self.store.put(job)?;
        Ok(())
    }
}

fn submitted(leg: Leg) -> JobPhase {
    match leg {
        Leg::Phase1 => JobPhase::Phase1Submitted,
        Leg::Phase2 => JobPhase::Phase2Submitted,
    }
}

fn confirmed(leg: Leg) -> JobPhase {
    match leg {
        Leg::Phase1 => JobPhase::Phase1Confirmed,
        Leg::Phase2 => JobPhase::Phase2Confirmed,
    }
}
