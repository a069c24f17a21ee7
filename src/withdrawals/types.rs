//! Two-phase withdrawal job model.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::blockchain::types::{unix_now, BlockchainError, TransactionRecord, TxStatus};
use crate::observability::metrics;

/// Which on-chain operation of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    /// Source → warehouse deposit.
    Phase1,
    /// Warehouse → destination release.
    Phase2,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Phase1 => write!(f, "phase1"),
            Leg::Phase2 => write!(f, "phase2"),
        }
    }
}

/// Persisted position in the two-phase state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Init,
    Phase1Submitted,
    Phase1Confirmed,
    Phase2Submitted,
    Phase2Confirmed,
    Failed { leg: Leg, reason: String },
}

impl JobPhase {
    pub fn name(&self) -> &'static str {
        match self {
            JobPhase::Init => "INIT",
            JobPhase::Phase1Submitted => "PHASE1_SUBMITTED",
            JobPhase::Phase1Confirmed => "PHASE1_CONFIRMED",
            JobPhase::Phase2Submitted => "PHASE2_SUBMITTED",
            JobPhase::Phase2Confirmed => "PHASE2_CONFIRMED",
            JobPhase::Failed { .. } => "FAILED",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// A failed leg may only be retried (or fail again); it never jumps to
    /// the other leg. A confirmed phase 1 is never revisited.
    pub fn can_transition_to(&self, next: &JobPhase) -> bool {
        use JobPhase::*;
        matches!(
            (self, next),
            (Init, Phase1Submitted)
                | (Init, Failed { leg: Leg::Phase1, .. })
                | (Failed { leg: Leg::Phase1, .. }, Phase1Submitted)
                | (Failed { leg: Leg::Phase1, .. }, Failed { leg: Leg::Phase1, .. })
                | (Phase1Submitted, Phase1Confirmed)
                | (Phase1Submitted, Failed { leg: Leg::Phase1, .. })
                | (Phase1Confirmed, Phase2Submitted)
                | (Phase1Confirmed, Failed { leg: Leg::Phase2, .. })
                | (Failed { leg: Leg::Phase2, .. }, Phase2Submitted)
                | (Failed { leg: Leg::Phase2, .. }, Failed { leg: Leg::Phase2, .. })
                | (Phase2Submitted, Phase2Confirmed)
                | (Phase2Submitted, Failed { leg: Leg::Phase2, .. })
        )
    }
}

/// Caller-facing summary of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    /// A leg timed out; an operator must reconcile before anything else happens.
    AwaitingOperator,
    Success,
    Failed,
    Cancelled,
}

/// One source → warehouse → wallet withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalJob {
    pub id: Uuid,
    pub source: Address,
    pub warehouse: Address,
    pub destination: Address,
    /// Wei.
    pub amount: U256,
    pub phase: JobPhase,
    pub phase1_record: Option<TransactionRecord>,
    pub phase2_record: Option<TransactionRecord>,
    pub overall_status: JobStatus,
    /// Wei actually withdrawn in phase 2.
    pub claimed_amount: Option<U256>,
    pub phase1_attempts: u32,
    pub phase2_attempts: u32,
    pub created_at: u64,
    pub updated_at: u64,
    pub last_error: Option<String>,
    /// Nonce of a phase-2 attempt the node never accepted, reusable on retry.
    #[serde(default)]
    pub phase2_unsent_nonce: Option<u64>,
}

impl WithdrawalJob {
    pub fn new(source: Address, warehouse: Address, destination: Address, amount: U256) -> Self {
        let now = unix_now();
        Self {
            id: Uuid::new_v4(),
            source,
            warehouse,
            destination,
            amount,
            phase: JobPhase::Init,
            phase1_record: None,
            phase2_record: None,
            overall_status: JobStatus::InProgress,
            claimed_amount: None,
            phase1_attempts: 0,
            phase2_attempts: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
            phase2_unsent_nonce: None,
        }
    }

    /// Move to `next`, enforcing the transition table.
    pub fn transition(&mut self, next: JobPhase) -> Result<(), WithdrawalError> {
        if !self.phase.can_transition_to(&next) {
            return Err(WithdrawalError::InvalidTransition {
                id: self.id,
                from: self.phase.name(),
                to: next.name(),
            });
        }
        if next == JobPhase::Phase2Confirmed && !self.both_legs_confirmed() {
            return Err(WithdrawalError::InvalidTransition {
                id: self.id,
                from: self.phase.name(),
                to: next.name(),
            });
        }

        tracing::info!(
            job_id = %self.id,
            from = self.phase.name(),
            to = next.name(),
            "Job transition"
        );
        metrics::record_job_transition(next.name());

        self.overall_status = match &next {
            JobPhase::Phase2Confirmed => JobStatus::Success,
            JobPhase::Failed { reason, .. } => {
                self.last_error = Some(reason.clone());
                JobStatus::Failed
            }
            _ => JobStatus::InProgress,
        };
        self.phase = next;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = unix_now();
    }

    fn both_legs_confirmed(&self) -> bool {
        let confirmed =
            |r: &Option<TransactionRecord>| r.as_ref().map(|r| r.status()) == Some(TxStatus::Confirmed);
        confirmed(&self.phase1_record) && confirmed(&self.phase2_record)
    }

    /// Record of the leg currently in flight or last attempted.
    pub fn record(&self, leg: Leg) -> Option<&TransactionRecord> {
        match leg {
            Leg::Phase1 => self.phase1_record.as_ref(),
            Leg::Phase2 => self.phase2_record.as_ref(),
        }
    }

    pub fn set_record(&mut self, leg: Leg, record: TransactionRecord) {
        match leg {
            Leg::Phase1 => self.phase1_record = Some(record),
            Leg::Phase2 => self.phase2_record = Some(record),
        }
    }

    /// The leg whose transaction is on chain awaiting an outcome, if any.
    pub fn submitted_leg(&self) -> Option<Leg> {
        match self.phase {
            JobPhase::Phase1Submitted => Some(Leg::Phase1),
            JobPhase::Phase2Submitted => Some(Leg::Phase2),
            _ => None,
        }
    }

    /// True when nothing has been or could be sent on chain.
    pub fn nothing_on_chain(&self) -> bool {
        match &self.phase {
            JobPhase::Init => true,
            JobPhase::Failed {
                leg: Leg::Phase1, ..
            } => true,
            _ => false,
        }
    }
}

/// Errors from the withdrawal coordinator.
#[derive(Debug, Error)]
pub enum WithdrawalError {
    #[error(transparent)]
    Chain(#[from] BlockchainError),

    #[error("Withdrawal job {0} not found")]
    JobNotFound(Uuid),

    #[error("Job {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        id: Uuid,
        from: &'static str,
        to: &'static str,
    },

    #[error("Job {id}: {leg} transaction {tx_hash} timed out and needs reconciliation")]
    NeedsReconciliation {
        id: Uuid,
        leg: Leg,
        tx_hash: alloy::primitives::TxHash,
    },

    #[error("Job {id} already has a transaction on chain ({phase})")]
    AlreadySubmitted { id: Uuid, phase: &'static str },

    #[error("Job {id}: warehouse holds {claimable} wei, {required} wei required")]
    InsufficientClaimable {
        id: Uuid,
        required: U256,
        claimable: U256,
    },

    #[error("Job {id} has no transaction awaiting an outcome ({phase})")]
    NothingToReconcile { id: Uuid, phase: &'static str },

    #[error("Transaction {0} not found")]
    TransactionNotFound(alloy::primitives::TxHash),

    #[error("Job {0} is being processed by another task")]
    JobBusy(Uuid),

    #[error("Job {id} is {status:?}")]
    JobClosed { id: Uuid, status: JobStatus },

    #[error("Job store error: {0}")]
    Store(#[from] std::io::Error),
}

pub type WithdrawalResult<T> = Result<T, WithdrawalError>;
