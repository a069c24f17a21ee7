//! Background re-attachment to in-flight withdrawal legs.
//!
//! After a restart, jobs persisted in a `*_SUBMITTED` phase still point at a
//! broadcast transaction. The monitor checks each receipt once per sweep and
//! advances the jobs; it never waits on a single job and never signs, so
//! phase 2 of a job waits for the next `resume` call.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::blockchain::types::BlockchainError;
use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::withdrawals::coordinator::WithdrawalCoordinator;
use crate::withdrawals::types::WithdrawalError;

/// Summary of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub advanced: usize,
    /// The chain was unreachable for at least one job.
    pub chain_unavailable: bool,
}

pub struct ResumeMonitor {
    coordinator: Arc<WithdrawalCoordinator>,
    interval: Duration,
    retries: RetryConfig,
}

impl ResumeMonitor {
    pub fn new(coordinator: Arc<WithdrawalCoordinator>, interval: Duration, retries: RetryConfig) -> Self {
        Self {
            coordinator,
            interval,
            retries,
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Starting resume monitor");

        let mut failures: u32 = 0;
        loop {
            let report = self.sweep().await;

            let delay = if report.chain_unavailable {
                failures = failures.saturating_add(1);
                let delay = calculate_backoff(failures, self.retries.base_delay_ms, self.retries.max_delay_ms);
                tracing::warn!(
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    "Chain unavailable, backing off"
                );
                delay
            } else {
                failures = 0;
                self.interval
            };

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Resume monitor stopping");
                    return;
                }
                _ = sleep(delay) => {}
            }
        }
    }

    /// Poll every resumable job once.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for job in self.coordinator.store().list_resumable() {
            report.examined += 1;
            let before = job.phase.clone();

            match self.coordinator.poll_job(job.id).await {
                Ok(updated) => {
                    if updated.phase != before || updated.overall_status != job.overall_status {
                        report.advanced += 1;
                    }
                }
                Err(WithdrawalError::JobBusy(_)) => {
                    tracing::debug!(job_id = %job.id, "Job busy, skipping");
                }
                Err(WithdrawalError::Chain(BlockchainError::ChainUnavailable { .. })) => {
                    report.chain_unavailable = true;
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Resume failed");
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                advanced = report.advanced,
                "Resume sweep finished"
            );
        }
        report
    }
}
