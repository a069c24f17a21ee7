//! Withdrawal orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request (addresses, amount, signing key)
//!     → service.rs (resolve addresses, parse amount)
//!         → simple transfer: builder → signer → tracker
//!         → warehouse transfer: coordinator.rs
//!             INIT → PHASE1_SUBMITTED → PHASE1_CONFIRMED
//!                  → PHASE2_SUBMITTED → PHASE2_CONFIRMED
//!             (each step persisted by store.rs)
//!     → monitor.rs (re-attaches to submitted legs after restart)
//! ```
//!
//! # Design Decisions
//! - The job phase is an explicit tagged enum with a transition table
//! - A job is persisted before any broadcast, so a crash never duplicates a leg
//! - Phase 2 re-reads the warehouse balance on every attempt
//! - Timed-out legs stop the job until an operator reconciles

pub mod coordinator;
pub mod monitor;
pub mod service;
pub mod store;
pub mod types;

pub use coordinator::{CoordinatorSettings, WithdrawalCoordinator};
pub use monitor::ResumeMonitor;
pub use service::{WarehouseRequest, WithdrawalRequest, WithdrawalService};
pub use store::JobStore;
pub use types::{JobPhase, JobStatus, Leg, WithdrawalError, WithdrawalJob, WithdrawalResult};
