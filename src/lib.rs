//! Ethereum withdrawal orchestrator.
//!
//! Builds, signs, broadcasts and tracks native-ETH transfers, and drives
//! two-phase withdrawals through a warehouse contract (deposit on behalf of
//! an owner, then withdraw to a destination) with persisted, resumable jobs.

// Core subsystems
pub mod blockchain;
pub mod withdrawals;

// Outer surfaces
pub mod config;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use withdrawals::WithdrawalService;
