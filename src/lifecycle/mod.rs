//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → HTTP server stops accepting, drains in-flight requests
//!             → resume monitor finishes its sweep and exits
//! ```
//!
//! Jobs are persisted before every broadcast, so an abrupt exit loses no
//! on-chain state; the next start re-attaches through the resume monitor.

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
