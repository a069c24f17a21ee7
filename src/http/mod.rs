//! HTTP API subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (router, request ID, trace, timeout)
//!     → handlers.rs (decode body, build signer, call WithdrawalService)
//!     → response.rs ({success, data, error} envelope, error → status)
//! ```

pub mod handlers;
pub mod response;
pub mod server;

pub use response::{ApiError, ApiResponse};
pub use server::{AppState, HttpServer};
