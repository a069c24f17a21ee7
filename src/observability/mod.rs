//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Chain client, tracker, coordinator, HTTP layer:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout log stream
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
