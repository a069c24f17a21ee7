//! Resilience helpers.
//!
//! RPC calls carry a per-provider timeout and fail over across providers in
//! the chain client. When every provider is down, the resume monitor backs
//! off with `backoff::calculate_backoff` instead of polling at full rate.
//! Transaction submission is never retried blindly: a broadcast whose
//! outcome is unknown is left for reconciliation.

pub mod backoff;
