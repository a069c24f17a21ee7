//! Metrics collection and exposition.
//!
//! # Metrics
//! - `withdraw_tx_submitted_total` (counter): transactions broadcast
//! - `withdraw_tx_status_total` (counter): terminal and timeout outcomes by status
//! - `withdraw_confirmation_seconds` (histogram): submit to receipt latency
//! - `withdraw_rpc_failures_total` (counter): operations where every provider failed
//! - `withdraw_chain_healthy` (gauge): 1=reachable, 0=unreachable
//! - `withdraw_job_transitions_total` (counter): job phase changes by target phase
//! - `withdraw_jobs` (gauge): jobs held by the store
//! - `withdraw_api_errors_total` (counter): error responses by status code
//!
//! Recording is a no-op until a recorder is installed.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::blockchain::types::TxStatus;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_tx_submitted() {
    counter!("withdraw_tx_submitted_total").increment(1);
}

pub fn record_tx_status(status: TxStatus) {
    counter!("withdraw_tx_status_total", "status" => status.as_str()).increment(1);
}

pub fn record_confirmation_latency(elapsed: Duration) {
    histogram!("withdraw_confirmation_seconds").record(elapsed.as_secs_f64());
}

pub fn record_rpc_failure(operation: &'static str) {
    counter!("withdraw_rpc_failures_total", "operation" => operation).increment(1);
}

pub fn record_chain_health(healthy: bool) {
    gauge!("withdraw_chain_healthy").set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_job_transition(phase: &'static str) {
    counter!("withdraw_job_transitions_total", "phase" => phase).increment(1);
}

pub fn record_job_count(count: usize) {
    gauge!("withdraw_jobs").set(count as f64);
}

pub fn record_api_error(status: u16) {
    counter!("withdraw_api_errors_total", "status" => status.to_string()).increment(1);
}
