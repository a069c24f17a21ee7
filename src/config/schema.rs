//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for the withdrawal orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP API listener settings.
    pub server: ServerConfig,

    /// Chain RPC settings.
    pub blockchain: BlockchainConfig,

    /// Gas, fee and confirmation policy.
    pub transactions: TransactionConfig,

    /// Two-phase warehouse withdrawal settings.
    pub warehouse: WarehouseConfig,

    /// Name resolution settings.
    pub resolver: ResolverConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Backoff used when the chain is unreachable.
    pub retries: RetryConfig,
}

/// HTTP API listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:5000").
    pub bind_address: String,

    /// Request timeout in seconds. Must exceed the confirmation timeout for
    /// synchronous withdrawals to report their final status.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
            request_timeout_secs: 300,
        }
    }
}

/// Blockchain integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Number of blocks (including the inclusion block) before a receipt
    /// counts as confirmed.
    pub confirmation_blocks: u64,

    /// Gas price multiplier (1.0 = estimated, 1.2 = 20% buffer).
    pub gas_price_multiplier: f64,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,

    /// Use EIP-1559 fee fields instead of a legacy gas price.
    pub eip1559: bool,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 1,
            rpc_timeout_secs: 10,
            confirmation_blocks: 1,
            gas_price_multiplier: 1.2,
            max_gas_price_gwei: 500,
            eip1559: true,
        }
    }
}

/// Transaction construction and confirmation policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Gas limit for plain value transfers.
    pub default_gas_limit: u64,

    /// Extra gas added on top of `eth_estimateGas` for contract calls.
    pub gas_limit_buffer_percent: u64,

    /// Default confirmation wait in seconds.
    pub confirmation_timeout_secs: u64,

    /// Receipt polling interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Fee increase for a same-nonce replacement.
    pub replacement_fee_bump_percent: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            default_gas_limit: 21_000,
            gas_limit_buffer_percent: 20,
            confirmation_timeout_secs: 120,
            poll_interval_ms: 2_000,
            replacement_fee_bump_percent: 12,
        }
    }
}

/// How much of the warehouse's claimable balance phase 2 may withdraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPolicy {
    /// Withdraw exactly the job amount; fail (resumable) if less is claimable.
    #[default]
    Exact,
    /// Withdraw `min(job amount, claimable)`; fail only if nothing is claimable.
    Capped,
}

/// Warehouse withdrawal settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Warehouse contract used when a request does not name one.
    pub default_address: Option<String>,

    /// Apportioning policy for phase 2.
    pub claim_policy: ClaimPolicy,

    /// JSON file holding in-flight jobs. `None` keeps jobs in memory only.
    pub job_store_path: Option<String>,

    /// Resume monitor sweep interval in milliseconds.
    pub resume_interval_ms: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            default_address: None,
            claim_policy: ClaimPolicy::Exact,
            job_store_path: Some("withdrawal_jobs.json".to_string()),
            resume_interval_ms: 15_000,
        }
    }
}

/// Name resolution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Resolve `.eth` names through the on-chain ENS registry.
    pub ens_enabled: bool,

    /// ENS registry contract address.
    pub ens_registry: String,

    /// Fixed name → address entries consulted before ENS.
    pub names: HashMap<String, String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ens_enabled: true,
            ens_registry: "0x00000000000c2e074ec69a0dfb2997ba6c7d2e1e".to_string(),
            names: HashMap::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 60_000,
        }
    }
}
