//! Chain access: the `ChainClient` capability and its JSON-RPC implementation.
//!
//! # Responsibilities
//! - Define the narrow set of chain queries the orchestrator consumes
//! - Connect to JSON-RPC endpoints with failover
//! - Enforce per-call timeouts and map transport failures to `ChainUnavailable`
//! - Provide health check for blockchain connectivity

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::TransportResult;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{
    BlockchainConfig, BlockchainError, BlockchainResult, ChainId, ChainReceipt, FeeParams,
    TxIntent,
};
use crate::blockchain::warehouse;
use crate::observability::metrics;

/// Chain queries consumed by the orchestration core.
///
/// Implementations never retry on their own beyond provider failover; the
/// caller decides what to do with `ChainUnavailable`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain id reported by the node.
    async fn chain_id(&self) -> BlockchainResult<u64>;

    /// Latest block number.
    async fn block_number(&self) -> BlockchainResult<u64>;

    /// Transaction count including pending transactions.
    async fn get_nonce(&self, address: Address) -> BlockchainResult<u64>;

    /// Transaction count as of the latest block: the next nonce not yet mined.
    async fn get_mined_nonce(&self, address: Address) -> BlockchainResult<u64>;

    /// Native balance in wei.
    async fn get_balance(&self, address: Address) -> BlockchainResult<U256>;

    /// Current network fee levels. Fails with `FeeEstimationFailed`.
    async fn estimate_fee(&self) -> BlockchainResult<FeeParams>;

    /// Gas needed for a call. Fails with `GasEstimationFailed`.
    async fn estimate_gas(&self, intent: &TxIntent) -> BlockchainResult<u64>;

    /// Broadcast a signed payload. A node refusal is `SubmissionRejected`.
    async fn send_raw_transaction(&self, raw: &[u8]) -> BlockchainResult<TxHash>;

    /// Receipt for a transaction, `None` while not mined.
    async fn get_receipt(&self, tx_hash: TxHash) -> BlockchainResult<Option<ChainReceipt>>;

    /// Read-only contract call.
    async fn call(&self, to: Address, data: Bytes) -> BlockchainResult<Bytes>;

    /// ETH the warehouse holds on behalf of `owner`.
    async fn warehouse_balance(&self, warehouse: Address, owner: Address) -> BlockchainResult<U256> {
        let output = self.call(warehouse, warehouse::balance_call(owner)).await?;
        warehouse::decode_balance(&output)
    }

    /// Check if the chain is reachable.
    async fn is_healthy(&self) -> bool {
        let healthy = self.block_number().await.is_ok();
        metrics::record_chain_health(healthy);
        healthy
    }
}

type DynProvider = Arc<dyn Provider + Send + Sync>;

/// JSON-RPC chain client with failover support.
#[derive(Clone)]
pub struct RpcChainClient {
    /// List of providers (primary + failovers).
    providers: Vec<DynProvider>,
    /// Configuration.
    config: BlockchainConfig,
    /// Request timeout duration.
    timeout_duration: Duration,
}

impl RpcChainClient {
    /// Create a new client.
    ///
    /// Fails only on an unparsable primary URL; an unreachable node is
    /// logged and surfaces later as `ChainUnavailable`.
    pub async fn new(config: BlockchainConfig) -> BlockchainResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        // 1. Add primary provider
        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            BlockchainError::ChainUnavailable {
                operation: "connect",
                reason: format!("Invalid RPC URL '{}': {}", config.rpc_url, e),
            }
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as DynProvider);

        // 2. Add failover providers
        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as DynProvider);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        let client = Self {
            providers,
            config: config.clone(),
            timeout_duration,
        };

        match client.verify_chain_id().await {
            Ok(()) => {
                tracing::info!(
                    rpc_url = %config.rpc_url,
                    chain_id = config.chain_id,
                    "Chain client initialized"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Chain client initialized but chain verification failed"
                );
            }
        }

        Ok(client)
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> BlockchainResult<()> {
        let chain_id = ChainId(ChainClient::chain_id(self).await?);
        if chain_id.0 != self.config.chain_id {
            return Err(BlockchainError::ChainMismatch {
                expected: self.config.chain_id,
                actual: chain_id.0,
            });
        }
        Ok(())
    }

    /// Run `f` against each provider in turn until one answers in time.
    async fn with_failover<T, F, Fut>(
        &self,
        operation: &'static str,
        f: F,
    ) -> BlockchainResult<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut last_error = String::from("no providers configured");
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, f(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, operation, error = %e, "RPC error, trying next provider");
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, operation, "RPC timeout, trying next provider");
                    last_error = format!("timed out after {:?}", self.timeout_duration);
                }
            }
        }
        metrics::record_rpc_failure(operation);
        Err(BlockchainError::ChainUnavailable {
            operation,
            reason: format!("All RPC providers failed: {}", last_error),
        })
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> BlockchainResult<u64> {
        self.with_failover("eth_chainId", |p| async move { p.get_chain_id().await })
            .await
    }

    async fn block_number(&self) -> BlockchainResult<u64> {
        self.with_failover("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
    }

    async fn get_nonce(&self, address: Address) -> BlockchainResult<u64> {
        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address).pending().await
        })
        .await
    }

    async fn get_mined_nonce(&self, address: Address) -> BlockchainResult<u64> {
        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address).latest().await
        })
        .await
    }

    async fn get_balance(&self, address: Address) -> BlockchainResult<U256> {
        self.with_failover("eth_getBalance", |p| async move {
            p.get_balance(address).await
        })
        .await
    }

    async fn estimate_fee(&self) -> BlockchainResult<FeeParams> {
        let to_fee_error = |e: BlockchainError| BlockchainError::FeeEstimationFailed(e.to_string());

        let gas_price = self
            .with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
            .map_err(to_fee_error)?;

        if !self.config.eip1559 {
            return Ok(FeeParams::Legacy { gas_price });
        }

        let priority = self
            .with_failover("eth_maxPriorityFeePerGas", |p| async move {
                p.get_max_priority_fee_per_gas().await
            })
            .await
            .map_err(to_fee_error)?;

        // eth_gasPrice already includes a tip; doubling it leaves headroom
        // for base fee growth over the next few blocks.
        Ok(FeeParams::Eip1559 {
            max_fee_per_gas: gas_price.saturating_mul(2).max(priority),
            max_priority_fee_per_gas: priority,
        })
    }

    async fn estimate_gas(&self, intent: &TxIntent) -> BlockchainResult<u64> {
        let request = intent.to_request();
        self.with_failover("eth_estimateGas", |p| {
            let request = request.clone();
            async move { p.estimate_gas(request).await }
        })
        .await
        .map_err(|e| BlockchainError::GasEstimationFailed(e.to_string()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> BlockchainResult<TxHash> {
        // Unlike reads, a node-level refusal is final: another provider
        // would see the same payload and the same state.
        let mut last_error = String::from("no providers configured");
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.send_raw_transaction(raw)).await {
                Ok(Ok(pending)) => return Ok(*pending.tx_hash()),
                Ok(Err(e)) => {
                    if let Some(payload) = e.as_error_resp() {
                        return Err(BlockchainError::SubmissionRejected {
                            context: "eth_sendRawTransaction".to_string(),
                            reason: payload.message.to_string(),
                        });
                    }
                    tracing::warn!(provider_idx = i, error = %e, "RPC error, trying next provider");
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, "RPC timeout, trying next provider");
                    last_error = format!("timed out after {:?}", self.timeout_duration);
                }
            }
        }
        metrics::record_rpc_failure("eth_sendRawTransaction");
        Err(BlockchainError::ChainUnavailable {
            operation: "eth_sendRawTransaction",
            reason: format!("All RPC providers failed: {}", last_error),
        })
    }

    async fn get_receipt(&self, tx_hash: TxHash) -> BlockchainResult<Option<ChainReceipt>> {
        let receipt = self
            .with_failover("eth_getTransactionReceipt", |p| async move {
                p.get_transaction_receipt(tx_hash).await
            })
            .await?;

        Ok(receipt.and_then(|r| {
            // A receipt without a block number is not mined yet.
            r.block_number.map(|block_number| ChainReceipt {
                tx_hash: r.transaction_hash,
                block_number,
                success: r.status(),
                gas_used: r.gas_used,
            })
        }))
    }

    async fn call(&self, to: Address, data: Bytes) -> BlockchainResult<Bytes> {
        let request = alloy::rpc::types::TransactionRequest::default()
            .with_to(to)
            .with_input(data);
        self.with_failover("eth_call", |p| {
            let request = request.clone();
            async move { p.call(request).await }
        })
        .await
    }
}

impl std::fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}
