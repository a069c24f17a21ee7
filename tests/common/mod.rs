//! Shared utilities for integration tests: a scripted chain and a test signer.

#![allow(dead_code)]

use alloy::primitives::{keccak256, Address, Bytes, TxHash, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use withdrawal_orchestrator::blockchain::{
    BlockchainError, BlockchainResult, ChainClient, ChainReceipt, FeeParams, NameResolver,
    SignedTransaction, TransactionSigner, TxIntent, UnsignedTransaction,
};
use withdrawal_orchestrator::config::ServiceConfig;
use withdrawal_orchestrator::withdrawals::JobStore;
use withdrawal_orchestrator::WithdrawalService;

sol! {
    interface WarehouseAbi {
        function depositETH(address owner) external payable;
        function getETHBalance(address account) external view returns (uint256);
        function withdraw(address account, uint256 withdrawETH, address[] tokens) external;
    }
}

pub const CHAIN_ID: u64 = 1;
pub const TRANSFER_GAS: u64 = 21_000;
pub const CALL_GAS: u64 = 50_000;

pub fn eth(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

pub fn source() -> Address {
    Address::repeat_byte(0x5a)
}

pub fn warehouse() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn destination() -> Address {
    Address::repeat_byte(0xd0)
}

struct ChainState {
    head: u64,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    /// Transaction count as of the head block.
    mined: HashMap<Address, u64>,
    /// Each pending-count read advances the count, as if another sender
    /// shared the key.
    nonce_drift: bool,
    fees: FeeParams,
    fee_error: bool,
    vaults: HashMap<(Address, Address), U256>,
    receipts: HashMap<TxHash, ChainReceipt>,
    pool: Vec<(TxHash, UnsignedTransaction)>,
    auto_mine: bool,
    reject_next: Option<String>,
    /// Reject the send attempted once this many transactions were accepted.
    reject_at: Option<(usize, String)>,
    revert_withdrawals: bool,
    sent: Vec<UnsignedTransaction>,
}

/// In-process chain: applies transfers and warehouse calls encoded by `JsonSigner`.
pub struct MockChain {
    state: Mutex<ChainState>,
    down: AtomicBool,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                head: 100,
                balances: HashMap::new(),
                nonces: HashMap::new(),
                mined: HashMap::new(),
                nonce_drift: false,
                fees: FeeParams::Legacy {
                    gas_price: 1_000_000_000,
                },
                fee_error: false,
                vaults: HashMap::new(),
                receipts: HashMap::new(),
                pool: Vec::new(),
                auto_mine: true,
                reject_next: None,
                reject_at: None,
                revert_withdrawals: false,
                sent: Vec::new(),
            }),
            down: AtomicBool::new(false),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    pub fn set_balance(&self, address: Address, wei: U256) {
        self.state().balances.insert(address, wei);
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.state().balances.get(&address).copied().unwrap_or_default()
    }

    /// History: `nonce` transactions already mined for `address`.
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        let mut state = self.state();
        state.nonces.insert(address, nonce);
        state.mined.insert(address, nonce);
    }

    pub fn drift_nonce(&self, on: bool) {
        self.state().nonce_drift = on;
    }

    pub fn set_fees(&self, fees: FeeParams) {
        self.state().fees = fees;
    }

    pub fn fail_fee_estimation(&self, fail: bool) {
        self.state().fee_error = fail;
    }

    pub fn set_vault(&self, warehouse: Address, owner: Address, wei: U256) {
        self.state().vaults.insert((warehouse, owner), wei);
    }

    pub fn vault(&self, warehouse: Address, owner: Address) -> U256 {
        self.state()
            .vaults
            .get(&(warehouse, owner))
            .copied()
            .unwrap_or_default()
    }

    /// When off, sent transactions wait in the pool until `mine`.
    pub fn set_auto_mine(&self, on: bool) {
        self.state().auto_mine = on;
    }

    pub fn reject_next(&self, reason: &str) {
        self.state().reject_next = Some(reason.to_string());
    }

    /// Reject the send that follows `accepted` successful ones.
    pub fn reject_at(&self, accepted: usize, reason: &str) {
        self.state().reject_at = Some((accepted, reason.to_string()));
    }

    pub fn revert_withdrawals(&self, on: bool) {
        self.state().revert_withdrawals = on;
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Forget pooled transactions and their nonces, as if evicted.
    pub fn drop_pool(&self) {
        let mut state = self.state();
        let dropped: Vec<_> = state.pool.drain(..).collect();
        for (_, tx) in dropped {
            let nonce = state.nonces.entry(tx.from).or_insert(0);
            *nonce = (*nonce).min(tx.nonce);
        }
    }

    pub fn pool_len(&self) -> usize {
        self.state().pool.len()
    }

    pub fn pooled_hashes(&self) -> Vec<TxHash> {
        self.state().pool.iter().map(|(hash, _)| *hash).collect()
    }

    pub fn sent(&self) -> Vec<UnsignedTransaction> {
        self.state().sent.clone()
    }

    pub fn mine(&self) {
        let mut state = self.state();
        mine_block(&mut state);
    }

    fn check_up(&self, operation: &'static str) -> BlockchainResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BlockchainError::ChainUnavailable {
                operation,
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

fn mine_block(state: &mut ChainState) {
    state.head += 1;
    let block = state.head;
    let pool: Vec<_> = state.pool.drain(..).collect();

    for (hash, tx) in pool {
        let gas_used = if tx.input.is_empty() { TRANSFER_GAS } else { CALL_GAS };
        let gas_cost = U256::from(gas_used) * U256::from(tx.fees.max_price_per_gas());
        let success = execute(state, &tx);
        let mined = state.mined.entry(tx.from).or_insert(0);
        *mined = (*mined).max(tx.nonce + 1);

        let paid = if success { tx.value + gas_cost } else { gas_cost };
        let balance = state.balances.entry(tx.from).or_default();
        *balance = balance.saturating_sub(paid);

        state.receipts.insert(
            hash,
            ChainReceipt {
                tx_hash: hash,
                block_number: block,
                success,
                gas_used,
            },
        );
    }
}

fn execute(state: &mut ChainState, tx: &UnsignedTransaction) -> bool {
    if tx.input.is_empty() {
        *state.balances.entry(tx.to).or_default() += tx.value;
        return true;
    }
    if let Ok(call) = WarehouseAbi::depositETHCall::abi_decode(&tx.input) {
        *state.vaults.entry((tx.to, call.owner)).or_default() += tx.value;
        return true;
    }
    if let Ok(call) = WarehouseAbi::withdrawCall::abi_decode(&tx.input) {
        let held = state.vaults.get(&(tx.to, call.account)).copied().unwrap_or_default();
        if state.revert_withdrawals || held < call.withdrawETH {
            return false;
        }
        state.vaults.insert((tx.to, call.account), held - call.withdrawETH);
        *state.balances.entry(call.account).or_default() += call.withdrawETH;
        return true;
    }
    false
}

#[async_trait]
impl ChainClient for MockChain {
    async fn chain_id(&self) -> BlockchainResult<u64> {
        self.check_up("eth_chainId")?;
        Ok(CHAIN_ID)
    }

    async fn block_number(&self) -> BlockchainResult<u64> {
        self.check_up("eth_blockNumber")?;
        Ok(self.state().head)
    }

    async fn get_nonce(&self, address: Address) -> BlockchainResult<u64> {
        self.check_up("eth_getTransactionCount")?;
        let mut state = self.state();
        let nonce = state.nonces.get(&address).copied().unwrap_or(0);
        if state.nonce_drift {
            state.nonces.insert(address, nonce + 1);
        }
        Ok(nonce)
    }

    async fn get_mined_nonce(&self, address: Address) -> BlockchainResult<u64> {
        self.check_up("eth_getTransactionCount")?;
        Ok(self.state().mined.get(&address).copied().unwrap_or(0))
    }

    async fn get_balance(&self, address: Address) -> BlockchainResult<U256> {
        self.check_up("eth_getBalance")?;
        Ok(self.balance(address))
    }

    async fn estimate_fee(&self) -> BlockchainResult<FeeParams> {
        self.check_up("eth_gasPrice")?;
        let state = self.state();
        if state.fee_error {
            return Err(BlockchainError::FeeEstimationFailed("fee oracle offline".to_string()));
        }
        Ok(state.fees)
    }

    async fn estimate_gas(&self, _intent: &TxIntent) -> BlockchainResult<u64> {
        self.check_up("eth_estimateGas")?;
        Ok(CALL_GAS)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> BlockchainResult<TxHash> {
        self.check_up("eth_sendRawTransaction")?;
        let rejected = |reason: String| BlockchainError::SubmissionRejected {
            context: "eth_sendRawTransaction".to_string(),
            reason,
        };

        let tx: UnsignedTransaction =
            serde_json::from_slice(raw).map_err(|e| rejected(format!("undecodable: {e}")))?;
        let hash = keccak256(raw);

        let mut state = self.state();
        if let Some(reason) = state.reject_next.take() {
            return Err(rejected(reason));
        }
        if state.reject_at.as_ref().map(|(at, _)| *at) == Some(state.sent.len()) {
            if let Some((_, reason)) = state.reject_at.take() {
                return Err(rejected(reason));
            }
        }

        let replaced = state
            .pool
            .iter()
            .position(|(_, p)| p.from == tx.from && p.nonce == tx.nonce);
        match replaced {
            Some(pos) => {
                state.pool.remove(pos);
            }
            None => {
                let expected = state.nonces.get(&tx.from).copied().unwrap_or(0);
                if tx.nonce < expected {
                    return Err(rejected("nonce too low".to_string()));
                }
                if tx.nonce > expected {
                    return Err(rejected(format!("nonce gap: expected {expected}")));
                }
                state.nonces.insert(tx.from, expected + 1);
            }
        }

        state.sent.push(tx.clone());
        state.pool.push((hash, tx));
        if state.auto_mine {
            mine_block(&mut state);
        }
        Ok(hash)
    }

    async fn get_receipt(&self, tx_hash: TxHash) -> BlockchainResult<Option<ChainReceipt>> {
        self.check_up("eth_getTransactionReceipt")?;
        Ok(self.state().receipts.get(&tx_hash).cloned())
    }

    async fn call(&self, to: Address, data: Bytes) -> BlockchainResult<Bytes> {
        self.check_up("eth_call")?;
        let call = WarehouseAbi::getETHBalanceCall::abi_decode(&data).map_err(|e| {
            BlockchainError::ChainUnavailable {
                operation: "eth_call",
                reason: e.to_string(),
            }
        })?;
        let held = self.vault(to, call.account);
        Ok(Bytes::from(held.to_be_bytes::<32>().to_vec()))
    }
}

/// Signer whose raw payload is the JSON of the unsigned transaction.
pub struct JsonSigner {
    address: Address,
}

impl JsonSigner {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl TransactionSigner for JsonSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> BlockchainResult<SignedTransaction> {
        if tx.from != self.address {
            return Err(BlockchainError::SignerMismatch {
                expected: tx.from,
                actual: self.address,
            });
        }
        let raw = serde_json::to_vec(tx).map_err(|e| BlockchainError::Wallet(e.to_string()))?;
        Ok(SignedTransaction {
            hash: keccak256(&raw),
            raw: raw.into(),
            request: tx.clone(),
        })
    }
}

/// Config tuned for fast tests: 1s confirmation timeout, 10ms polling.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.blockchain.chain_id = CHAIN_ID;
    config.blockchain.gas_price_multiplier = 1.0;
    config.blockchain.confirmation_blocks = 1;
    config.transactions.confirmation_timeout_secs = 1;
    config.transactions.poll_interval_ms = 10;
    config.warehouse.job_store_path = None;
    config.warehouse.default_address = Some(warehouse().to_string());
    config.resolver.ens_enabled = false;
    config
}

pub fn service_with(chain: Arc<MockChain>, store: JobStore, config: &ServiceConfig) -> WithdrawalService {
    let mut names = HashMap::new();
    names.insert("treasury.eth".to_string(), destination());
    let resolver = Arc::new(NameResolver::with_names(names));
    WithdrawalService::new(chain, resolver, store, config).unwrap()
}

pub fn service(chain: Arc<MockChain>) -> WithdrawalService {
    service_with(chain, JobStore::in_memory(), &test_config())
}
