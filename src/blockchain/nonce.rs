//! Per-address nonce allocation.
//!
//! The chain's pending count is the source of truth; the local reservation
//! only covers transactions this process has handed out but the node has not
//! seen yet. Issuance for one address is serialized behind an async mutex so
//! concurrent requests never receive the same nonce, while different
//! addresses proceed independently.

use alloy::primitives::Address;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::blockchain::client::ChainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult};

/// Snapshot returned by [`NonceManager::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NonceStatus {
    pub chain_nonce: u64,
    pub next_available: u64,
    /// No local reservation is ahead of the chain.
    pub is_valid: bool,
}

/// A claimed nonce compared against one chain read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceCheck {
    pub chain_nonce: u64,
    pub is_valid: bool,
}

/// Source of truth for the next usable nonce per address.
pub struct NonceManager {
    client: Arc<dyn ChainClient>,
    /// Next nonce this process will hand out, if it has handed any out.
    reserved: DashMap<Address, Arc<Mutex<Option<u64>>>>,
}

impl NonceManager {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            reserved: DashMap::new(),
        }
    }

    fn slot(&self, address: Address) -> Arc<Mutex<Option<u64>>> {
        // Clone the Arc out so the DashMap shard lock is not held across awaits.
        self.reserved
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Reserve and return the next nonce for `address`.
    pub async fn next_nonce(&self, address: Address) -> BlockchainResult<u64> {
        let slot = self.slot(address);
        let mut reserved = slot.lock().await;

        let chain = self.client.get_nonce(address).await?;
        let next = reserved.map_or(chain, |local| local.max(chain));
        *reserved = Some(next + 1);

        tracing::debug!(address = %address, chain_nonce = chain, nonce = next, "Nonce reserved");
        Ok(next)
    }

    /// The nonce `next_nonce` would return, without reserving it.
    pub async fn peek(&self, address: Address) -> BlockchainResult<u64> {
        let slot = self.slot(address);
        let reserved = slot.lock().await;

        let chain = self.client.get_nonce(address).await?;
        Ok(reserved.map_or(chain, |local| local.max(chain)))
    }

    /// Valid only if `nonce` equals the chain's current pending nonce.
    pub async fn validate(&self, address: Address, nonce: u64) -> BlockchainResult<NonceCheck> {
        let chain_nonce = self.client.get_nonce(address).await?;
        Ok(NonceCheck {
            chain_nonce,
            is_valid: nonce == chain_nonce,
        })
    }

    /// Claim a caller-supplied nonce.
    ///
    /// The nonce must be exactly the next usable one; anything else would
    /// either collide with a reservation or leave a gap.
    pub async fn reserve_exact(&self, address: Address, nonce: u64) -> BlockchainResult<()> {
        let slot = self.slot(address);
        let mut reserved = slot.lock().await;

        let chain = self.client.get_nonce(address).await?;
        let expected = reserved.map_or(chain, |local| local.max(chain));
        if nonce != expected {
            return Err(BlockchainError::NonceStale {
                address,
                claimed: nonce,
                expected,
            });
        }

        *reserved = Some(nonce + 1);
        tracing::debug!(address = %address, nonce, "Nonce override reserved");
        Ok(())
    }

    /// Hand back a reservation that never reached the chain.
    ///
    /// Only the most recent reservation can be returned; older ones stay
    /// consumed and the chain query on the next call closes any gap.
    pub async fn release(&self, address: Address, nonce: u64) {
        let slot = self.slot(address);
        let mut reserved = slot.lock().await;

        if *reserved == Some(nonce + 1) {
            *reserved = Some(nonce);
            tracing::debug!(address = %address, nonce, "Nonce released");
        } else {
            tracing::debug!(
                address = %address,
                nonce,
                reserved = ?*reserved,
                "Nonce release skipped, later reservation exists"
            );
        }
    }

    /// Chain nonce, next available nonce, and whether they agree.
    pub async fn status(&self, address: Address) -> BlockchainResult<NonceStatus> {
        let slot = self.slot(address);
        let reserved = slot.lock().await;

        let chain = self.client.get_nonce(address).await?;
        let next_available = reserved.map_or(chain, |local| local.max(chain));
        Ok(NonceStatus {
            chain_nonce: chain,
            next_available,
            is_valid: next_available == chain,
        })
    }
}
