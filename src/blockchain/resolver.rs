//! Address parsing and name resolution.
//!
//! # Responsibilities
//! - Validate hex addresses, enforcing EIP-55 checksums on mixed-case input
//! - Resolve `.eth` names from a static table or the ENS registry
//!
//! Everything here runs before any balance, nonce or fee query, so a bad
//! address never reaches the chain.

use alloy::primitives::{keccak256, Address, B256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::blockchain::client::ChainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult};
use crate::config::ResolverConfig;

sol! {
    interface IEnsRegistry {
        function resolver(bytes32 node) external view returns (address);
    }

    interface IEnsAddrResolver {
        function addr(bytes32 node) external view returns (address);
    }
}

/// Parse a `0x`-prefixed hex address.
///
/// All-lowercase and all-uppercase input is accepted as is; mixed case must
/// carry a valid EIP-55 checksum.
pub fn parse_address(input: &str) -> BlockchainResult<Address> {
    let trimmed = input.trim();
    let invalid = || BlockchainError::InvalidAddress(trimmed.to_string());

    let hex = trimmed.strip_prefix("0x").ok_or_else(invalid)?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(trimmed, None).map_err(|_| invalid())
    } else {
        Address::from_str(trimmed).map_err(|_| invalid())
    }
}

/// True when the input should go through name resolution instead of hex parsing.
pub fn is_name(input: &str) -> bool {
    let trimmed = input.trim();
    !trimmed.starts_with("0x") && trimmed.contains('.')
}

/// EIP-137 namehash.
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(node.as_slice());
        buf[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(buf);
    }
    node
}

/// Name → address capability (ENS-equivalent).
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolve a human-readable name.
    async fn resolve(&self, name: &str) -> BlockchainResult<Address>;

    /// Resolve a name or parse a hex address, whichever the input is.
    async fn resolve_input(&self, input: &str) -> BlockchainResult<Address> {
        if is_name(input) {
            self.resolve(input.trim()).await
        } else {
            parse_address(input)
        }
    }
}

/// Static table first, then the ENS registry when enabled.
pub struct NameResolver {
    names: HashMap<String, Address>,
    ens: Option<(Arc<dyn ChainClient>, Address)>,
}

impl NameResolver {
    /// Build from configuration.
    pub fn from_config(
        config: &ResolverConfig,
        client: Arc<dyn ChainClient>,
    ) -> BlockchainResult<Self> {
        let mut names = HashMap::new();
        for (name, address) in &config.names {
            names.insert(name.to_lowercase(), parse_address(address)?);
        }

        let ens = if config.ens_enabled {
            Some((client, parse_address(&config.ens_registry)?))
        } else {
            None
        };

        Ok(Self { names, ens })
    }

    /// A resolver with only a static table.
    pub fn with_names(names: HashMap<String, Address>) -> Self {
        Self {
            names: names
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
            ens: None,
        }
    }

    async fn resolve_ens(
        client: &dyn ChainClient,
        registry: Address,
        name: &str,
    ) -> BlockchainResult<Address> {
        let node = namehash(name);
        let failed = |reason: String| BlockchainError::Resolution {
            name: name.to_string(),
            reason,
        };

        let call = IEnsRegistry::resolverCall { node };
        let output = client.call(registry, call.abi_encode().into()).await?;
        let resolver = IEnsRegistry::resolverCall::abi_decode_returns(&output)
            .map_err(|e| failed(format!("bad registry response: {}", e)))?;
        if resolver.is_zero() {
            return Err(failed("no resolver set".to_string()));
        }

        let call = IEnsAddrResolver::addrCall { node };
        let output = client.call(resolver, call.abi_encode().into()).await?;
        let address = IEnsAddrResolver::addrCall::abi_decode_returns(&output)
            .map_err(|e| failed(format!("bad resolver response: {}", e)))?;
        if address.is_zero() {
            return Err(failed("name has no address record".to_string()));
        }
        Ok(address)
    }
}

#[async_trait]
impl AddressResolver for NameResolver {
    async fn resolve(&self, name: &str) -> BlockchainResult<Address> {
        let key = name.to_lowercase();
        if let Some(address) = self.names.get(&key) {
            return Ok(*address);
        }

        match &self.ens {
            Some((client, registry)) if key.ends_with(".eth") => {
                let address = Self::resolve_ens(client.as_ref(), *registry, &key).await?;
                tracing::info!(name = %key, address = %address, "ENS name resolved");
                Ok(address)
            }
            _ => Err(BlockchainError::Resolution {
                name: name.to_string(),
                reason: "unknown name".to_string(),
            }),
        }
    }
}
