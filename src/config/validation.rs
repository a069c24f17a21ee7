//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, multipliers sane)
//! - Check that every configured address and URL parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::blockchain::resolver::parse_address;
use crate::config::schema::ServiceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }

    let chain = &config.blockchain;
    if url::Url::parse(&chain.rpc_url).is_err() {
        errors.push(ValidationError::new(
            "blockchain.rpc_url",
            format!("'{}' is not a URL", chain.rpc_url),
        ));
    }
    for (i, failover) in chain.failover_urls.iter().enumerate() {
        if url::Url::parse(failover).is_err() {
            errors.push(ValidationError::new(
                format!("blockchain.failover_urls[{}]", i),
                format!("'{}' is not a URL", failover),
            ));
        }
    }
    if chain.chain_id == 0 {
        errors.push(ValidationError::new("blockchain.chain_id", "must be non-zero"));
    }
    if chain.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "blockchain.rpc_timeout_secs",
            "must be greater than zero",
        ));
    }
    if !(chain.gas_price_multiplier >= 1.0 && chain.gas_price_multiplier <= 10.0) {
        errors.push(ValidationError::new(
            "blockchain.gas_price_multiplier",
            "must be between 1.0 and 10.0",
        ));
    }
    if chain.max_gas_price_gwei == 0 {
        errors.push(ValidationError::new(
            "blockchain.max_gas_price_gwei",
            "must be greater than zero",
        ));
    }

    let tx = &config.transactions;
    if tx.default_gas_limit < 21_000 {
        errors.push(ValidationError::new(
            "transactions.default_gas_limit",
            "must be at least 21000",
        ));
    }
    if tx.confirmation_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "transactions.confirmation_timeout_secs",
            "must be greater than zero",
        ));
    }
    if tx.poll_interval_ms == 0 || tx.poll_interval_ms >= tx.confirmation_timeout_secs * 1000 {
        errors.push(ValidationError::new(
            "transactions.poll_interval_ms",
            "must be positive and shorter than the confirmation timeout",
        ));
    }
    if tx.confirmation_timeout_secs >= config.server.request_timeout_secs {
        errors.push(ValidationError::new(
            "transactions.confirmation_timeout_secs",
            "must be shorter than server.request_timeout_secs",
        ));
    }
    if tx.replacement_fee_bump_percent < 10 {
        errors.push(ValidationError::new(
            "transactions.replacement_fee_bump_percent",
            "nodes reject replacements below a 10% bump",
        ));
    }

    if let Some(address) = &config.warehouse.default_address {
        if parse_address(address).is_err() {
            errors.push(ValidationError::new(
                "warehouse.default_address",
                format!("'{}' is not a valid address", address),
            ));
        }
    }
    if config.warehouse.resume_interval_ms == 0 {
        errors.push(ValidationError::new(
            "warehouse.resume_interval_ms",
            "must be greater than zero",
        ));
    }

    if config.resolver.ens_enabled && parse_address(&config.resolver.ens_registry).is_err() {
        errors.push(ValidationError::new(
            "resolver.ens_registry",
            format!("'{}' is not a valid address", config.resolver.ens_registry),
        ));
    }
    for (name, address) in &config.resolver.names {
        if parse_address(address).is_err() {
            errors.push(ValidationError::new(
                format!("resolver.names.{}", name),
                format!("'{}' is not a valid address", address),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if config.retries.base_delay_ms == 0 || config.retries.base_delay_ms > config.retries.max_delay_ms
    {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must be positive and no larger than retries.max_delay_ms",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
