//! Network configuration types for multi-chain burn and mint operations.
//!
//! This module defines the configuration structures for managing
//! network-specific settings, including RPC URLs, contract addresses and
//! capability flags across different blockchain networks. The registry is
//! built once at startup and only ever read afterwards.

use alloy_primitives::Address;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by network registry lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
	/// The chain id is not present in the registry at all.
	#[error("Chain {0} is not configured")]
	UnsupportedChain(u64),
	/// The chain is configured but lacks the contract role needed for the
	/// requested operation (e.g. no batch operator deployed).
	#[error("Chain {chain_id} has no {capability} configured")]
	CapabilityUnavailable {
		chain_id: u64,
		capability: &'static str,
	},
}

/// Native currency metadata for a network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NativeCurrency {
	pub symbol: String,
	pub decimals: u8,
}

/// Contract addresses for the logical roles a network may carry.
///
/// Optional roles are genuinely optional: an absent `batch_operator` means
/// batch burns are unsupported on that network, an absent `mint` means the
/// network has no mint-capable contract. Absence is represented with `None`,
/// never with a sentinel address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContractAddresses {
	/// Primary ERC-721 collection contract.
	pub nft: Address,
	/// Sink address burns transfer to.
	pub burn_address: Address,
	/// Operator contract able to move many tokens in one transaction.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub batch_operator: Option<Address>,
	/// Mint-capable contract, when the network supports minting.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mint: Option<Address>,
}

/// Configuration for a single blockchain network.
///
/// Contains all the network-specific settings required to interact with a
/// particular chain: RPC endpoints (first entry preferred, later entries are
/// fallbacks), explorer and indexer URLs, and the contract address roles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkConfig {
	pub rpc_urls: Vec<String>,
	pub display_name: String,
	pub native_currency: NativeCurrency,
	pub explorer_url: String,
	/// Base URL of the NFT indexing service for this network.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub indexer_url: Option<String>,
	pub contracts: ContractAddresses,
}

impl NetworkConfig {
	/// Get the first available RPC URL.
	pub fn http_url(&self) -> Option<&str> {
		self.rpc_urls.first().map(|s| s.as_str())
	}
}

/// Networks configuration mapping chain IDs to their configurations.
pub type NetworksConfig = HashMap<u64, NetworkConfig>;

/// Immutable lookup table over the configured networks.
///
/// Every other component resolves chain-specific data through this registry;
/// nothing mutates it after construction.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
	networks: NetworksConfig,
}

impl NetworkRegistry {
	pub fn new(networks: NetworksConfig) -> Self {
		Self { networks }
	}

	/// Looks up a network, returning `None` for unknown chains.
	pub fn get(&self, chain_id: u64) -> Option<&NetworkConfig> {
		self.networks.get(&chain_id)
	}

	/// Looks up a network, failing with `UnsupportedChain` for unknown chains.
	pub fn require(&self, chain_id: u64) -> Result<&NetworkConfig, NetworkError> {
		self.networks
			.get(&chain_id)
			.ok_or(NetworkError::UnsupportedChain(chain_id))
	}

	/// Whether the chain carries a batch operator contract.
	pub fn supports_batch(&self, chain_id: u64) -> bool {
		self.get(chain_id)
			.is_some_and(|n| n.contracts.batch_operator.is_some())
	}

	/// Resolves the batch operator address for a chain.
	pub fn batch_operator(&self, chain_id: u64) -> Result<Address, NetworkError> {
		self.require(chain_id)?
			.contracts
			.batch_operator
			.ok_or(NetworkError::CapabilityUnavailable {
				chain_id,
				capability: "batch operator",
			})
	}

	/// Resolves the mint contract address for a chain.
	pub fn mint_contract(&self, chain_id: u64) -> Result<Address, NetworkError> {
		self.require(chain_id)?
			.contracts
			.mint
			.ok_or(NetworkError::CapabilityUnavailable {
				chain_id,
				capability: "mint contract",
			})
	}

	/// All configured chain ids.
	pub fn chain_ids(&self) -> Vec<u64> {
		self.networks.keys().copied().collect()
	}

	/// Explorer link for a transaction hash, if the chain is configured.
	pub fn explorer_tx_url(&self, chain_id: u64, tx_hash: &str) -> Option<String> {
		self.get(chain_id).map(|n| {
			format!(
				"{}/tx/{}",
				n.explorer_url.trim_end_matches('/'),
				crate::utils::with_0x_prefix(tx_hash)
			)
		})
	}
}

/// Helper function to deserialize network configurations from TOML.
///
/// Chain ids arrive as string keys in TOML (tables cannot have numeric keys)
/// and are converted to u64 keys for internal use.
///
/// # Errors
///
/// Returns a deserialization error if a chain id key cannot be parsed as a
/// u64, or if the underlying network configuration is invalid.
pub fn deserialize_networks<'de, D>(deserializer: D) -> Result<NetworksConfig, D::Error>
where
	D: Deserializer<'de>,
{
	let string_map: HashMap<String, NetworkConfig> = HashMap::deserialize(deserializer)?;
	let mut result = HashMap::new();

	for (key, value) in string_map {
		let chain_id = key
			.parse::<u64>()
			.map_err(|e| serde::de::Error::custom(format!("Invalid chain_id '{}': {}", key, e)))?;
		result.insert(chain_id, value);
	}

	Ok(result)
}
