//! Chain access implementation backed by the Alloy library.
//!
//! This module provides the concrete implementation of the ChainInterface
//! trait, supporting contract reads, transaction submission and confirmation
//! tracking on EVM-compatible blockchains. Supports multiple networks with a
//! single instance.

use crate::{ChainError, ChainInterface, ChainReceipt, ChainTransaction};
use alloy_network::EthereumWallet;
use alloy_primitives::{Bytes, TxHash};
use alloy_provider::{
	fillers::{ChainIdFiller, GasFiller, NonceFiller, SimpleNonceManager},
	DynProvider, PendingTransactionConfig, PendingTransactionError, Provider, ProviderBuilder,
};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types::TransactionRequest;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::layers::RetryBackoffLayer;
use async_trait::async_trait;
use pyre_types::NetworkRegistry;
use std::collections::HashMap;
use std::time::Duration;

impl From<ChainTransaction> for TransactionRequest {
	fn from(tx: ChainTransaction) -> Self {
		TransactionRequest::default()
			.to(tx.to)
			.input(tx.data.into())
			.value(tx.value)
	}
}

/// Alloy-based EVM chain implementation.
///
/// Holds one wallet-filled provider per configured network. The signer owns
/// the wallet address burns and mints are issued from; reads go through the
/// same providers.
pub struct AlloyChain {
	/// Alloy providers for each supported network.
	providers: HashMap<u64, DynProvider>,
}

impl AlloyChain {
	/// Creates a new AlloyChain instance.
	///
	/// Configures a provider for every network in the registry that carries
	/// an RPC URL, attaching the signer with the matching chain id.
	pub fn new(registry: &NetworkRegistry, signer: PrivateKeySigner) -> Result<Self, ChainError> {
		let chain_ids = registry.chain_ids();
		if chain_ids.is_empty() {
			return Err(ChainError::Network(
				"At least one network must be configured".to_string(),
			));
		}

		let mut providers = HashMap::new();

		for chain_id in chain_ids {
			let network = registry.require(chain_id)?;

			let http_url = network.http_url().ok_or_else(|| {
				ChainError::Network(format!("No RPC URL configured for network {}", chain_id))
			})?;

			let url = http_url.parse().map_err(|e| {
				ChainError::Network(format!("Invalid RPC URL for network {}: {}", chain_id, e))
			})?;

			let chain_signer = signer.clone().with_chain_id(Some(chain_id));
			let wallet = EthereumWallet::from(chain_signer);

			// Retry layer for transient network errors and rate limits.
			let retry_layer = RetryBackoffLayer::new(
				5,    // max_retry
				1000, // initial backoff in milliseconds
				10,   // compute units per second
			);
			let client = RpcClient::builder().layer(retry_layer).http(url);

			let provider = ProviderBuilder::new()
				.filler(NonceFiller::new(SimpleNonceManager::default()))
				.filler(GasFiller)
				.filler(ChainIdFiller::default())
				.wallet(wallet)
				.connect_client(client);

			provider
				.client()
				.set_poll_interval(Duration::from_secs(7));

			providers.insert(chain_id, provider.erased());
		}

		Ok(Self { providers })
	}

	/// Gets the provider for a specific chain ID.
	fn get_provider(&self, chain_id: u64) -> Result<&DynProvider, ChainError> {
		self.providers.get(&chain_id).ok_or_else(|| {
			ChainError::Network(format!("No provider configured for chain ID {}", chain_id))
		})
	}
}

#[async_trait]
impl ChainInterface for AlloyChain {
	async fn call(&self, tx: ChainTransaction) -> Result<Bytes, ChainError> {
		let provider = self.get_provider(tx.chain_id)?;
		let request: TransactionRequest = tx.into();

		provider
			.call(request)
			.await
			.map_err(|e| ChainError::Network(format!("Contract read failed: {}", e)))
	}

	async fn submit(&self, tx: ChainTransaction) -> Result<TxHash, ChainError> {
		let chain_id = tx.chain_id;
		let provider = self.get_provider(chain_id)?;
		let request: TransactionRequest = tx.into();

		tracing::debug!(
			chain_id,
			to = ?request.to,
			value = ?request.value,
			data_len = request.input.input().map(|d| d.len()).unwrap_or(0),
			"Sending transaction"
		);

		// The provider's wallet handles signing.
		let pending_tx = provider.send_transaction(request).await.map_err(|e| {
			tracing::error!(chain_id, error = %e, "Transaction submission failed");
			ChainError::Submission(format!("Failed to send transaction: {}", e))
		})?;

		Ok(*pending_tx.tx_hash())
	}

	async fn wait_for_confirmation(
		&self,
		tx_hash: TxHash,
		chain_id: u64,
		timeout: Duration,
	) -> Result<ChainReceipt, ChainError> {
		let provider = self.get_provider(chain_id)?;

		tracing::debug!(
			tx_hash = %tx_hash,
			chain_id,
			timeout_secs = timeout.as_secs(),
			"Waiting for confirmation"
		);

		let config = PendingTransactionConfig::new(tx_hash)
			.with_required_confirmations(1)
			.with_timeout(Some(timeout));

		let pending_tx = provider
			.watch_pending_transaction(config)
			.await
			.map_err(|e| match e {
				PendingTransactionError::TxWatcher(_) => ChainError::ConfirmationTimeout {
					tx_hash: format!("{}", tx_hash),
					timeout_secs: timeout.as_secs(),
				},
				PendingTransactionError::FailedToRegister => {
					ChainError::Network("Failed to register transaction watcher".to_string())
				},
				other => ChainError::Network(format!("Transaction watch failed: {}", other)),
			})?;

		let confirmed_hash = pending_tx.await.map_err(|e| match e {
			PendingTransactionError::TxWatcher(_) => ChainError::ConfirmationTimeout {
				tx_hash: format!("{}", tx_hash),
				timeout_secs: timeout.as_secs(),
			},
			other => ChainError::Network(format!("Failed to confirm transaction: {}", other)),
		})?;

		self.get_receipt(confirmed_hash, chain_id).await
	}

	async fn get_receipt(&self, tx_hash: TxHash, chain_id: u64) -> Result<ChainReceipt, ChainError> {
		let provider = self.get_provider(chain_id)?;

		match provider.get_transaction_receipt(tx_hash).await {
			Ok(Some(receipt)) => Ok(ChainReceipt {
				hash: receipt.transaction_hash,
				block_number: receipt.block_number.unwrap_or(0),
				success: receipt.status(),
			}),
			Ok(None) => Err(ChainError::ReceiptNotFound(format!("{}", tx_hash))),
			Err(e) => Err(ChainError::Network(format!(
				"Failed to get receipt on chain {}: {}",
				chain_id, e
			))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::{address, U256};
	use pyre_types::{ContractAddresses, NativeCurrency, NetworkConfig};
	use std::collections::HashMap;

	fn test_registry(rpc_urls: Vec<String>) -> NetworkRegistry {
		let mut networks = HashMap::new();
		networks.insert(
			137,
			NetworkConfig {
				rpc_urls,
				display_name: "Polygon".to_string(),
				native_currency: NativeCurrency {
					symbol: "POL".to_string(),
					decimals: 18,
				},
				explorer_url: "https://polygonscan.com".to_string(),
				indexer_url: None,
				contracts: ContractAddresses {
					nft: address!("85be9de7a369850a964616a2c04d79000d168dea"),
					burn_address: address!("4D483FB9Aa883956f05fb1CF0746B04e93170D13"),
					batch_operator: None,
					mint: None,
				},
			},
		);
		NetworkRegistry::new(networks)
	}

	fn test_signer() -> PrivateKeySigner {
		"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
			.parse()
			.unwrap()
	}

	#[tokio::test]
	async fn new_builds_provider_per_network() {
		let registry = test_registry(vec!["https://polygon-rpc.com".to_string()]);
		let chain = AlloyChain::new(&registry, test_signer()).unwrap();

		assert!(chain.providers.contains_key(&137));
		assert!(chain.get_provider(137).is_ok());
		assert!(matches!(
			chain.get_provider(1).unwrap_err(),
			ChainError::Network(_)
		));
	}

	#[tokio::test]
	async fn new_requires_an_rpc_url() {
		let registry = test_registry(vec![]);
		let result = AlloyChain::new(&registry, test_signer());

		assert!(matches!(result, Err(ChainError::Network(_))));
	}

	#[test]
	fn transaction_request_conversion_keeps_fields() {
		let tx = ChainTransaction {
			chain_id: 137,
			to: address!("85be9de7a369850a964616a2c04d79000d168dea"),
			data: vec![0x01, 0x02],
			value: U256::from(7u64),
		};

		let request: TransactionRequest = tx.into();
		assert_eq!(request.value, Some(U256::from(7u64)));
		assert_eq!(request.input.input().map(|d| d.len()), Some(2));
	}
}
