//! Wallet provider implementations.
//!
//! This module provides a concrete implementation of the WalletProvider
//! trait backed by a local private key, suitable for development, testing
//! and headless environments where no external wallet is present.

use crate::{ProviderError, ProviderEvent, WalletProvider};
use alloy_primitives::Address;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Local key wallet using Alloy's signer.
///
/// Manages a private key in process and uses it to answer account and
/// message-signing requests. Being a single fixed key, it never emits
/// account-change notifications of its own; the event channel exists so the
/// connector's subscription contract is uniform across providers.
#[derive(Debug)]
pub struct LocalWallet {
	signer: PrivateKeySigner,
	chain_id: u64,
	events: broadcast::Sender<ProviderEvent>,
}

impl LocalWallet {
	/// Creates a new LocalWallet from a hex-encoded private key.
	///
	/// The private key may carry a 0x prefix or not.
	pub fn new(private_key_hex: &str, chain_id: u64) -> Result<Self, ProviderError> {
		let signer = private_key_hex
			.parse::<PrivateKeySigner>()
			.map_err(|e| ProviderError::InvalidKey(format!("Invalid private key: {}", e)))?;
		let (events, _) = broadcast::channel(16);

		Ok(Self {
			signer,
			chain_id,
			events,
		})
	}

	/// The address controlled by this wallet.
	pub fn address(&self) -> Address {
		self.signer.address()
	}
}

#[async_trait]
impl WalletProvider for LocalWallet {
	async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
		Ok(vec![self.signer.address()])
	}

	async fn chain_id(&self) -> Result<u64, ProviderError> {
		Ok(self.chain_id)
	}

	async fn sign_message(&self, address: Address, message: &[u8]) -> Result<String, ProviderError> {
		if address != self.signer.address() {
			return Err(ProviderError::Other(format!(
				"Account {} is not managed by this wallet",
				address
			)));
		}

		// EIP-191 prefixing is handled by the signer.
		let signature = self
			.signer
			.sign_message(message)
			.await
			.map_err(|e| ProviderError::Other(format!("Failed to sign message: {}", e)))?;

		Ok(format!("0x{}", hex::encode(signature.as_bytes())))
	}

	fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
		self.events.subscribe()
	}
}
