//! Chain access module for the pyre burn/mint client.
//!
//! This module handles contract reads, transaction submission and
//! confirmation tracking on EVM-compatible chains. It provides an
//! abstraction over the underlying RPC machinery so orchestration logic can
//! be tested against fakes, plus a typed service exposing the specific
//! contract operations the client performs.

use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use pyre_types::NetworkRegistry;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod contracts;

/// Re-export implementations
pub mod implementations {
	pub mod alloy;
}

pub use contracts::OnchainTokenConfig;
pub use implementations::alloy::AlloyChain;

/// Default bound on a confirmation wait.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that can occur during chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
	/// Error that occurs during network communication.
	#[error("Network error: {0}")]
	Network(String),
	/// The transaction could not be submitted at all.
	#[error("Transaction submission failed: {0}")]
	Submission(String),
	/// The transaction was included but execution failed.
	#[error("Transaction {0} reverted")]
	Reverted(String),
	/// The confirmation wait hit its bound. The transaction was submitted
	/// and may still land later; callers must not assume it was abandoned.
	#[error("Confirmation of {tx_hash} timed out after {timeout_secs}s; the transaction may still complete")]
	ConfirmationTimeout { tx_hash: String, timeout_secs: u64 },
	/// No receipt is available for the hash.
	#[error("Transaction not found: {0}")]
	ReceiptNotFound(String),
	/// Return data did not decode as expected.
	#[error("ABI error: {0}")]
	Abi(String),
	/// Network registry lookup failure.
	#[error(transparent)]
	Registry(#[from] pyre_types::NetworkError),
}

/// A transaction (or read call) bound for a specific chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
	pub chain_id: u64,
	pub to: Address,
	pub data: Vec<u8>,
	/// Native currency attached to the call.
	pub value: U256,
}

/// Execution outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
	pub hash: TxHash,
	pub block_number: u64,
	pub success: bool,
}

/// Trait defining the interface for chain access implementations.
///
/// Implementations own the RPC connections and signing; callers express
/// work as [`ChainTransaction`]s and receive hashes and receipts back.
#[async_trait]
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait ChainInterface: Send + Sync {
	/// Executes a contract read without submitting a transaction.
	async fn call(&self, tx: ChainTransaction) -> Result<Bytes, ChainError>;

	/// Signs and submits a transaction, returning its hash.
	async fn submit(&self, tx: ChainTransaction) -> Result<TxHash, ChainError>;

	/// Blocks until the transaction is confirmed, bounded by `timeout`.
	///
	/// A receipt is returned whether execution succeeded or reverted; the
	/// caller inspects `success`.
	async fn wait_for_confirmation(
		&self,
		tx_hash: TxHash,
		chain_id: u64,
		timeout: Duration,
	) -> Result<ChainReceipt, ChainError>;

	/// Retrieves the receipt for a transaction if available.
	async fn get_receipt(&self, tx_hash: TxHash, chain_id: u64) -> Result<ChainReceipt, ChainError>;
}

/// Typed contract operations over a chain implementation.
///
/// Resolves contract addresses through the network registry, encodes calls,
/// and decodes return data into domain values. This is the surface the
/// inventory and orchestration layers consume.
pub struct ChainService {
	implementation: Arc<dyn ChainInterface>,
	registry: Arc<NetworkRegistry>,
	confirmation_timeout: Duration,
}

impl ChainService {
	pub fn new(implementation: Arc<dyn ChainInterface>, registry: Arc<NetworkRegistry>) -> Self {
		Self {
			implementation,
			registry,
			confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
		}
	}

	pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
		self.confirmation_timeout = timeout;
		self
	}

	pub fn registry(&self) -> &NetworkRegistry {
		&self.registry
	}

	/// Whether `operator` may move every token `owner` holds in `collection`.
	pub async fn is_approved_for_all(
		&self,
		chain_id: u64,
		collection: Address,
		owner: Address,
		operator: Address,
	) -> Result<bool, ChainError> {
		let call = contracts::is_approved_for_all_call(chain_id, collection, owner, operator);
		let data = self.implementation.call(call).await?;
		contracts::decode_is_approved(&data)
	}

	/// Token ids `owner` holds in `collection`.
	pub async fn tokens_of_owner(
		&self,
		chain_id: u64,
		collection: Address,
		owner: Address,
	) -> Result<Vec<U256>, ChainError> {
		let call = contracts::tokens_of_owner_call(chain_id, collection, owner);
		let data = self.implementation.call(call).await?;
		contracts::decode_token_ids(&data)
	}

	/// Current owner of a token.
	pub async fn owner_of(
		&self,
		chain_id: u64,
		collection: Address,
		token_id: U256,
	) -> Result<Address, ChainError> {
		let call = contracts::owner_of_call(chain_id, collection, token_id);
		let data = self.implementation.call(call).await?;
		contracts::decode_owner(&data)
	}

	/// Metadata URI of a token.
	pub async fn token_uri(
		&self,
		chain_id: u64,
		collection: Address,
		token_id: U256,
	) -> Result<String, ChainError> {
		let call = contracts::token_uri_call(chain_id, collection, token_id);
		let data = self.implementation.call(call).await?;
		contracts::decode_token_uri(&data)
	}

	/// On-chain mint configuration for a token id, read fresh.
	pub async fn token_config(
		&self,
		chain_id: u64,
		contract: Address,
		token_id: U256,
	) -> Result<OnchainTokenConfig, ChainError> {
		let call = contracts::token_configs_call(chain_id, contract, token_id);
		let data = self.implementation.call(call).await?;
		contracts::decode_token_config(&data)
	}

	/// All token ids the mint contract knows about.
	pub async fn all_token_ids(
		&self,
		chain_id: u64,
		contract: Address,
	) -> Result<Vec<U256>, ChainError> {
		let call = contracts::all_token_ids_call(chain_id, contract);
		let data = self.implementation.call(call).await?;
		contracts::decode_token_ids(&data)
	}

	/// Signs and submits a write, returning its hash without waiting.
	pub async fn submit(&self, tx: ChainTransaction) -> Result<TxHash, ChainError> {
		let chain_id = tx.chain_id;
		let tx_hash = self.implementation.submit(tx).await?;
		tracing::debug!(tx_hash = %tx_hash, chain_id, "Transaction submitted");
		Ok(tx_hash)
	}

	/// Blocks until `tx_hash` confirms, bounded by the configured timeout.
	///
	/// A receipt with failed execution status surfaces as
	/// [`ChainError::Reverted`], never as success.
	pub async fn confirm(&self, tx_hash: TxHash, chain_id: u64) -> Result<ChainReceipt, ChainError> {
		let receipt = self
			.implementation
			.wait_for_confirmation(tx_hash, chain_id, self.confirmation_timeout)
			.await?;

		if !receipt.success {
			tracing::warn!(tx_hash = %receipt.hash, chain_id, "Transaction reverted");
			return Err(ChainError::Reverted(format!("{}", receipt.hash)));
		}

		tracing::info!(
			tx_hash = %receipt.hash,
			block_number = receipt.block_number,
			chain_id,
			"Transaction confirmed"
		);
		Ok(receipt)
	}

	/// Convenience for writes with no work between submission and wait.
	pub async fn submit_and_confirm(&self, tx: ChainTransaction) -> Result<ChainReceipt, ChainError> {
		let chain_id = tx.chain_id;
		let tx_hash = self.submit(tx).await?;
		self.confirm(tx_hash, chain_id).await
	}
}
