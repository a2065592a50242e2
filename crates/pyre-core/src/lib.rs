//! Transaction orchestration module for the pyre burn/mint client.
//!
//! This module drives approval, single and batch burn, and mint operations
//! end to end: submit the contract write, block until the chain confirms
//! it, then register the result with the backend. Each action advances a
//! phase state machine callers can observe, and the same token never has
//! two actions in flight at once.
//!
//! The three pipeline steps are strictly ordered per action. A reverted or
//! timed-out transaction is fatal to its action and never retried
//! automatically -- resubmission is a new, explicit call -- because blindly
//! retrying a write risks duplicate on-chain effects. A failed registration
//! after a confirmed transaction is the one retryable step, since the
//! on-chain effect is final and idempotent to re-report.

use alloy_primitives::{Address, U256};
use pyre_api::{ApiClient, ApiError};
use pyre_chain::{ChainError, ChainService, ChainTransaction};
use pyre_inventory::CollectionInventory;
use pyre_session::{SessionEvent, SessionLifecycleManager};
use pyre_types::{
	without_0x_prefix, BurnProof, BurnRecord, BurnRequest, MintResponse, NetworkError,
	RegisterBurnRequest, Session, TransactionPhase,
};
use pyre_wallet::{ConnectorEvent, WalletConnector};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::instrument;

pub mod state;

pub use state::{ActionGuard, ActionKey, PhaseError, PhaseEvent, PhaseTracker};

/// Burns required before minting unlocks.
pub const DEFAULT_MINT_THRESHOLD: u32 = 2;

/// Errors raised by orchestration operations.
///
/// Every variant maps to a distinct user-facing failure; callers render
/// them rather than the raw underlying errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
	/// The session is gone; nothing was submitted.
	#[error("Session has expired, log in again")]
	SessionExpired,
	/// The active chain has no batch operator configured.
	#[error("Batch operations are not supported on chain {0}")]
	BatchUnsupported(u64),
	/// The collection has not granted the batch operator transfer rights.
	#[error("Collection {0} requires approval before batch burning")]
	ApprovalRequired(Address),
	/// The token already has an action in flight.
	#[error("A transaction for this token is already in progress")]
	ActionInFlight,
	/// The token's on-chain configuration does not allow minting.
	#[error("Token {0} is not open for minting")]
	MintInactive(String),
	/// The backend refused to authorize the mint.
	#[error("Mint authorization failed: {0}")]
	Auth(String),
	#[error("Burn requires at least one token id")]
	EmptyBatch,
	#[error("Mint quantity must be at least 1")]
	InvalidQuantity,
	#[error("Invalid token id: {0}")]
	InvalidTokenId(String),
	#[error(transparent)]
	Network(NetworkError),
	#[error("Transaction submission failed: {0}")]
	Submission(String),
	/// The write landed on chain but execution failed.
	#[error("Transaction {0} reverted on chain")]
	Reverted(String),
	/// The confirmation wait hit its bound; the transaction may still land.
	#[error("Confirmation of {tx_hash} timed out after {timeout_secs}s; it may still complete")]
	ConfirmationTimeout { tx_hash: String, timeout_secs: u64 },
	/// The on-chain effect happened but the backend was not told. Retry
	/// with the same transaction hash.
	#[error("Transaction {tx_hash} confirmed but registration failed: {source}")]
	Registration {
		tx_hash: String,
		#[source]
		source: ApiError,
	},
	#[error(transparent)]
	Phase(PhaseError),
	#[error("Chain error: {0}")]
	Chain(String),
}

fn map_chain_error(err: ChainError) -> OrchestratorError {
	match err {
		ChainError::Submission(msg) => OrchestratorError::Submission(msg),
		ChainError::Reverted(hash) => OrchestratorError::Reverted(hash),
		ChainError::ConfirmationTimeout {
			tx_hash,
			timeout_secs,
		} => OrchestratorError::ConfirmationTimeout {
			tx_hash,
			timeout_secs,
		},
		ChainError::Registry(e) => OrchestratorError::Network(e),
		other => OrchestratorError::Chain(other.to_string()),
	}
}

/// Outcome of an approval request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
	/// The operator already held approval; no transaction was submitted.
	AlreadyApproved,
	Approved { tx_hash: String },
}

/// Outcome of a mint.
#[derive(Debug, Clone)]
pub struct MintOutcome {
	pub tx_hash: String,
	pub backend: MintResponse,
}

/// Drives burn and mint pipelines against the chain and the backend.
pub struct TransactionOrchestrator {
	chain: Arc<ChainService>,
	api: Arc<ApiClient>,
	session: SessionLifecycleManager,
	phases: Arc<PhaseTracker>,
	burns_completed: AtomicU32,
	mint_threshold: u32,
}

impl TransactionOrchestrator {
	pub fn new(
		chain: Arc<ChainService>,
		api: Arc<ApiClient>,
		session: SessionLifecycleManager,
	) -> Self {
		Self {
			chain,
			api,
			session,
			phases: Arc::new(PhaseTracker::new()),
			burns_completed: AtomicU32::new(0),
			mint_threshold: DEFAULT_MINT_THRESHOLD,
		}
	}

	pub fn with_mint_threshold(mut self, threshold: u32) -> Self {
		self.mint_threshold = threshold;
		self
	}

	/// Current phase of the action touching a token.
	pub fn token_phase(&self, token_address: Address, token_id: &str) -> TransactionPhase {
		self.phases.phase(&ActionKey::token(token_address, token_id))
	}

	/// Current phase of a collection approval.
	pub fn approval_phase(&self, collection: Address) -> TransactionPhase {
		self.phases.phase(&ActionKey::approval(collection))
	}

	/// Subscribes to phase change events.
	pub fn subscribe_phases(&self) -> broadcast::Receiver<PhaseEvent> {
		self.phases.subscribe()
	}

	/// Burns registered this session.
	pub fn burns_completed(&self) -> u32 {
		self.burns_completed.load(Ordering::Relaxed)
	}

	/// Whether enough burns have completed to unlock minting.
	pub fn mint_unlocked(&self) -> bool {
		self.burns_completed() >= self.mint_threshold
	}

	/// Grants the batch operator blanket transfer rights over the caller's
	/// assets in `collection`.
	///
	/// Checks current approval first: approving an already-approved
	/// collection submits nothing.
	#[instrument(skip(self))]
	pub async fn approve_collection(
		&self,
		chain_id: u64,
		collection: Address,
	) -> Result<ApprovalOutcome, OrchestratorError> {
		let session = self.require_session().await?;
		let operator = self.batch_operator(chain_id)?;

		let approved = self
			.chain
			.is_approved_for_all(chain_id, collection, session.address, operator)
			.await
			.map_err(map_chain_error)?;
		if approved {
			tracing::debug!(collection = %collection, "Operator already approved");
			return Ok(ApprovalOutcome::AlreadyApproved);
		}

		let guard = self.begin(
			vec![ActionKey::approval(collection)],
			TransactionPhase::Submitting,
		)?;
		let tx = pyre_chain::contracts::set_approval_for_all(chain_id, collection, operator, true);

		match self.submit_and_confirm(&guard, tx).await {
			Ok(tx_hash) => {
				guard.complete();
				Ok(ApprovalOutcome::Approved { tx_hash })
			},
			Err(err) => {
				guard.fail(&err.to_string());
				Err(err)
			},
		}
	}

	/// Burns one token by transferring it to the chain's burn address.
	///
	/// The caller's wallet is the direct signer, so no prior approval is
	/// needed. After confirmation the burn is registered with the backend.
	#[instrument(skip(self))]
	pub async fn burn_single(
		&self,
		chain_id: u64,
		token_address: Address,
		token_id: &str,
	) -> Result<BurnRecord, OrchestratorError> {
		let session = self.require_session().await?;
		let (burn_address, slug) = self.network_burn_target(chain_id)?;
		let id = parse_token_id(token_id)?;

		let guard = self.begin(
			vec![ActionKey::token(token_address, token_id)],
			TransactionPhase::Submitting,
		)?;
		let request = BurnRequest {
			token_ids: vec![token_id.to_string()],
			token_address,
			wallet_address: session.address,
			is_batch: false,
		};
		let tx = pyre_chain::contracts::transfer_from(
			chain_id,
			token_address,
			session.address,
			burn_address,
			id,
		);

		match self.run_burn(&guard, &session, &request, &slug, tx).await {
			Ok(record) => {
				guard.complete();
				self.note_burns(record.token_ids.len());
				Ok(record)
			},
			Err(err) => {
				guard.fail(&err.to_string());
				Err(err)
			},
		}
	}

	/// Burns many tokens from one collection in a single transaction via
	/// the chain's batch operator contract.
	///
	/// Requires prior approval; an unapproved collection fails with a
	/// precondition error before anything is submitted, and a chain with no
	/// batch operator fails before that.
	#[instrument(skip(self, token_ids), fields(token_count = token_ids.len()))]
	pub async fn burn_batch(
		&self,
		chain_id: u64,
		token_address: Address,
		token_ids: &[String],
	) -> Result<BurnRecord, OrchestratorError> {
		if token_ids.is_empty() {
			return Err(OrchestratorError::EmptyBatch);
		}
		let session = self.require_session().await?;
		let operator = self.batch_operator(chain_id)?;
		let (burn_address, slug) = self.network_burn_target(chain_id)?;

		let ids = token_ids
			.iter()
			.map(|id| parse_token_id(id))
			.collect::<Result<Vec<_>, _>>()?;

		let approved = self
			.chain
			.is_approved_for_all(chain_id, token_address, session.address, operator)
			.await
			.map_err(map_chain_error)?;
		if !approved {
			return Err(OrchestratorError::ApprovalRequired(token_address));
		}

		let keys = token_ids
			.iter()
			.map(|id| ActionKey::token(token_address, id.clone()))
			.collect();
		let guard = self.begin(keys, TransactionPhase::Submitting)?;
		let request = BurnRequest {
			token_ids: token_ids.to_vec(),
			token_address,
			wallet_address: session.address,
			is_batch: true,
		};
		let tx = pyre_chain::contracts::batch_transfer_to_single_wallet(
			chain_id,
			operator,
			token_address,
			burn_address,
			ids,
		);

		match self.run_burn(&guard, &session, &request, &slug, tx).await {
			Ok(record) => {
				guard.complete();
				self.note_burns(record.token_ids.len());
				Ok(record)
			},
			Err(err) => {
				guard.fail(&err.to_string());
				Err(err)
			},
		}
	}

	/// Mints `quantity` of a token, paying `price x quantity` in native
	/// currency.
	///
	/// The token's on-chain configuration is re-read immediately before
	/// payment; no cached price is trusted. If the configuration requires
	/// an allowlist and no signature is supplied, one is fetched from the
	/// backend first -- a refusal there means no write is ever submitted.
	#[instrument(skip(self, signature))]
	pub async fn mint(
		&self,
		chain_id: u64,
		collection_id: &str,
		token_id: &str,
		quantity: u64,
		signature: Option<String>,
	) -> Result<MintOutcome, OrchestratorError> {
		if quantity == 0 {
			return Err(OrchestratorError::InvalidQuantity);
		}
		let session = self.require_session().await?;
		let contract = self
			.chain
			.registry()
			.mint_contract(chain_id)
			.map_err(OrchestratorError::Network)?;
		let id = parse_token_id(token_id)?;

		let guard = self.begin(
			vec![ActionKey::token(contract, token_id)],
			TransactionPhase::Submitting,
		)?;

		let result = self
			.run_mint(
				&guard,
				&session,
				chain_id,
				contract,
				collection_id,
				token_id,
				id,
				quantity,
				signature,
			)
			.await;

		match result {
			Ok(outcome) => {
				guard.complete();
				Ok(outcome)
			},
			Err(err) => {
				guard.fail(&err.to_string());
				Err(err)
			},
		}
	}

	/// Retries the backend registration of an already-confirmed burn.
	///
	/// The transaction hash is known and the on-chain effect is final, so
	/// this only replays the registration call.
	#[instrument(skip(self, token_ids), fields(token_count = token_ids.len()))]
	pub async fn retry_burn_registration(
		&self,
		chain_id: u64,
		token_address: Address,
		token_ids: &[String],
		tx_hash: &str,
	) -> Result<BurnRecord, OrchestratorError> {
		if token_ids.is_empty() {
			return Err(OrchestratorError::EmptyBatch);
		}
		let session = self.require_session().await?;
		let (_, slug) = self.network_burn_target(chain_id)?;

		let keys = token_ids
			.iter()
			.map(|id| ActionKey::token(token_address, id.clone()))
			.collect();
		let guard = self.begin(keys, TransactionPhase::Registering)?;

		let register = RegisterBurnRequest {
			token_ids: token_ids.to_vec(),
			chain: slug,
			wallet_address: session.address,
			burn_proof: BurnProof::evm(tx_hash),
			collection_contract_address: token_address,
		};

		match self.api.register_burn(&session.token, &register).await {
			Ok(record) => {
				guard.complete();
				self.note_burns(record.token_ids.len());
				Ok(record)
			},
			Err(source) => {
				let err = OrchestratorError::Registration {
					tx_hash: tx_hash.to_string(),
					source,
				};
				guard.fail(&err.to_string());
				Err(err)
			},
		}
	}

	async fn require_session(&self) -> Result<Session, OrchestratorError> {
		self.session
			.current()
			.await
			.ok_or(OrchestratorError::SessionExpired)
	}

	fn begin(
		&self,
		keys: Vec<ActionKey>,
		initial: TransactionPhase,
	) -> Result<ActionGuard, OrchestratorError> {
		PhaseTracker::begin(&self.phases, keys, initial).map_err(|e| match e {
			PhaseError::Busy(_) => OrchestratorError::ActionInFlight,
			other => OrchestratorError::Phase(other),
		})
	}

	fn batch_operator(&self, chain_id: u64) -> Result<Address, OrchestratorError> {
		self.chain
			.registry()
			.batch_operator(chain_id)
			.map_err(|e| match e {
				NetworkError::CapabilityUnavailable { .. } => {
					OrchestratorError::BatchUnsupported(chain_id)
				},
				other => OrchestratorError::Network(other),
			})
	}

	fn network_burn_target(&self, chain_id: u64) -> Result<(Address, String), OrchestratorError> {
		let network = self
			.chain
			.registry()
			.require(chain_id)
			.map_err(OrchestratorError::Network)?;
		Ok((
			network.contracts.burn_address,
			network.display_name.to_lowercase(),
		))
	}

	fn note_burns(&self, count: usize) {
		let total = self
			.burns_completed
			.fetch_add(count as u32, Ordering::Relaxed)
			+ count as u32;
		tracing::debug!(total, "Burn count updated");
	}

	/// Submission and confirmation, advancing the guard between steps.
	async fn submit_and_confirm(
		&self,
		guard: &ActionGuard,
		tx: ChainTransaction,
	) -> Result<String, OrchestratorError> {
		let chain_id = tx.chain_id;
		let tx_hash = self.chain.submit(tx).await.map_err(map_chain_error)?;
		guard
			.transition(TransactionPhase::Confirming)
			.map_err(OrchestratorError::Phase)?;
		self.chain
			.confirm(tx_hash, chain_id)
			.await
			.map_err(map_chain_error)?;
		Ok(format!("{}", tx_hash))
	}

	/// Shared burn pipeline: write, confirm, register.
	async fn run_burn(
		&self,
		guard: &ActionGuard,
		session: &Session,
		request: &BurnRequest,
		chain_slug: &str,
		tx: ChainTransaction,
	) -> Result<BurnRecord, OrchestratorError> {
		let tx_hash = self.submit_and_confirm(guard, tx).await?;
		guard
			.transition(TransactionPhase::Registering)
			.map_err(OrchestratorError::Phase)?;

		let register = RegisterBurnRequest {
			token_ids: request.token_ids.clone(),
			chain: chain_slug.to_string(),
			wallet_address: request.wallet_address,
			burn_proof: BurnProof::evm(tx_hash.clone()),
			collection_contract_address: request.token_address,
		};

		self.api
			.register_burn(&session.token, &register)
			.await
			.map_err(|source| OrchestratorError::Registration { tx_hash, source })
	}

	#[allow(clippy::too_many_arguments)]
	async fn run_mint(
		&self,
		guard: &ActionGuard,
		session: &Session,
		chain_id: u64,
		contract: Address,
		collection_id: &str,
		token_id: &str,
		id: U256,
		quantity: u64,
		signature: Option<String>,
	) -> Result<MintOutcome, OrchestratorError> {
		let config = self
			.chain
			.token_config(chain_id, contract, id)
			.await
			.map_err(map_chain_error)?;
		if !config.active {
			return Err(OrchestratorError::MintInactive(token_id.to_string()));
		}

		let signature_hex = match signature {
			Some(signature) => Some(signature),
			None if config.allowlist_required => {
				let response = self
					.api
					.mint_signature(
						&session.token,
						collection_id,
						token_id,
						session.address,
						chain_id,
						contract,
						quantity,
					)
					.await
					.map_err(|e| OrchestratorError::Auth(e.to_string()))?;
				Some(response.signature)
			},
			// No allowlist: the contract accepts an empty sentinel.
			None => None,
		};
		let signature_bytes = match &signature_hex {
			Some(signature) => hex::decode(without_0x_prefix(signature))
				.map_err(|e| OrchestratorError::Auth(format!("invalid signature hex: {}", e)))?
				.into(),
			None => alloy_primitives::Bytes::new(),
		};

		let amount = U256::from(quantity);
		let value = config.price * amount;
		let tx = pyre_chain::contracts::mint(
			chain_id,
			contract,
			session.address,
			id,
			amount,
			signature_bytes,
			value,
		);

		let tx_hash = self.submit_and_confirm(guard, tx).await?;
		guard
			.transition(TransactionPhase::Registering)
			.map_err(OrchestratorError::Phase)?;

		let backend = self
			.api
			.register_mint(&session.token, collection_id, token_id, quantity)
			.await
			.map_err(|source| OrchestratorError::Registration {
				tx_hash: tx_hash.clone(),
				source,
			})?;

		Ok(MintOutcome { tx_hash, backend })
	}
}

fn parse_token_id(token_id: &str) -> Result<U256, OrchestratorError> {
	U256::from_str_radix(token_id, 10)
		.map_err(|_| OrchestratorError::InvalidTokenId(token_id.to_string()))
}

/// Wires wallet invalidation and session end into teardown actions.
///
/// A connection invalidated by the wallet layer (account change,
/// unsupported chain, disconnect) logs the session out; any session end
/// clears the inventory's selection and approval caches.
pub fn wire_teardown(
	connector: &WalletConnector,
	session: SessionLifecycleManager,
	inventory: Arc<CollectionInventory>,
) -> tokio::task::JoinHandle<()> {
	let mut connector_events = connector.subscribe();
	let mut session_events = session.subscribe();

	tokio::spawn(async move {
		loop {
			tokio::select! {
				event = connector_events.recv() => match event {
					Ok(ConnectorEvent::SessionInvalidated(reason)) => {
						tracing::info!(?reason, "Connection invalidated, tearing down session");
						session.logout().await;
						inventory.clear();
					},
					Ok(_) => {},
					Err(broadcast::error::RecvError::Lagged(_)) => {},
					Err(broadcast::error::RecvError::Closed) => break,
				},
				event = session_events.recv() => match event {
					Ok(SessionEvent::LoggedOut) => inventory.clear(),
					Ok(_) => {},
					Err(broadcast::error::RecvError::Lagged(_)) => {},
					Err(broadcast::error::RecvError::Closed) => break,
				},
			}
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::{address, Bytes, TxHash, B256};
	use alloy_sol_types::{SolCall, SolValue};
	use async_trait::async_trait;
	use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
	use pyre_chain::contracts::{IBatchOperator, IBurnableCollection, IMintableCollection};
	use pyre_chain::{ChainInterface, ChainReceipt};
	use pyre_session::{
		Clock, MemoryTokenStore, SessionConfig, SystemClock, TokenStore,
	};
	use pyre_types::{ContractAddresses, NativeCurrency, NetworkConfig, NetworkRegistry};
	use serde_json::json;
	use std::collections::HashMap;
	use std::sync::Mutex as StdMutex;
	use std::time::Duration;
	use wiremock::matchers::{body_json, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	const WALLET: Address = address!("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
	const NFT: Address = address!("85be9de7a369850a964616a2c04d79000d168dea");
	const OPERATOR: Address = address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f");
	const MINT: Address = address!("7d2768dE32b0b80b7a3454c06BdAc94A69DDc7A9");
	const BURN: Address = address!("4D483FB9Aa883956f05fb1CF0746B04e93170D13");

	#[derive(Clone, Copy)]
	struct TokenConfigFixture {
		price: u64,
		allowlist_required: bool,
		active: bool,
	}

	struct FakeChain {
		approved: bool,
		token_config: TokenConfigFixture,
		confirm_success: bool,
		confirm_timeout: bool,
		confirm_delay: Option<Duration>,
		submitted: StdMutex<Vec<ChainTransaction>>,
	}

	impl FakeChain {
		fn new() -> Self {
			Self {
				approved: true,
				token_config: TokenConfigFixture {
					price: 250,
					allowlist_required: false,
					active: true,
				},
				confirm_success: true,
				confirm_timeout: false,
				confirm_delay: None,
				submitted: StdMutex::new(Vec::new()),
			}
		}

		fn submissions(&self) -> Vec<ChainTransaction> {
			self.submitted.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl ChainInterface for FakeChain {
		async fn call(&self, tx: ChainTransaction) -> Result<Bytes, ChainError> {
			let selector: [u8; 4] = tx.data[..4].try_into().unwrap();
			if selector == IBurnableCollection::isApprovedForAllCall::SELECTOR {
				return Ok(Bytes::from((self.approved,).abi_encode_params()));
			}
			if selector == IMintableCollection::tokenConfigsCall::SELECTOR {
				let config = self.token_config;
				return Ok(Bytes::from(
					(
						"Relic".to_string(),
						U256::from(1000u64),
						U256::from(config.price),
						config.allowlist_required,
						config.active,
						false,
					)
						.abi_encode_params(),
				));
			}
			Err(ChainError::Network(format!(
				"unexpected read selector {:?}",
				selector
			)))
		}

		async fn submit(&self, tx: ChainTransaction) -> Result<TxHash, ChainError> {
			let mut submitted = self.submitted.lock().unwrap();
			submitted.push(tx);
			Ok(B256::repeat_byte(submitted.len() as u8))
		}

		async fn wait_for_confirmation(
			&self,
			tx_hash: TxHash,
			_chain_id: u64,
			timeout: Duration,
		) -> Result<ChainReceipt, ChainError> {
			if let Some(delay) = self.confirm_delay {
				tokio::time::sleep(delay).await;
			}
			if self.confirm_timeout {
				return Err(ChainError::ConfirmationTimeout {
					tx_hash: format!("{}", tx_hash),
					timeout_secs: timeout.as_secs(),
				});
			}
			Ok(ChainReceipt {
				hash: tx_hash,
				block_number: 42,
				success: self.confirm_success,
			})
		}

		async fn get_receipt(
			&self,
			tx_hash: TxHash,
			_chain_id: u64,
		) -> Result<ChainReceipt, ChainError> {
			Ok(ChainReceipt {
				hash: tx_hash,
				block_number: 42,
				success: self.confirm_success,
			})
		}
	}

	fn registry(with_batch: bool, with_mint: bool) -> Arc<NetworkRegistry> {
		let mut networks = HashMap::new();
		networks.insert(
			137,
			NetworkConfig {
				rpc_urls: vec!["https://polygon-rpc.com".to_string()],
				display_name: "Polygon".to_string(),
				native_currency: NativeCurrency {
					symbol: "POL".to_string(),
					decimals: 18,
				},
				explorer_url: "https://polygonscan.com".to_string(),
				indexer_url: None,
				contracts: ContractAddresses {
					nft: NFT,
					burn_address: BURN,
					batch_operator: with_batch.then_some(OPERATOR),
					mint: with_mint.then_some(MINT),
				},
			},
		);
		Arc::new(NetworkRegistry::new(networks))
	}

	fn make_token(exp: i64) -> String {
		format!(
			"{}.{}.{}",
			URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
			URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp).as_bytes()),
			URL_SAFE_NO_PAD.encode(b"sig")
		)
	}

	struct Harness {
		orchestrator: Arc<TransactionOrchestrator>,
		fake: Arc<FakeChain>,
		session: SessionLifecycleManager,
	}

	async fn harness(fake: FakeChain, server: &MockServer, with_batch: bool) -> Harness {
		harness_with_clock(fake, server.uri(), with_batch, Arc::new(SystemClock)).await
	}

	async fn harness_with_clock(
		fake: FakeChain,
		base_url: String,
		with_batch: bool,
		clock: Arc<dyn Clock>,
	) -> Harness {
		let fake = Arc::new(fake);
		let chain = Arc::new(ChainService::new(
			Arc::clone(&fake) as Arc<dyn ChainInterface>,
			registry(with_batch, true),
		));
		let api = Arc::new(ApiClient::new(base_url));
		let now = clock.now_unix();
		let session = SessionLifecycleManager::new(
			Arc::new(MemoryTokenStore::new()) as Arc<dyn TokenStore>,
			clock,
			SessionConfig::default(),
		);
		session
			.start(&make_token(now + 1800), WALLET)
			.await
			.unwrap();

		Harness {
			orchestrator: Arc::new(TransactionOrchestrator::new(chain, api, session.clone())),
			fake,
			session,
		}
	}

	fn burn_record_json(token_ids: &[&str]) -> serde_json::Value {
		json!({
			"tokenIds": token_ids,
			"chain": "polygon",
			"walletAddress": WALLET.to_string(),
			"burnProof": {"type": "evm", "txHash": "0x0101010101010101010101010101010101010101010101010101010101010101"},
			"timestamp": 1_700_000_000,
		})
	}

	async fn mount_register_burn(server: &MockServer, token_ids: &[&str]) {
		Mock::given(method("POST"))
			.and(path("/burns/register"))
			.respond_with(ResponseTemplate::new(200).set_body_json(burn_record_json(token_ids)))
			.mount(server)
			.await;
	}

	#[tokio::test]
	async fn burn_single_submits_confirms_then_registers() {
		let server = MockServer::start().await;
		mount_register_burn(&server, &["7"]).await;
		let h = harness(FakeChain::new(), &server, true).await;

		let record = h.orchestrator.burn_single(137, NFT, "7").await.unwrap();

		assert_eq!(record.token_ids, vec!["7".to_string()]);
		let submissions = h.fake.submissions();
		assert_eq!(submissions.len(), 1);
		assert_eq!(submissions[0].to, NFT);

		let call = IBurnableCollection::transferFromCall::abi_decode(&submissions[0].data).unwrap();
		assert_eq!(call.from, WALLET);
		assert_eq!(call.to, BURN);
		assert_eq!(call.tokenId, U256::from(7u64));

		assert_eq!(h.orchestrator.token_phase(NFT, "7"), TransactionPhase::Completed);
		assert_eq!(h.orchestrator.burns_completed(), 1);
		assert!(!h.orchestrator.mint_unlocked());
	}

	#[tokio::test]
	async fn burn_single_without_session_submits_nothing() {
		let server = MockServer::start().await;
		let h = harness(FakeChain::new(), &server, true).await;
		h.session.logout().await;

		let err = h.orchestrator.burn_single(137, NFT, "7").await.unwrap_err();

		assert!(matches!(err, OrchestratorError::SessionExpired));
		assert!(h.fake.submissions().is_empty());
	}

	#[tokio::test]
	async fn concurrent_burn_of_same_token_is_rejected() {
		let server = MockServer::start().await;
		mount_register_burn(&server, &["7"]).await;
		let mut fake = FakeChain::new();
		fake.confirm_delay = Some(Duration::from_millis(200));
		let h = harness(fake, &server, true).await;

		let first = {
			let orchestrator = Arc::clone(&h.orchestrator);
			tokio::spawn(async move { orchestrator.burn_single(137, NFT, "7").await })
		};
		tokio::time::sleep(Duration::from_millis(50)).await;

		let err = h.orchestrator.burn_single(137, NFT, "7").await.unwrap_err();
		assert!(matches!(err, OrchestratorError::ActionInFlight));

		// A different token is unaffected.
		let other = h.orchestrator.burn_single(137, NFT, "8").await;
		assert!(other.is_ok());

		assert!(first.await.unwrap().is_ok());
	}

	#[tokio::test]
	async fn burn_batch_without_operator_submits_nothing() {
		let server = MockServer::start().await;
		let h = harness(FakeChain::new(), &server, false).await;

		let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
		let err = h.orchestrator.burn_batch(137, NFT, &ids).await.unwrap_err();

		assert!(matches!(err, OrchestratorError::BatchUnsupported(137)));
		assert!(h.fake.submissions().is_empty());
	}

	#[tokio::test]
	async fn burn_batch_requires_prior_approval() {
		let server = MockServer::start().await;
		let mut fake = FakeChain::new();
		fake.approved = false;
		let h = harness(fake, &server, true).await;

		let ids = vec!["1".to_string(), "2".to_string()];
		let err = h.orchestrator.burn_batch(137, NFT, &ids).await.unwrap_err();

		assert!(matches!(err, OrchestratorError::ApprovalRequired(addr) if addr == NFT));
		assert!(h.fake.submissions().is_empty());
	}

	#[tokio::test]
	async fn burn_batch_moves_all_tokens_in_one_transaction() {
		let server = MockServer::start().await;
		mount_register_burn(&server, &["1", "2", "3"]).await;
		let h = harness(FakeChain::new(), &server, true).await;

		let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
		let record = h.orchestrator.burn_batch(137, NFT, &ids).await.unwrap();

		assert_eq!(record.token_ids.len(), 3);
		let submissions = h.fake.submissions();
		assert_eq!(submissions.len(), 1);
		assert_eq!(submissions[0].to, OPERATOR);

		let call =
			IBatchOperator::batchTransferToSingleWalletCall::abi_decode(&submissions[0].data)
				.unwrap();
		assert_eq!(call.erc721Contract, NFT);
		assert_eq!(call.to, BURN);
		assert_eq!(call.tokenIds.len(), 3);

		// Three burns unlock minting at the default threshold.
		assert!(h.orchestrator.mint_unlocked());
		for id in &ids {
			assert_eq!(h.orchestrator.token_phase(NFT, id), TransactionPhase::Completed);
		}
	}

	#[tokio::test]
	async fn empty_batch_is_rejected() {
		let server = MockServer::start().await;
		let h = harness(FakeChain::new(), &server, true).await;

		let err = h.orchestrator.burn_batch(137, NFT, &[]).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::EmptyBatch));
	}

	#[tokio::test]
	async fn approve_collection_skips_write_when_already_approved() {
		let server = MockServer::start().await;
		let h = harness(FakeChain::new(), &server, true).await;

		let outcome = h.orchestrator.approve_collection(137, NFT).await.unwrap();

		assert_eq!(outcome, ApprovalOutcome::AlreadyApproved);
		assert!(h.fake.submissions().is_empty());
	}

	#[tokio::test]
	async fn approve_collection_submits_when_unapproved() {
		let server = MockServer::start().await;
		let mut fake = FakeChain::new();
		fake.approved = false;
		let h = harness(fake, &server, true).await;

		let outcome = h.orchestrator.approve_collection(137, NFT).await.unwrap();

		assert!(matches!(outcome, ApprovalOutcome::Approved { .. }));
		let submissions = h.fake.submissions();
		assert_eq!(submissions.len(), 1);
		assert_eq!(submissions[0].to, NFT);

		let call =
			IBurnableCollection::setApprovalForAllCall::abi_decode(&submissions[0].data).unwrap();
		assert_eq!(call.operator, OPERATOR);
		assert!(call.approved);
		assert_eq!(
			h.orchestrator.approval_phase(NFT),
			TransactionPhase::Completed
		);
	}

	#[tokio::test]
	async fn mint_with_allowlist_fetches_signature_first() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/collections/col-1/nfts/3/mint-signature"))
			.respond_with(
				ResponseTemplate::new(200).set_body_json(json!({"signature": "0xabcd"})),
			)
			.expect(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/collections/col-1/nfts/3/mint"))
			.and(body_json(json!({"quantity": 2})))
			.respond_with(
				ResponseTemplate::new(200).set_body_json(json!({"transactionHash": "0xfeed"})),
			)
			.expect(1)
			.mount(&server)
			.await;

		let mut fake = FakeChain::new();
		fake.token_config.allowlist_required = true;
		let h = harness(fake, &server, true).await;

		let outcome = h
			.orchestrator
			.mint(137, "col-1", "3", 2, None)
			.await
			.unwrap();

		assert_eq!(outcome.backend.transaction_hash.as_deref(), Some("0xfeed"));
		let submissions = h.fake.submissions();
		assert_eq!(submissions.len(), 1);
		assert_eq!(submissions[0].to, MINT);
		// price x quantity in native currency.
		assert_eq!(submissions[0].value, U256::from(500u64));

		let call = IMintableCollection::mintCall::abi_decode(&submissions[0].data).unwrap();
		assert_eq!(call.to, WALLET);
		assert_eq!(call.amount, U256::from(2u64));
		assert_eq!(call.signature, Bytes::from(vec![0xab, 0xcd]));
	}

	#[tokio::test]
	async fn mint_signature_refusal_submits_no_write() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/collections/col-1/nfts/3/mint-signature"))
			.respond_with(ResponseTemplate::new(403).set_body_string("not allowlisted"))
			.expect(1)
			.mount(&server)
			.await;

		let mut fake = FakeChain::new();
		fake.token_config.allowlist_required = true;
		let h = harness(fake, &server, true).await;

		let err = h
			.orchestrator
			.mint(137, "col-1", "3", 1, None)
			.await
			.unwrap_err();

		assert!(matches!(err, OrchestratorError::Auth(_)));
		assert!(h.fake.submissions().is_empty());
		assert!(matches!(
			h.orchestrator.token_phase(MINT, "3"),
			TransactionPhase::Failed(_)
		));
	}

	#[tokio::test]
	async fn mint_without_allowlist_uses_empty_sentinel_signature() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/collections/col-1/nfts/3/mint"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
			.mount(&server)
			.await;

		let h = harness(FakeChain::new(), &server, true).await;
		h.orchestrator.mint(137, "col-1", "3", 1, None).await.unwrap();

		let submissions = h.fake.submissions();
		let call = IMintableCollection::mintCall::abi_decode(&submissions[0].data).unwrap();
		assert!(call.signature.is_empty());
	}

	#[tokio::test]
	async fn mint_with_cached_signature_skips_backend_fetch() {
		let server = MockServer::start().await;
		// No mint-signature mock mounted: hitting it would fail the mint.
		Mock::given(method("POST"))
			.and(path("/collections/col-1/nfts/3/mint"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
			.mount(&server)
			.await;

		let mut fake = FakeChain::new();
		fake.token_config.allowlist_required = true;
		let h = harness(fake, &server, true).await;

		h.orchestrator
			.mint(137, "col-1", "3", 1, Some("0xbeef".to_string()))
			.await
			.unwrap();

		let submissions = h.fake.submissions();
		let call = IMintableCollection::mintCall::abi_decode(&submissions[0].data).unwrap();
		assert_eq!(call.signature, Bytes::from(vec![0xbe, 0xef]));
	}

	#[tokio::test]
	async fn mint_inactive_token_is_refused() {
		let server = MockServer::start().await;
		let mut fake = FakeChain::new();
		fake.token_config.active = false;
		let h = harness(fake, &server, true).await;

		let err = h
			.orchestrator
			.mint(137, "col-1", "3", 1, None)
			.await
			.unwrap_err();

		assert!(matches!(err, OrchestratorError::MintInactive(_)));
		assert!(h.fake.submissions().is_empty());
	}

	#[tokio::test]
	async fn reverted_transaction_is_not_success() {
		let server = MockServer::start().await;
		let mut fake = FakeChain::new();
		fake.confirm_success = false;
		let h = harness(fake, &server, true).await;

		let err = h.orchestrator.burn_single(137, NFT, "7").await.unwrap_err();

		assert!(matches!(err, OrchestratorError::Reverted(_)));
		assert!(matches!(
			h.orchestrator.token_phase(NFT, "7"),
			TransactionPhase::Failed(_)
		));
	}

	#[tokio::test]
	async fn confirmation_timeout_keeps_the_hash() {
		let server = MockServer::start().await;
		let mut fake = FakeChain::new();
		fake.confirm_timeout = true;
		let h = harness(fake, &server, true).await;

		let err = h.orchestrator.burn_single(137, NFT, "7").await.unwrap_err();

		match err {
			OrchestratorError::ConfirmationTimeout { tx_hash, .. } => {
				assert!(tx_hash.starts_with("0x"));
			},
			other => panic!("expected timeout, got {:?}", other),
		}
		// One submission happened; the transaction may still land.
		assert_eq!(h.fake.submissions().len(), 1);
	}

	#[tokio::test]
	async fn registration_failure_is_retryable_with_known_hash() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/burns/register"))
			.respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
			.up_to_n_times(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/burns/register"))
			.respond_with(ResponseTemplate::new(200).set_body_json(burn_record_json(&["7"])))
			.mount(&server)
			.await;

		let h = harness(FakeChain::new(), &server, true).await;

		let err = h.orchestrator.burn_single(137, NFT, "7").await.unwrap_err();
		let tx_hash = match &err {
			OrchestratorError::Registration { tx_hash, .. } => tx_hash.clone(),
			other => panic!("expected registration failure, got {:?}", other),
		};
		// The on-chain burn happened exactly once.
		assert_eq!(h.fake.submissions().len(), 1);
		assert_eq!(h.orchestrator.burns_completed(), 0);

		let record = h
			.orchestrator
			.retry_burn_registration(137, NFT, &["7".to_string()], &tx_hash)
			.await
			.unwrap();

		assert_eq!(record.token_ids, vec!["7".to_string()]);
		// No second on-chain submission for the retry.
		assert_eq!(h.fake.submissions().len(), 1);
		assert_eq!(h.orchestrator.token_phase(NFT, "7"), TransactionPhase::Completed);
		assert_eq!(h.orchestrator.burns_completed(), 1);
	}

	#[tokio::test]
	async fn teardown_wiring_logs_out_and_clears_inventory() {
		use pyre_inventory::{AssetPage, IndexerError, IndexerInterface};
		use pyre_wallet::LocalWallet;

		struct EmptyIndexer;

		#[async_trait]
		impl IndexerInterface for EmptyIndexer {
			async fn owned_assets_page(
				&self,
				_owner: Address,
				_chain_id: u64,
				_page_key: Option<String>,
			) -> Result<AssetPage, IndexerError> {
				Ok(AssetPage {
					assets: vec![],
					collection_names: HashMap::new(),
					page_key: None,
				})
			}
		}

		let chain = Arc::new(ChainService::new(
			Arc::new(FakeChain::new()) as Arc<dyn ChainInterface>,
			registry(true, true),
		));
		let inventory = Arc::new(CollectionInventory::new(
			Arc::new(EmptyIndexer),
			Arc::clone(&chain),
		));
		let session = SessionLifecycleManager::new(
			Arc::new(MemoryTokenStore::new()) as Arc<dyn TokenStore>,
			Arc::new(SystemClock),
			SessionConfig::default(),
		);
		let wallet = LocalWallet::new(
			"ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
			137,
		)
		.unwrap();
		let wallet_address = wallet.address();
		let connector = WalletConnector::new(Arc::new(wallet), registry(true, true));

		connector.connect().await.unwrap();
		session
			.start(&make_token(pyre_types::current_timestamp() + 1800), wallet_address)
			.await
			.unwrap();
		inventory.toggle_selection(NFT, "1");

		let task = wire_teardown(&connector, session.clone(), Arc::clone(&inventory));
		connector.disconnect();

		// The teardown task runs asynchronously; poll briefly.
		for _ in 0..100 {
			if session.current().await.is_none() && inventory.selected().is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		assert!(session.current().await.is_none());
		assert!(inventory.selected().is_empty());
		task.abort();
	}

	#[tokio::test(start_paused = true)]
	async fn expired_session_rejects_burns() {
		struct TokioClock {
			base: i64,
			start: tokio::time::Instant,
		}
		impl Clock for TokioClock {
			fn now_unix(&self) -> i64 {
				self.base + self.start.elapsed().as_secs() as i64
			}
		}

		let clock = Arc::new(TokioClock {
			base: 1_000_000,
			start: tokio::time::Instant::now(),
		});
		// The backend is never reached; the session gate fires first.
		let h = harness_with_clock(
			FakeChain::new(),
			"http://127.0.0.1:9".to_string(),
			true,
			clock,
		)
		.await;

		tokio::time::advance(Duration::from_secs(1801)).await;

		let err = h.orchestrator.burn_single(137, NFT, "7").await.unwrap_err();
		assert!(matches!(err, OrchestratorError::SessionExpired));
		assert!(h.fake.submissions().is_empty());
	}
}
