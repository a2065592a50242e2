//! Wallet connection module for the pyre burn/mint client.
//!
//! This module owns the raw provider connection lifecycle: requesting
//! account access, detecting account and chain changes, and tearing the
//! connection down. It provides the abstraction other layers use to ask the
//! wallet for signatures without knowing which provider backs it.

use alloy_primitives::Address;
use async_trait::async_trait;
use pyre_types::NetworkRegistry;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

pub use implementations::local::LocalWallet;

/// Errors raised by a wallet provider implementation.
#[derive(Debug, Error)]
pub enum ProviderError {
	/// No wallet provider is available in the environment.
	#[error("No wallet provider detected")]
	NoProvider,
	/// The user declined the account or signature request.
	#[error("Request rejected by the user")]
	UserRejected,
	/// The supplied key material is invalid.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// Any other provider failure.
	#[error("Provider error: {0}")]
	Other(String),
}

/// Errors raised by connection operations.
#[derive(Debug, Error)]
pub enum ConnectError {
	#[error("No wallet provider detected")]
	NoProvider,
	#[error("Connection rejected by the user")]
	UserRejected,
	#[error("Provider error: {0}")]
	Provider(String),
	#[error("Chain {0} is not supported")]
	UnsupportedChain(u64),
	#[error("Cannot {operation} while {status:?}")]
	InvalidState {
		operation: &'static str,
		status: ConnectionStatus,
	},
}

impl From<ProviderError> for ConnectError {
	fn from(err: ProviderError) -> Self {
		match err {
			ProviderError::NoProvider => ConnectError::NoProvider,
			ProviderError::UserRejected => ConnectError::UserRejected,
			other => ConnectError::Provider(other.to_string()),
		}
	}
}

/// Notifications pushed by a wallet provider.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
	/// The active account set changed; empty means access was revoked.
	AccountsChanged(Vec<Address>),
	/// The provider switched to a different chain.
	ChainChanged(u64),
}

/// Trait defining the interface for wallet provider implementations.
///
/// Implementations wrap whatever actually holds the keys -- a local signer,
/// a browser extension bridge, a hardware device -- and expose account
/// access, message signing and change notifications.
#[async_trait]
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait WalletProvider: Send + Sync {
	/// Requests access to the provider's accounts.
	///
	/// Returns the available addresses; an empty list means the user
	/// declined to expose any account.
	async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError>;

	/// Returns the chain the provider is currently connected to.
	async fn chain_id(&self) -> Result<u64, ProviderError>;

	/// Signs an arbitrary message with the given account.
	///
	/// Returns the hex-encoded (0x-prefixed) EIP-191 signature.
	async fn sign_message(&self, address: Address, message: &[u8]) -> Result<String, ProviderError>;

	/// Subscribes to account and chain change notifications.
	fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Connection lifecycle states.
///
/// `Error` is reachable from any state; only `connect` leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
	Disconnected,
	Connecting,
	Connected,
	Authenticating,
	Error,
}

/// Snapshot of the wallet connection.
///
/// Owned exclusively by the [`WalletConnector`]; every mutation goes through
/// its operations.
#[derive(Debug, Clone)]
pub struct WalletConnection {
	pub status: ConnectionStatus,
	pub address: Option<Address>,
	pub chain_id: Option<u64>,
	/// Whether a challenge/login exchange has completed for this address.
	pub authenticated: bool,
	pub error: Option<String>,
}

impl WalletConnection {
	fn disconnected() -> Self {
		Self {
			status: ConnectionStatus::Disconnected,
			address: None,
			chain_id: None,
			authenticated: false,
			error: None,
		}
	}
}

/// Why the session bound to this connection is no longer valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
	/// The active account changed or was revoked.
	AccountChanged,
	/// The provider moved to a chain the registry does not know.
	UnsupportedChain(u64),
	/// The user disconnected.
	Disconnected,
}

/// Events published by the connector for session wiring and UI consumption.
#[derive(Debug, Clone)]
pub enum ConnectorEvent {
	StatusChanged(ConnectionStatus),
	AddressChanged(Address),
	/// The session bound to this connection must be torn down.
	SessionInvalidated(InvalidationReason),
}

/// Owns the provider connection and its change subscription.
///
/// The connector registers exactly one watcher task on the provider's event
/// stream; the task is aborted on disconnect so no callbacks outlive the
/// connection they were created for.
pub struct WalletConnector {
	provider: Arc<dyn WalletProvider>,
	registry: Arc<NetworkRegistry>,
	connection: Arc<RwLock<WalletConnection>>,
	events: broadcast::Sender<ConnectorEvent>,
	watcher: Mutex<Option<JoinHandle<()>>>,
}

impl WalletConnector {
	pub fn new(provider: Arc<dyn WalletProvider>, registry: Arc<NetworkRegistry>) -> Self {
		let (events, _) = broadcast::channel(16);
		Self {
			provider,
			registry,
			connection: Arc::new(RwLock::new(WalletConnection::disconnected())),
			events,
			watcher: Mutex::new(None),
		}
	}

	/// Current connection snapshot.
	pub fn connection(&self) -> WalletConnection {
		self.connection.read().expect("connection lock poisoned").clone()
	}

	/// Subscribes to connector events.
	pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
		self.events.subscribe()
	}

	/// Requests account access and records the active address.
	///
	/// Valid from `Disconnected` and `Error`; calling while already
	/// connected returns the active address without a new provider request.
	pub async fn connect(&self) -> Result<Address, ConnectError> {
		{
			let mut connection = self.connection.write().expect("connection lock poisoned");
			match connection.status {
				ConnectionStatus::Connected | ConnectionStatus::Authenticating => {
					if let Some(address) = connection.address {
						return Ok(address);
					}
				},
				ConnectionStatus::Connecting => {
					return Err(ConnectError::InvalidState {
						operation: "connect",
						status: ConnectionStatus::Connecting,
					});
				},
				ConnectionStatus::Disconnected | ConnectionStatus::Error => {},
			}
			connection.status = ConnectionStatus::Connecting;
			connection.error = None;
		}
		self.publish_status(ConnectionStatus::Connecting);

		let address = match self.request_active_account().await {
			Ok(address) => address,
			Err(err) => {
				self.enter_error(&err.to_string());
				return Err(err);
			},
		};

		let chain_id = match self.provider.chain_id().await {
			Ok(chain_id) if self.registry.get(chain_id).is_some() => chain_id,
			Ok(chain_id) => {
				let err = ConnectError::UnsupportedChain(chain_id);
				self.enter_error(&err.to_string());
				return Err(err);
			},
			Err(err) => {
				let err = ConnectError::from(err);
				self.enter_error(&err.to_string());
				return Err(err);
			},
		};

		{
			let mut connection = self.connection.write().expect("connection lock poisoned");
			connection.status = ConnectionStatus::Connected;
			connection.address = Some(address);
			connection.chain_id = Some(chain_id);
			connection.authenticated = false;
		}
		self.publish_status(ConnectionStatus::Connected);
		tracing::info!(address = %address, chain_id, "Wallet connected");

		self.spawn_watcher();
		Ok(address)
	}

	/// Tears the connection down and signals session teardown.
	///
	/// Idempotent; disconnecting while already disconnected is a no-op.
	pub fn disconnect(&self) {
		if let Some(handle) = self.watcher.lock().expect("watcher lock poisoned").take() {
			handle.abort();
		}

		let was_connected = {
			let mut connection = self.connection.write().expect("connection lock poisoned");
			let was_connected = connection.status != ConnectionStatus::Disconnected;
			*connection = WalletConnection::disconnected();
			was_connected
		};

		if was_connected {
			tracing::info!("Wallet disconnected");
			self.publish_status(ConnectionStatus::Disconnected);
			self.events
				.send(ConnectorEvent::SessionInvalidated(
					InvalidationReason::Disconnected,
				))
				.ok();
		}
	}

	/// Marks the connection as running a challenge/login exchange.
	pub fn mark_authenticating(&self) -> Result<(), ConnectError> {
		let mut connection = self.connection.write().expect("connection lock poisoned");
		if connection.status != ConnectionStatus::Connected {
			return Err(ConnectError::InvalidState {
				operation: "authenticate",
				status: connection.status,
			});
		}
		connection.status = ConnectionStatus::Authenticating;
		drop(connection);
		self.publish_status(ConnectionStatus::Authenticating);
		Ok(())
	}

	/// Records the outcome of an authentication attempt.
	pub fn mark_authenticated(&self, success: bool) {
		let mut connection = self.connection.write().expect("connection lock poisoned");
		if connection.status == ConnectionStatus::Authenticating {
			connection.status = ConnectionStatus::Connected;
			connection.authenticated = success;
			drop(connection);
			self.publish_status(ConnectionStatus::Connected);
		}
	}

	async fn request_active_account(&self) -> Result<Address, ConnectError> {
		let accounts = self.provider.request_accounts().await?;
		accounts.first().copied().ok_or(ConnectError::UserRejected)
	}

	fn enter_error(&self, message: &str) {
		{
			let mut connection = self.connection.write().expect("connection lock poisoned");
			connection.status = ConnectionStatus::Error;
			connection.error = Some(message.to_string());
		}
		tracing::warn!(error = message, "Wallet connection failed");
		self.publish_status(ConnectionStatus::Error);
	}

	fn publish_status(&self, status: ConnectionStatus) {
		self.events.send(ConnectorEvent::StatusChanged(status)).ok();
	}

	/// Registers the single provider-event watcher, replacing any prior one.
	fn spawn_watcher(&self) {
		let mut watcher = self.watcher.lock().expect("watcher lock poisoned");
		if let Some(handle) = watcher.take() {
			handle.abort();
		}

		let receiver = self.provider.subscribe_events();
		let connection = Arc::clone(&self.connection);
		let registry = Arc::clone(&self.registry);
		let events = self.events.clone();
		*watcher = Some(tokio::spawn(async move {
			watch_provider(receiver, connection, registry, events).await;
		}));
	}
}

impl Drop for WalletConnector {
	fn drop(&mut self) {
		if let Some(handle) = self.watcher.lock().expect("watcher lock poisoned").take() {
			handle.abort();
		}
	}
}

/// Consumes provider notifications and keeps the connection consistent.
///
/// A session is bound to one address on one supported chain, so an account
/// change or a move to an unknown chain invalidates it.
async fn watch_provider(
	mut receiver: broadcast::Receiver<ProviderEvent>,
	connection: Arc<RwLock<WalletConnection>>,
	registry: Arc<NetworkRegistry>,
	events: broadcast::Sender<ConnectorEvent>,
) {
	while let Ok(event) = receiver.recv().await {
		match event {
			ProviderEvent::AccountsChanged(accounts) => match accounts.first().copied() {
				None => {
					tracing::info!("Wallet access revoked by provider");
					{
						let mut conn = connection.write().expect("connection lock poisoned");
						*conn = WalletConnection::disconnected();
					}
					events
						.send(ConnectorEvent::StatusChanged(ConnectionStatus::Disconnected))
						.ok();
					events
						.send(ConnectorEvent::SessionInvalidated(
							InvalidationReason::AccountChanged,
						))
						.ok();
					// Access is gone; nothing further to watch.
					return;
				},
				Some(next) => {
					let changed = {
						let mut conn = connection.write().expect("connection lock poisoned");
						let changed = conn.address != Some(next);
						if changed {
							conn.address = Some(next);
							conn.authenticated = false;
						}
						changed
					};
					if changed {
						tracing::info!(address = %next, "Active account changed");
						events.send(ConnectorEvent::AddressChanged(next)).ok();
						events
							.send(ConnectorEvent::SessionInvalidated(
								InvalidationReason::AccountChanged,
							))
							.ok();
					}
				},
			},
			ProviderEvent::ChainChanged(chain_id) => {
				if registry.get(chain_id).is_some() {
					let mut conn = connection.write().expect("connection lock poisoned");
					conn.chain_id = Some(chain_id);
				} else {
					tracing::warn!(chain_id, "Provider moved to an unsupported chain");
					{
						let mut conn = connection.write().expect("connection lock poisoned");
						conn.status = ConnectionStatus::Error;
						conn.error = Some(format!("Chain {} is not supported", chain_id));
						conn.authenticated = false;
					}
					events
						.send(ConnectorEvent::StatusChanged(ConnectionStatus::Error))
						.ok();
					events
						.send(ConnectorEvent::SessionInvalidated(
							InvalidationReason::UnsupportedChain(chain_id),
						))
						.ok();
				}
			},
		}
	}
}
