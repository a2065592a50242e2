//! Challenge-response authentication.
//!
//! Orchestrates the three-step exchange: obtain a one-time challenge for an
//! address, have the wallet sign it, and trade the signature for a session
//! token. The challenge is consumed exactly once and never stored; on any
//! failure no partial credential survives.

use crate::{SessionError, SessionLifecycleManager};
use alloy_primitives::Address;
use pyre_api::{ApiClient, ApiError};
use pyre_types::{LoginRequest, Session};
use pyre_wallet::{ProviderError, WalletConnector, WalletProvider};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors raised during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
	/// The backend refused to issue a challenge.
	#[error("Challenge request failed: {0}")]
	ChallengeRequest(String),
	/// The backend reported the challenge as stale; retry from the
	/// challenge step.
	#[error("Challenge expired, request a new one")]
	ChallengeExpired,
	/// The user declined to sign the challenge.
	#[error("Signature request rejected by the user")]
	SignatureRejected,
	/// The backend rejected the signature.
	#[error("Signature rejected by the backend")]
	InvalidSignature,
	/// Another authentication attempt is already running for this address.
	#[error("Authentication already in progress for {0}")]
	AlreadyAuthenticating(Address),
	#[error(transparent)]
	Session(#[from] SessionError),
	#[error("Authentication failed: {0}")]
	Other(String),
}

/// Removes the address from the in-flight set on every exit path.
struct InFlightGuard {
	in_flight: Arc<Mutex<HashSet<Address>>>,
	address: Address,
}

impl InFlightGuard {
	fn acquire(
		in_flight: &Arc<Mutex<HashSet<Address>>>,
		address: Address,
	) -> Result<Self, AuthError> {
		let mut set = in_flight.lock().expect("in-flight lock poisoned");
		if !set.insert(address) {
			return Err(AuthError::AlreadyAuthenticating(address));
		}
		Ok(Self {
			in_flight: Arc::clone(in_flight),
			address,
		})
	}
}

impl Drop for InFlightGuard {
	fn drop(&mut self) {
		self.in_flight
			.lock()
			.expect("in-flight lock poisoned")
			.remove(&self.address);
	}
}

/// Drives the challenge/sign/login exchange and hands the resulting token
/// to the session lifecycle manager.
pub struct ChallengeAuthenticator {
	api: Arc<ApiClient>,
	provider: Arc<dyn WalletProvider>,
	session: SessionLifecycleManager,
	connector: Option<Arc<WalletConnector>>,
	in_flight: Arc<Mutex<HashSet<Address>>>,
}

impl ChallengeAuthenticator {
	pub fn new(
		api: Arc<ApiClient>,
		provider: Arc<dyn WalletProvider>,
		session: SessionLifecycleManager,
	) -> Self {
		Self {
			api,
			provider,
			session,
			connector: None,
			in_flight: Arc::new(Mutex::new(HashSet::new())),
		}
	}

	/// Drives the wallet connector's status through the
	/// `authenticating -> connected(authenticated)` transitions.
	pub fn with_connector(mut self, connector: Arc<WalletConnector>) -> Self {
		self.connector = Some(connector);
		self
	}

	/// Requests a fresh challenge for an address.
	pub async fn request_challenge(
		&self,
		address: Address,
	) -> Result<pyre_types::Challenge, AuthError> {
		self.api
			.request_challenge(address)
			.await
			.map_err(|e| AuthError::ChallengeRequest(e.to_string()))
	}

	/// Runs the full challenge/sign/login exchange for `address`.
	///
	/// Exactly one attempt may be in flight per address; a concurrent call
	/// fails fast with [`AuthError::AlreadyAuthenticating`] instead of
	/// racing. On success the session manager owns the token and its
	/// timers; on failure any stored credential is removed.
	pub async fn authenticate(&self, address: Address, chain: &str) -> Result<Session, AuthError> {
		let _guard = InFlightGuard::acquire(&self.in_flight, address)?;

		if let Some(connector) = &self.connector {
			connector
				.mark_authenticating()
				.map_err(|e| AuthError::Other(e.to_string()))?;
		}

		let result = self.exchange(address, chain).await;

		match &result {
			Ok(session) => {
				tracing::info!(address = %address, expires_at = session.expires_at, "Authenticated");
				if let Some(connector) = &self.connector {
					connector.mark_authenticated(true);
				}
			},
			Err(err) => {
				tracing::warn!(address = %address, error = %err, "Authentication failed");
				// No partial session survives a failed attempt.
				self.session.logout().await;
				if let Some(connector) = &self.connector {
					connector.mark_authenticated(false);
				}
			},
		}

		result
	}

	async fn exchange(&self, address: Address, chain: &str) -> Result<Session, AuthError> {
		let challenge = self.request_challenge(address).await?;

		let signature = self
			.provider
			.sign_message(address, challenge.code.as_bytes())
			.await
			.map_err(|e| match e {
				ProviderError::UserRejected => AuthError::SignatureRejected,
				other => AuthError::Other(other.to_string()),
			})?;

		let login = LoginRequest {
			address,
			signature,
			chain: chain.to_string(),
		};
		let response = self.api.login(&login).await.map_err(classify_login_error)?;

		Ok(self.session.start(&response.access_token, address).await?)
	}
}

/// Maps backend login rejections onto the authentication taxonomy.
fn classify_login_error(err: ApiError) -> AuthError {
	match &err {
		ApiError::Unauthorized { .. } => AuthError::InvalidSignature,
		ApiError::Status { status, body } => {
			if *status == 410 || body.to_ascii_lowercase().contains("challenge expired") {
				AuthError::ChallengeExpired
			} else {
				AuthError::Other(err.to_string())
			}
		},
		_ => AuthError::Other(err.to_string()),
	}
}
