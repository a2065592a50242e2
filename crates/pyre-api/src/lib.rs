//! Backend HTTP client for the pyre burn/mint client.
//!
//! This module provides the typed client for the backend surface: challenge
//! issuance, challenge/signature login, burn registration and history, and
//! the mint endpoints. All bearer-authenticated calls take the session token
//! explicitly; the client itself holds no credential state.

use alloy_primitives::Address;
use pyre_types::{
	BurnRecord, BurnsResponse, Challenge, ChallengeRequest, LoginRequest, LoginResponse,
	MintRequest, MintResponse, MintSignatureResponse, RegisterBurnRequest,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

pub mod retry;

pub use retry::{FetchError, FetchResponse, RetryingFetcher};

/// Errors raised by backend API calls.
#[derive(Debug, Error)]
pub enum ApiError {
	/// Transport failure or exhausted rate-limit retries.
	#[error(transparent)]
	Fetch(#[from] FetchError),
	/// The backend rejected the credential (401/403).
	#[error("Request unauthorized ({status}): {body}")]
	Unauthorized { status: u16, body: String },
	/// Any other non-success status.
	#[error("Request failed with status {status}: {body}")]
	Status { status: u16, body: String },
	/// The response body did not match the expected shape.
	#[error("Failed to decode response: {0}")]
	Decode(#[from] serde_json::Error),
}

impl ApiError {
	/// Status code of the rejected response, when one was received.
	pub fn status(&self) -> Option<u16> {
		match self {
			ApiError::Unauthorized { status, .. } | ApiError::Status { status, .. } => Some(*status),
			_ => None,
		}
	}
}

/// Typed client for the backend HTTP surface.
#[derive(Clone)]
pub struct ApiClient {
	client: Client,
	base_url: String,
	fetcher: RetryingFetcher,
}

impl ApiClient {
	pub fn new(base_url: impl Into<String>) -> Self {
		let client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("Failed to build HTTP client");

		Self {
			client,
			base_url: base_url.into(),
			fetcher: RetryingFetcher::default(),
		}
	}

	/// Overrides the retry policy (mainly for tests).
	pub fn with_fetcher(mut self, fetcher: RetryingFetcher) -> Self {
		self.fetcher = fetcher;
		self
	}

	/// Requests a one-time challenge for an address to sign.
	pub async fn request_challenge(&self, address: Address) -> Result<Challenge, ApiError> {
		let url = format!("{}/auth/challenge", self.base_url);
		let body = ChallengeRequest { address };

		tracing::debug!(address = %address, "Requesting authentication challenge");
		self.execute_json(|| self.client.post(&url).json(&body).send())
			.await
	}

	/// Exchanges a signed challenge for a session token.
	pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
		let url = format!("{}/auth/login", self.base_url);

		tracing::debug!(address = %request.address, chain = %request.chain, "Logging in");
		self.execute_json(|| self.client.post(&url).json(request).send())
			.await
	}

	/// Lists registered burns for a wallet.
	pub async fn list_burns(
		&self,
		token: &str,
		wallet_address: Address,
		limit: u32,
	) -> Result<BurnsResponse, ApiError> {
		let url = format!("{}/burns", self.base_url);
		let query = [
			("walletAddress", wallet_address.to_string()),
			("limit", limit.to_string()),
		];

		self.execute_json(|| {
			self.client
				.get(&url)
				.query(&query)
				.bearer_auth(token)
				.send()
		})
		.await
	}

	/// Registers a confirmed on-chain burn.
	///
	/// Safe to call again with the same transaction hash; the on-chain
	/// effect is final and idempotent to re-report.
	pub async fn register_burn(
		&self,
		token: &str,
		request: &RegisterBurnRequest,
	) -> Result<BurnRecord, ApiError> {
		let url = format!("{}/burns/register", self.base_url);

		tracing::info!(
			tx_hash = %request.burn_proof.tx_hash,
			token_count = request.token_ids.len(),
			"Registering burn"
		);
		self.execute_json(|| self.client.post(&url).json(request).bearer_auth(token).send())
			.await
	}

	/// Fetches a mint authorization signature for an allowlisted token.
	pub async fn mint_signature(
		&self,
		token: &str,
		collection_id: &str,
		token_id: &str,
		wallet: Address,
		chain_id: u64,
		contract_address: Address,
		quantity: u64,
	) -> Result<MintSignatureResponse, ApiError> {
		let url = format!(
			"{}/collections/{}/nfts/{}/mint-signature",
			self.base_url, collection_id, token_id
		);
		let query = [
			("wallet", wallet.to_string()),
			("chainId", chain_id.to_string()),
			("contractAddress", contract_address.to_string()),
			("quantity", quantity.to_string()),
		];

		self.execute_json(|| {
			self.client
				.get(&url)
				.query(&query)
				.bearer_auth(token)
				.send()
		})
		.await
	}

	/// Reports a mint to the backend.
	pub async fn register_mint(
		&self,
		token: &str,
		collection_id: &str,
		token_id: &str,
		quantity: u64,
	) -> Result<MintResponse, ApiError> {
		let url = format!(
			"{}/collections/{}/nfts/{}/mint",
			self.base_url, collection_id, token_id
		);
		let body = MintRequest { quantity };

		self.execute_json(|| self.client.post(&url).json(&body).bearer_auth(token).send())
			.await
	}

	async fn execute_json<T, F, Fut>(&self, request: F) -> Result<T, ApiError>
	where
		T: DeserializeOwned,
		F: FnMut() -> Fut,
		Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
	{
		let response = self.fetcher.send(request).await?;

		if response.status == StatusCode::UNAUTHORIZED || response.status == StatusCode::FORBIDDEN {
			return Err(ApiError::Unauthorized {
				status: response.status.as_u16(),
				body: response.body,
			});
		}
		if !response.is_success() {
			return Err(ApiError::Status {
				status: response.status.as_u16(),
				body: response.body,
			});
		}

		Ok(serde_json::from_str(&response.body)?)
	}
}
