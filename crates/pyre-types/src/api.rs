//! Backend API request and response structures.
//!
//! Wire shapes for the HTTP surface consumed by this client. All payloads
//! are JSON with camelCase field names.

use crate::burns::{BurnProof, BurnRecord};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// `POST /auth/challenge` request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChallengeRequest {
	pub address: Address,
}

/// `POST /auth/login` request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginRequest {
	pub address: Address,
	/// Hex-encoded signature over the challenge code.
	pub signature: String,
	/// Chain slug the login is scoped to (e.g. "polygon").
	pub chain: String,
}

/// `POST /auth/login` response body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
	pub access_token: String,
}

/// `POST /burns/register` request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBurnRequest {
	pub token_ids: Vec<String>,
	pub chain: String,
	pub wallet_address: Address,
	pub burn_proof: BurnProof,
	pub collection_contract_address: Address,
}

/// `GET /burns` response body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BurnsResponse {
	pub items: Vec<BurnRecord>,
}

/// `GET /collections/{id}/nfts/{tokenId}/mint-signature` response body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MintSignatureResponse {
	/// Hex-encoded allowlist authorization signature.
	pub signature: String,
}

/// `POST /collections/{id}/nfts/{tokenId}/mint` request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MintRequest {
	pub quantity: u64,
}

/// `POST /collections/{id}/nfts/{tokenId}/mint` response body.
///
/// The backend reports either a list of mint transactions or a single hash,
/// depending on how the mint was executed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintResponse {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mint_txs: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transaction_hash: Option<String>,
}
