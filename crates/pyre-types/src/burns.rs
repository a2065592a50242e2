//! Burn request, proof and record types.
//!
//! A `BurnRequest` is transient, created per orchestration call; a
//! `BurnRecord` is what the backend persists once a confirmed burn has been
//! registered, and what history views read back.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Parameters of one burn action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnRequest {
	/// Non-empty set of token ids to destroy.
	pub token_ids: Vec<String>,
	pub token_address: Address,
	pub wallet_address: Address,
	pub is_batch: bool,
}

/// Proof format of an on-chain burn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum BurnProofKind {
	#[serde(rename = "evm")]
	Evm,
}

/// Evidence that a burn landed on chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BurnProof {
	#[serde(rename = "type")]
	pub kind: BurnProofKind,
	#[serde(rename = "txHash")]
	pub tx_hash: String,
}

impl BurnProof {
	pub fn evm(tx_hash: impl Into<String>) -> Self {
		Self {
			kind: BurnProofKind::Evm,
			tx_hash: tx_hash.into(),
		}
	}
}

/// A registered burn as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRecord {
	pub token_ids: Vec<String>,
	pub chain: String,
	pub wallet_address: Address,
	pub burn_proof: BurnProof,
	/// Registration time as Unix seconds.
	pub timestamp: i64,
}
