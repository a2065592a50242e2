//! Owned-asset and collection types.
//!
//! Assets are produced by the inventory layer from indexer responses and
//! grouped by contract address into collections for display and selection.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Ownership model of a token standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum AssetKind {
	/// ERC-721 style: one owner per token id.
	SingleOwner,
	/// ERC-1155 style: fungible balance per token id.
	MultiOwner,
}

/// A single owned token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Asset {
	pub token_id: String,
	pub token_address: Address,
	pub name: String,
	pub description: String,
	pub image_url: String,
	pub kind: AssetKind,
	/// Owned balance; always 1 for single-owner tokens.
	pub balance: u64,
}

impl Asset {
	/// Identity used for dedup across indexer pages.
	pub fn key(&self) -> (Address, &str) {
		(self.token_address, self.token_id.as_str())
	}
}

/// A group of assets sharing a contract address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Collection {
	pub contract_address: Address,
	pub name: String,
	/// Assets in first-seen order.
	pub items: Vec<Asset>,
}
