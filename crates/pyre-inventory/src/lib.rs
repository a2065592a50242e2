//! Collection inventory module for the pyre burn/mint client.
//!
//! This module turns raw indexer pages into the deduplicated, grouped view
//! of what a wallet owns, and tracks the selection and approval state the
//! orchestration layer consumes. Selection is cleared whenever the owning
//! wallet disconnects or the session ends; the embedder wires that through
//! [`CollectionInventory::clear`].

use alloy_primitives::Address;
use pyre_chain::{ChainError, ChainService};
use pyre_types::{Asset, Collection, truncate_id};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub mod indexer;

pub use indexer::{AssetPage, HttpIndexer, IndexerError, IndexerInterface, sanitize_image_url};

/// Pages fetched per listing before the walk is cut short. A safety valve
/// against a provider that never stops returning cursors.
const MAX_PAGES: usize = 100;

/// Errors raised by inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
	/// The indexing provider failed persistently (retries exhausted).
	#[error("Indexing failed: {0}")]
	Indexing(#[from] IndexerError),
	/// An on-chain read failed.
	#[error(transparent)]
	Chain(#[from] ChainError),
}

#[derive(Default)]
struct InventoryState {
	/// Selected assets, keyed by `(token_address, token_id)`.
	selection: HashSet<(Address, String)>,
	/// Latest known batch-operator approval per collection.
	approvals: HashMap<Address, bool>,
}

/// Queries, groups and tracks the assets a wallet owns.
pub struct CollectionInventory {
	indexer: Arc<dyn IndexerInterface>,
	chain: Arc<ChainService>,
	state: Mutex<InventoryState>,
}

impl CollectionInventory {
	pub fn new(indexer: Arc<dyn IndexerInterface>, chain: Arc<ChainService>) -> Self {
		Self {
			indexer,
			chain,
			state: Mutex::new(InventoryState::default()),
		}
	}

	/// Lists everything `owner` holds on `chain_id`, grouped by contract.
	///
	/// Pages through the indexer until it reports no further cursor,
	/// deduplicating by `(token_address, token_id)` -- an asset referenced
	/// by two pages appears exactly once. Collections come back in
	/// first-seen order with a derived display name.
	pub async fn list_collections(
		&self,
		owner: Address,
		chain_id: u64,
	) -> Result<Vec<Collection>, InventoryError> {
		let mut seen: HashSet<(Address, String)> = HashSet::new();
		let mut order: Vec<Address> = Vec::new();
		let mut grouped: HashMap<Address, Vec<Asset>> = HashMap::new();
		let mut names: HashMap<Address, String> = HashMap::new();

		let mut page_key: Option<String> = None;
		let mut pages = 0;
		loop {
			let page = self
				.indexer
				.owned_assets_page(owner, chain_id, page_key.clone())
				.await?;
			pages += 1;

			for (address, name) in page.collection_names {
				names.entry(address).or_insert(name);
			}

			for asset in page.assets {
				let key = (asset.token_address, asset.token_id.clone());
				if !seen.insert(key) {
					continue;
				}
				if !grouped.contains_key(&asset.token_address) {
					order.push(asset.token_address);
				}
				grouped.entry(asset.token_address).or_default().push(asset);
			}

			page_key = page.page_key;
			if page_key.is_none() {
				break;
			}
			if pages >= MAX_PAGES {
				tracing::warn!(owner = %owner, chain_id, pages, "Stopping pagination early; indexer kept returning cursors");
				break;
			}
		}

		tracing::debug!(
			owner = %owner,
			chain_id,
			collections = order.len(),
			assets = seen.len(),
			"Inventory listed"
		);

		Ok(order
			.into_iter()
			.map(|address| {
				let name = names
					.get(&address)
					.cloned()
					.unwrap_or_else(|| truncate_id(&address.to_string()));
				Collection {
					contract_address: address,
					name,
					items: grouped.remove(&address).unwrap_or_default(),
				}
			})
			.collect())
	}

	/// Reads whether the batch operator is approved for `collection`.
	///
	/// Idempotent on-chain read; the latest answer is cached per collection
	/// for synchronous UI reads via [`CollectionInventory::approval_cached`].
	pub async fn check_approval(
		&self,
		owner: Address,
		collection: Address,
		chain_id: u64,
	) -> Result<bool, InventoryError> {
		let operator = self.chain.registry().batch_operator(chain_id).map_err(ChainError::from)?;
		let approved = self
			.chain
			.is_approved_for_all(chain_id, collection, owner, operator)
			.await?;

		self.state
			.lock()
			.expect("inventory state lock poisoned")
			.approvals
			.insert(collection, approved);
		Ok(approved)
	}

	/// Latest known approval state for a collection, if ever checked.
	pub fn approval_cached(&self, collection: Address) -> Option<bool> {
		self.state
			.lock()
			.expect("inventory state lock poisoned")
			.approvals
			.get(&collection)
			.copied()
	}

	/// Toggles an asset in or out of the selection. Returns the new state.
	pub fn toggle_selection(&self, token_address: Address, token_id: &str) -> bool {
		let mut state = self.state.lock().expect("inventory state lock poisoned");
		let key = (token_address, token_id.to_string());
		if state.selection.remove(&key) {
			false
		} else {
			state.selection.insert(key);
			true
		}
	}

	/// Snapshot of the selected `(token_address, token_id)` pairs.
	pub fn selected(&self) -> Vec<(Address, String)> {
		self.state
			.lock()
			.expect("inventory state lock poisoned")
			.selection
			.iter()
			.cloned()
			.collect()
	}

	/// Drops selection and approval state.
	///
	/// Called when the owning wallet disconnects or the session ends.
	pub fn clear(&self) {
		let mut state = self.state.lock().expect("inventory state lock poisoned");
		state.selection.clear();
		state.approvals.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::{address, Bytes, TxHash};
	use alloy_sol_types::SolValue;
	use async_trait::async_trait;
	use pyre_chain::{ChainInterface, ChainReceipt, ChainTransaction};
	use pyre_types::{
		AssetKind, ContractAddresses, NativeCurrency, NetworkConfig, NetworkRegistry,
	};
	use std::sync::Mutex as StdMutex;
	use std::time::Duration;

	const OWNER: Address = address!("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
	const NFT: Address = address!("85be9de7a369850a964616a2c04d79000d168dea");
	const OTHER: Address = address!("CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC");
	const OPERATOR: Address = address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f");

	fn asset(contract: Address, id: &str) -> Asset {
		Asset {
			token_id: id.to_string(),
			token_address: contract,
			name: format!("NFT #{}", id),
			description: String::new(),
			image_url: String::new(),
			kind: AssetKind::SingleOwner,
			balance: 1,
		}
	}

	struct FakeIndexer {
		pages: StdMutex<Vec<AssetPage>>,
	}

	impl FakeIndexer {
		fn new(pages: Vec<AssetPage>) -> Self {
			Self {
				pages: StdMutex::new(pages),
			}
		}
	}

	#[async_trait]
	impl IndexerInterface for FakeIndexer {
		async fn owned_assets_page(
			&self,
			_owner: Address,
			_chain_id: u64,
			_page_key: Option<String>,
		) -> Result<AssetPage, IndexerError> {
			let mut pages = self.pages.lock().unwrap();
			if pages.is_empty() {
				return Err(IndexerError::Http("no more pages".to_string()));
			}
			Ok(pages.remove(0))
		}
	}

	struct StaticChain {
		response: Vec<u8>,
	}

	#[async_trait]
	impl ChainInterface for StaticChain {
		async fn call(&self, _tx: ChainTransaction) -> Result<Bytes, pyre_chain::ChainError> {
			Ok(Bytes::from(self.response.clone()))
		}

		async fn submit(&self, _tx: ChainTransaction) -> Result<TxHash, pyre_chain::ChainError> {
			unimplemented!("inventory never submits")
		}

		async fn wait_for_confirmation(
			&self,
			_tx_hash: TxHash,
			_chain_id: u64,
			_timeout: Duration,
		) -> Result<ChainReceipt, pyre_chain::ChainError> {
			unimplemented!("inventory never submits")
		}

		async fn get_receipt(
			&self,
			_tx_hash: TxHash,
			_chain_id: u64,
		) -> Result<ChainReceipt, pyre_chain::ChainError> {
			unimplemented!("inventory never submits")
		}
	}

	fn registry(batch_operator: Option<Address>) -> Arc<NetworkRegistry> {
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
					burn_address: address!("4D483FB9Aa883956f05fb1CF0746B04e93170D13"),
					batch_operator,
					mint: None,
				},
			},
		);
		Arc::new(NetworkRegistry::new(networks))
	}

	fn chain_service(approved: bool, batch_operator: Option<Address>) -> Arc<ChainService> {
		Arc::new(ChainService::new(
			Arc::new(StaticChain {
				response: (approved,).abi_encode_params(),
			}),
			registry(batch_operator),
		))
	}

	fn page(assets: Vec<Asset>, page_key: Option<&str>) -> AssetPage {
		AssetPage {
			assets,
			collection_names: HashMap::new(),
			page_key: page_key.map(str::to_string),
		}
	}

	#[tokio::test]
	async fn deduplicates_across_page_boundary() {
		// Token 2 appears on both sides of the pageKey split.
		let indexer = Arc::new(FakeIndexer::new(vec![
			page(vec![asset(NFT, "1"), asset(NFT, "2")], Some("p2")),
			page(vec![asset(NFT, "2"), asset(NFT, "3")], None),
		]));
		let inventory = CollectionInventory::new(indexer, chain_service(true, Some(OPERATOR)));

		let collections = inventory.list_collections(OWNER, 137).await.unwrap();

		assert_eq!(collections.len(), 1);
		let ids: Vec<&str> = collections[0]
			.items
			.iter()
			.map(|a| a.token_id.as_str())
			.collect();
		assert_eq!(ids, vec!["1", "2", "3"]);
	}

	#[tokio::test]
	async fn groups_by_contract_in_first_seen_order() {
		let mut names = HashMap::new();
		names.insert(NFT, "Relics".to_string());
		let indexer = Arc::new(FakeIndexer::new(vec![AssetPage {
			assets: vec![asset(NFT, "1"), asset(OTHER, "9"), asset(NFT, "2")],
			collection_names: names,
			page_key: None,
		}]));
		let inventory = CollectionInventory::new(indexer, chain_service(true, Some(OPERATOR)));

		let collections = inventory.list_collections(OWNER, 137).await.unwrap();

		assert_eq!(collections.len(), 2);
		assert_eq!(collections[0].contract_address, NFT);
		assert_eq!(collections[0].name, "Relics");
		assert_eq!(collections[0].items.len(), 2);
		// No indexer-reported name: derived from the address.
		assert_eq!(collections[1].contract_address, OTHER);
		assert!(collections[1].name.starts_with("0x"));
	}

	#[tokio::test]
	async fn indexer_failure_surfaces_as_indexing_error() {
		let indexer = Arc::new(FakeIndexer::new(vec![]));
		let inventory = CollectionInventory::new(indexer, chain_service(true, Some(OPERATOR)));

		let err = inventory.list_collections(OWNER, 137).await.unwrap_err();
		assert!(matches!(err, InventoryError::Indexing(_)));
	}

	#[tokio::test]
	async fn check_approval_reads_and_caches() {
		let indexer = Arc::new(FakeIndexer::new(vec![]));
		let inventory = CollectionInventory::new(indexer, chain_service(true, Some(OPERATOR)));

		assert_eq!(inventory.approval_cached(NFT), None);
		assert!(inventory.check_approval(OWNER, NFT, 137).await.unwrap());
		assert_eq!(inventory.approval_cached(NFT), Some(true));

		// Re-invoking is safe and refreshes the cache.
		assert!(inventory.check_approval(OWNER, NFT, 137).await.unwrap());
	}

	#[tokio::test]
	async fn check_approval_without_batch_operator_fails() {
		let indexer = Arc::new(FakeIndexer::new(vec![]));
		let inventory = CollectionInventory::new(indexer, chain_service(true, None));

		let err = inventory.check_approval(OWNER, NFT, 137).await.unwrap_err();
		assert!(matches!(err, InventoryError::Chain(_)));
	}

	#[tokio::test]
	async fn selection_toggles_and_clears() {
		let indexer = Arc::new(FakeIndexer::new(vec![]));
		let inventory = CollectionInventory::new(indexer, chain_service(true, Some(OPERATOR)));

		assert!(inventory.toggle_selection(NFT, "1"));
		assert!(inventory.toggle_selection(NFT, "2"));
		assert!(!inventory.toggle_selection(NFT, "1"));
		assert_eq!(inventory.selected().len(), 1);

		inventory.check_approval(OWNER, NFT, 137).await.unwrap();
		inventory.clear();
		assert!(inventory.selected().is_empty());
		assert_eq!(inventory.approval_cached(NFT), None);
	}
}
