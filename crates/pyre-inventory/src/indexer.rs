//! NFT indexing service client.
//!
//! Queries an external indexer for the assets an address owns, one page at
//! a time. The HTTP implementation targets an Alchemy-style
//! `getNFTsForOwner` endpoint and goes through the retrying fetcher, since
//! indexers are the one dependency that rate-limits aggressively.

use alloy_primitives::Address;
use async_trait::async_trait;
use pyre_api::{FetchError, RetryingFetcher};
use pyre_types::{Asset, AssetKind, NetworkRegistry};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by indexer queries.
#[derive(Debug, Error)]
pub enum IndexerError {
	/// Retries were exhausted against the provider's rate limit.
	#[error("Indexer rate limited after retries")]
	RateLimited,
	/// Transport or provider failure.
	#[error("Indexer request failed: {0}")]
	Http(String),
	/// The provider answered with an unexpected shape.
	#[error("Indexer response invalid: {0}")]
	Decode(String),
	/// No indexer endpoint is configured for the chain.
	#[error("No indexer configured for chain {0}")]
	Unconfigured(u64),
}

impl From<FetchError> for IndexerError {
	fn from(err: FetchError) -> Self {
		match err {
			FetchError::RateLimited(_) => IndexerError::RateLimited,
			other => IndexerError::Http(other.to_string()),
		}
	}
}

/// One page of owned assets.
#[derive(Debug, Clone)]
pub struct AssetPage {
	pub assets: Vec<Asset>,
	/// Contract display names reported alongside the assets.
	pub collection_names: HashMap<Address, String>,
	/// Cursor for the next page; `None` means this was the last page.
	pub page_key: Option<String>,
}

/// Trait defining the interface for owned-asset indexers.
#[async_trait]
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait IndexerInterface: Send + Sync {
	/// Fetches one page of assets owned by `owner` on `chain_id`.
	async fn owned_assets_page(
		&self,
		owner: Address,
		chain_id: u64,
		page_key: Option<String>,
	) -> Result<AssetPage, IndexerError>;
}

/// Rewrites indexer image URLs into something directly fetchable.
pub fn sanitize_image_url(url: &str) -> String {
	if let Some(path) = url.strip_prefix("ipfs://") {
		return format!("https://ipfs.io/ipfs/{}", path);
	}
	if url.starts_with('/') {
		return format!("https://nft-cdn.alchemy.com{}", url);
	}
	url.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnedNftsResponse {
	#[serde(default)]
	owned_nfts: Vec<IndexedNft>,
	#[serde(default)]
	page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexedNft {
	token_id: String,
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	title: Option<String>,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	balance: Option<String>,
	#[serde(default)]
	image: Option<IndexedImage>,
	#[serde(default)]
	raw_metadata: Option<RawMetadata>,
	#[serde(default)]
	contract: Option<IndexedContract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexedImage {
	#[serde(default)]
	cached_url: Option<String>,
	#[serde(default)]
	thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
	#[serde(default)]
	image: Option<String>,
	#[serde(default)]
	description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexedContract {
	#[serde(default)]
	address: Option<Address>,
	#[serde(default)]
	name: Option<String>,
}

/// HTTP indexer client.
pub struct HttpIndexer {
	client: reqwest::Client,
	fetcher: RetryingFetcher,
	registry: Arc<NetworkRegistry>,
	api_key: String,
}

impl HttpIndexer {
	pub fn new(registry: Arc<NetworkRegistry>, api_key: impl Into<String>) -> Self {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("Failed to build HTTP client");

		Self {
			client,
			fetcher: RetryingFetcher::default(),
			registry,
			api_key: api_key.into(),
		}
	}

	pub fn with_fetcher(mut self, fetcher: RetryingFetcher) -> Self {
		self.fetcher = fetcher;
		self
	}

	fn map_nft(&self, nft: IndexedNft, default_contract: Address) -> (Asset, Option<String>) {
		let contract_address = nft
			.contract
			.as_ref()
			.and_then(|c| c.address)
			.unwrap_or(default_contract);
		let contract_name = nft.contract.and_then(|c| c.name);

		// Best available image, in order of preference.
		let image_url = nft
			.image
			.as_ref()
			.and_then(|i| i.cached_url.clone())
			.or_else(|| nft.image.as_ref().and_then(|i| i.thumbnail_url.clone()))
			.or_else(|| nft.raw_metadata.as_ref().and_then(|m| m.image.clone()))
			.unwrap_or_default();

		let kind = match nft.token_type.as_deref() {
			Some("ERC1155") => AssetKind::MultiOwner,
			_ => AssetKind::SingleOwner,
		};
		let balance = match kind {
			AssetKind::SingleOwner => 1,
			AssetKind::MultiOwner => nft
				.balance
				.as_deref()
				.and_then(|b| b.parse::<u64>().ok())
				.unwrap_or(1),
		};

		let asset = Asset {
			name: nft
				.name
				.or(nft.title)
				.unwrap_or_else(|| format!("NFT #{}", nft.token_id)),
			description: nft
				.description
				.or_else(|| nft.raw_metadata.and_then(|m| m.description))
				.unwrap_or_default(),
			image_url: sanitize_image_url(&image_url),
			token_id: nft.token_id,
			token_address: contract_address,
			kind,
			balance,
		};
		(asset, contract_name)
	}
}

#[async_trait]
impl IndexerInterface for HttpIndexer {
	async fn owned_assets_page(
		&self,
		owner: Address,
		chain_id: u64,
		page_key: Option<String>,
	) -> Result<AssetPage, IndexerError> {
		let network = self
			.registry
			.get(chain_id)
			.ok_or(IndexerError::Unconfigured(chain_id))?;
		let base_url = network
			.indexer_url
			.as_deref()
			.ok_or(IndexerError::Unconfigured(chain_id))?;
		let nft_contract = network.contracts.nft;

		let url = format!(
			"{}/{}/getNFTsForOwner",
			base_url.trim_end_matches('/'),
			self.api_key
		);
		let mut query = vec![
			("owner".to_string(), owner.to_string()),
			("withMetadata".to_string(), "true".to_string()),
			("contractAddresses[]".to_string(), nft_contract.to_string()),
		];
		if let Some(key) = &page_key {
			query.push(("pageKey".to_string(), key.clone()));
		}

		tracing::debug!(owner = %owner, chain_id, page_key = ?page_key, "Fetching owned assets page");
		let response = self
			.fetcher
			.send(|| self.client.get(&url).query(&query).send())
			.await?;

		if !response.is_success() {
			return Err(IndexerError::Http(format!(
				"status {}: {}",
				response.status, response.body
			)));
		}

		let parsed: OwnedNftsResponse =
			serde_json::from_str(&response.body).map_err(|e| IndexerError::Decode(e.to_string()))?;

		let mut assets = Vec::with_capacity(parsed.owned_nfts.len());
		let mut collection_names = HashMap::new();
		for nft in parsed.owned_nfts {
			let (asset, contract_name) = self.map_nft(nft, nft_contract);
			if let Some(name) = contract_name {
				collection_names.entry(asset.token_address).or_insert(name);
			}
			assets.push(asset);
		}

		Ok(AssetPage {
			assets,
			collection_names,
			page_key: parsed.page_key,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::address;
	use pyre_types::{ContractAddresses, NativeCurrency, NetworkConfig};
	use serde_json::json;
	use wiremock::matchers::{method, path, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	const OWNER: Address = address!("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
	const NFT: Address = address!("85be9de7a369850a964616a2c04d79000d168dea");

	fn registry(indexer_url: Option<String>) -> Arc<NetworkRegistry> {
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
				indexer_url,
				contracts: ContractAddresses {
					nft: NFT,
					burn_address: address!("4D483FB9Aa883956f05fb1CF0746B04e93170D13"),
					batch_operator: None,
					mint: None,
				},
			},
		);
		Arc::new(NetworkRegistry::new(networks))
	}

	#[test]
	fn sanitize_handles_ipfs_relative_and_plain() {
		assert_eq!(
			sanitize_image_url("ipfs://QmHash/1.png"),
			"https://ipfs.io/ipfs/QmHash/1.png"
		);
		assert_eq!(
			sanitize_image_url("/images/7.png"),
			"https://nft-cdn.alchemy.com/images/7.png"
		);
		assert_eq!(
			sanitize_image_url("https://example.com/a.png"),
			"https://example.com/a.png"
		);
		assert_eq!(sanitize_image_url(""), "");
	}

	#[tokio::test]
	async fn fetches_and_maps_a_page() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/test-key/getNFTsForOwner"))
			.and(query_param("owner", OWNER.to_string()))
			.and(query_param("withMetadata", "true"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"ownedNfts": [
					{
						"tokenId": "1",
						"name": "Relic #1",
						"description": "First relic",
						"tokenType": "ERC721",
						"image": {"cachedUrl": "ipfs://QmHash/1.png"},
						"contract": {"address": NFT.to_string(), "name": "Relics"}
					},
					{
						"tokenId": "2",
						"tokenType": "ERC1155",
						"balance": "4",
						"rawMetadata": {"image": "/img/2.png", "description": "raw"}
					}
				],
				"pageKey": "next-page",
			})))
			.expect(1)
			.mount(&server)
			.await;

		let indexer = HttpIndexer::new(registry(Some(server.uri())), "test-key");
		let page = indexer.owned_assets_page(OWNER, 137, None).await.unwrap();

		assert_eq!(page.page_key.as_deref(), Some("next-page"));
		assert_eq!(page.assets.len(), 2);

		let first = &page.assets[0];
		assert_eq!(first.name, "Relic #1");
		assert_eq!(first.kind, AssetKind::SingleOwner);
		assert_eq!(first.balance, 1);
		assert_eq!(first.image_url, "https://ipfs.io/ipfs/QmHash/1.png");

		let second = &page.assets[1];
		assert_eq!(second.name, "NFT #2");
		assert_eq!(second.kind, AssetKind::MultiOwner);
		assert_eq!(second.balance, 4);
		assert_eq!(second.description, "raw");
		assert_eq!(second.image_url, "https://nft-cdn.alchemy.com/img/2.png");
		// No contract reported: falls back to the configured collection.
		assert_eq!(second.token_address, NFT);

		assert_eq!(page.collection_names.get(&NFT).map(String::as_str), Some("Relics"));
	}

	#[tokio::test]
	async fn follows_page_key_parameter() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/test-key/getNFTsForOwner"))
			.and(query_param("pageKey", "page-2"))
			.respond_with(
				ResponseTemplate::new(200).set_body_json(json!({"ownedNfts": []})),
			)
			.expect(1)
			.mount(&server)
			.await;

		let indexer = HttpIndexer::new(registry(Some(server.uri())), "test-key");
		let page = indexer
			.owned_assets_page(OWNER, 137, Some("page-2".to_string()))
			.await
			.unwrap();

		assert!(page.assets.is_empty());
		assert!(page.page_key.is_none());
	}

	#[tokio::test]
	async fn missing_indexer_configuration() {
		let indexer = HttpIndexer::new(registry(None), "test-key");
		let err = indexer.owned_assets_page(OWNER, 137, None).await.unwrap_err();
		assert!(matches!(err, IndexerError::Unconfigured(137)));

		let err = indexer.owned_assets_page(OWNER, 10, None).await.unwrap_err();
		assert!(matches!(err, IndexerError::Unconfigured(10)));
	}

	#[tokio::test]
	async fn rate_limit_exhaustion_surfaces() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/test-key/getNFTsForOwner"))
			.respond_with(ResponseTemplate::new(429))
			.mount(&server)
			.await;

		let indexer = HttpIndexer::new(registry(Some(server.uri())), "test-key")
			.with_fetcher(RetryingFetcher::new(2, Duration::from_millis(1)));
		let err = indexer.owned_assets_page(OWNER, 137, None).await.unwrap_err();

		assert!(matches!(err, IndexerError::RateLimited));
	}
}
