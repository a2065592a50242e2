//! Contract ABI bindings and call builders.
//!
//! ABI surfaces for the three contracts the client talks to: the burnable
//! ERC-721 collection, the batch transfer operator and the mint-capable
//! collection. Builders produce ready-to-send [`ChainTransaction`]s; decode
//! helpers turn raw return data back into domain values.

use crate::{ChainError, ChainTransaction};
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};

sol! {
	/// Burnable ERC-721 collection surface.
	interface IBurnableCollection {
		function tokensOfOwner(address owner) external view returns (uint256[] memory);
		function tokenURI(uint256 tokenId) external view returns (string memory);
		function ownerOf(uint256 tokenId) external view returns (address);
		function transferFrom(address from, address to, uint256 tokenId) external;
		function setApprovalForAll(address operator, bool approved) external;
		function isApprovedForAll(address owner, address operator) external view returns (bool);
	}
}

sol! {
	/// Operator contract moving many tokens to one recipient in a single
	/// transaction.
	interface IBatchOperator {
		function batchTransferToSingleWallet(address erc721Contract, address to, uint256[] calldata tokenIds) external;
	}
}

sol! {
	/// Mint-capable collection with per-token configuration.
	interface IMintableCollection {
		function mint(address to, uint256 tokenId, uint256 amount, bytes calldata signature) external payable;
		function getAllTokenIds() external view returns (uint256[] memory);
		function tokenConfigs(uint256 tokenId) external view returns (string memory name, uint256 maxSupply, uint256 price, bool allowlistRequired, bool active, bool soulbound);
	}
}

/// On-chain configuration of a mintable token id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnchainTokenConfig {
	pub name: String,
	pub max_supply: U256,
	pub price: U256,
	pub allowlist_required: bool,
	pub active: bool,
	pub soulbound: bool,
}

impl From<IMintableCollection::tokenConfigsReturn> for OnchainTokenConfig {
	fn from(ret: IMintableCollection::tokenConfigsReturn) -> Self {
		Self {
			name: ret.name,
			max_supply: ret.maxSupply,
			price: ret.price,
			allowlist_required: ret.allowlistRequired,
			active: ret.active,
			soulbound: ret.soulbound,
		}
	}
}

fn zero_value(chain_id: u64, to: Address, data: Vec<u8>) -> ChainTransaction {
	ChainTransaction {
		chain_id,
		to,
		data,
		value: U256::ZERO,
	}
}

/// `tokensOfOwner(owner)` read call.
pub fn tokens_of_owner_call(chain_id: u64, collection: Address, owner: Address) -> ChainTransaction {
	let call = IBurnableCollection::tokensOfOwnerCall { owner };
	zero_value(chain_id, collection, call.abi_encode())
}

/// `tokenURI(tokenId)` read call.
pub fn token_uri_call(chain_id: u64, collection: Address, token_id: U256) -> ChainTransaction {
	let call = IBurnableCollection::tokenURICall { tokenId: token_id };
	zero_value(chain_id, collection, call.abi_encode())
}

/// `ownerOf(tokenId)` read call.
pub fn owner_of_call(chain_id: u64, collection: Address, token_id: U256) -> ChainTransaction {
	let call = IBurnableCollection::ownerOfCall { tokenId: token_id };
	zero_value(chain_id, collection, call.abi_encode())
}

/// `isApprovedForAll(owner, operator)` read call.
pub fn is_approved_for_all_call(
	chain_id: u64,
	collection: Address,
	owner: Address,
	operator: Address,
) -> ChainTransaction {
	let call = IBurnableCollection::isApprovedForAllCall { owner, operator };
	zero_value(chain_id, collection, call.abi_encode())
}

/// `tokenConfigs(tokenId)` read call.
pub fn token_configs_call(chain_id: u64, contract: Address, token_id: U256) -> ChainTransaction {
	let call = IMintableCollection::tokenConfigsCall { tokenId: token_id };
	zero_value(chain_id, contract, call.abi_encode())
}

/// `getAllTokenIds()` read call.
pub fn all_token_ids_call(chain_id: u64, contract: Address) -> ChainTransaction {
	let call = IMintableCollection::getAllTokenIdsCall {};
	zero_value(chain_id, contract, call.abi_encode())
}

/// `transferFrom(from, to, tokenId)` write.
pub fn transfer_from(
	chain_id: u64,
	collection: Address,
	from: Address,
	to: Address,
	token_id: U256,
) -> ChainTransaction {
	let call = IBurnableCollection::transferFromCall {
		from,
		to,
		tokenId: token_id,
	};
	zero_value(chain_id, collection, call.abi_encode())
}

/// `setApprovalForAll(operator, approved)` write.
pub fn set_approval_for_all(
	chain_id: u64,
	collection: Address,
	operator: Address,
	approved: bool,
) -> ChainTransaction {
	let call = IBurnableCollection::setApprovalForAllCall { operator, approved };
	zero_value(chain_id, collection, call.abi_encode())
}

/// `batchTransferToSingleWallet(collection, to, tokenIds)` write against the
/// batch operator contract.
pub fn batch_transfer_to_single_wallet(
	chain_id: u64,
	operator_contract: Address,
	collection: Address,
	to: Address,
	token_ids: Vec<U256>,
) -> ChainTransaction {
	let call = IBatchOperator::batchTransferToSingleWalletCall {
		erc721Contract: collection,
		to,
		tokenIds: token_ids,
	};
	zero_value(chain_id, operator_contract, call.abi_encode())
}

/// `mint(to, tokenId, amount, signature)` write carrying the native payment.
pub fn mint(
	chain_id: u64,
	contract: Address,
	to: Address,
	token_id: U256,
	amount: U256,
	signature: Bytes,
	value: U256,
) -> ChainTransaction {
	let call = IMintableCollection::mintCall {
		to,
		tokenId: token_id,
		amount,
		signature,
	};
	ChainTransaction {
		chain_id,
		to: contract,
		data: call.abi_encode(),
		value,
	}
}

/// Decodes an `isApprovedForAll` response.
pub fn decode_is_approved(data: &[u8]) -> Result<bool, ChainError> {
	IBurnableCollection::isApprovedForAllCall::abi_decode_returns_validate(data)
		.map_err(|e| ChainError::Abi(format!("isApprovedForAll: {}", e)))
}

/// Decodes a `tokensOfOwner` or `getAllTokenIds` response.
pub fn decode_token_ids(data: &[u8]) -> Result<Vec<U256>, ChainError> {
	IBurnableCollection::tokensOfOwnerCall::abi_decode_returns_validate(data)
		.map_err(|e| ChainError::Abi(format!("token id list: {}", e)))
}

/// Decodes an `ownerOf` response.
pub fn decode_owner(data: &[u8]) -> Result<Address, ChainError> {
	IBurnableCollection::ownerOfCall::abi_decode_returns_validate(data)
		.map_err(|e| ChainError::Abi(format!("ownerOf: {}", e)))
}

/// Decodes a `tokenURI` response.
pub fn decode_token_uri(data: &[u8]) -> Result<String, ChainError> {
	IBurnableCollection::tokenURICall::abi_decode_returns_validate(data)
		.map_err(|e| ChainError::Abi(format!("tokenURI: {}", e)))
}

/// Decodes a `tokenConfigs` response.
pub fn decode_token_config(data: &[u8]) -> Result<OnchainTokenConfig, ChainError> {
	IMintableCollection::tokenConfigsCall::abi_decode_returns_validate(data)
		.map(OnchainTokenConfig::from)
		.map_err(|e| ChainError::Abi(format!("tokenConfigs: {}", e)))
}
