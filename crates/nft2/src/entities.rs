//! Indexed entity records.
//!
//! Every id starts with the chain id so chains never share a record. Addresses, hashes,
//! keys and byte payloads are lower-case `0x` hex; uint256 quantities are decimal strings.

use alloy::primitives::{Address, B256, U256};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Entity type tag used as the first half of a store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    DataRegistry,
    Collection,
    Nft,
    Transfer,
    DataRegistryNftData,
    DataRegistryNftInscription,
    DerivedAccount,
    DerivedAccountRoyaltyClaimed,
    AddonsCollection,
    Erc6551Account,
    TakerBid,
    TakerAsk,
    CancelAllOrders,
    CancelMultipleOrders,
    RoyaltyPayment,
    Checkpoint,
    DatasourceRecord,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::DataRegistry => "DataRegistry",
            EntityKind::Collection => "Collection",
            EntityKind::Nft => "NFT",
            EntityKind::Transfer => "Transfer",
            EntityKind::DataRegistryNftData => "DataRegistryNFTData",
            EntityKind::DataRegistryNftInscription => "DataRegistryNFTInscription",
            EntityKind::DerivedAccount => "DerivedAccount",
            EntityKind::DerivedAccountRoyaltyClaimed => "DerivedAccountRoyaltyClaimed",
            EntityKind::AddonsCollection => "AddonsCollection",
            EntityKind::Erc6551Account => "ERC6551Account",
            EntityKind::TakerBid => "TakerBid",
            EntityKind::TakerAsk => "TakerAsk",
            EntityKind::CancelAllOrders => "CancelAllOrders",
            EntityKind::CancelMultipleOrders => "CancelMultipleOrders",
            EntityKind::RoyaltyPayment => "RoyaltyPayment",
            EntityKind::Checkpoint => "Checkpoint",
            EntityKind::DatasourceRecord => "DatasourceRecord",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record the [crate::store::EntityStore] can hold.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;
    fn id(&self) -> &str;
}

macro_rules! entity {
    ($ty:ty, $kind:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;
            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

/// Lower-case `0x` hex of an address. The only form used in keys and foreign keys.
pub fn addr(a: &Address) -> String {
    format!("0x{}", hex::encode(a.as_slice()))
}

pub fn hash(h: &B256) -> String {
    format!("0x{}", hex::encode(h.as_slice()))
}

pub fn bytes_hex(b: &[u8]) -> String {
    format!("0x{}", hex::encode(b))
}

pub fn nft_id(chain_id: u64, collection: &Address, token_id: &U256) -> String {
    format!("{}-{}-{}", chain_id, addr(collection), token_id)
}

pub fn contract_id(chain_id: u64, address: &Address) -> String {
    format!("{}-{}", chain_id, addr(address))
}

pub fn transfer_id(chain_id: u64, tx_hash: &B256, log_index: u64) -> String {
    format!("{}-{}-{}", chain_id, hash(tx_hash), log_index)
}

pub fn nft_data_id(
    chain_id: u64,
    registry: &Address,
    collection: &Address,
    token_id: &U256,
    key: &B256,
) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        chain_id,
        addr(registry),
        addr(collection),
        token_id,
        hash(key)
    )
}

pub fn inscription_id(chain_id: u64, tx_hash: &B256, tx_index: u64) -> String {
    format!("{}-{}-{}", chain_id, hash(tx_hash), tx_index)
}

pub fn royalty_claimed_id(chain_id: u64, tx_hash: &B256, log_index: u64) -> String {
    format!("{}-{}-{}", chain_id, hash(tx_hash), log_index)
}

pub fn order_id(chain_id: u64, order_hash: &B256, order_nonce: &U256) -> String {
    format!("{}-{}-{}", chain_id, hash(order_hash), order_nonce)
}

pub fn cancel_all_id(chain_id: u64, user: &Address, new_min_nonce: &U256) -> String {
    format!("{}-{}-{}", chain_id, addr(user), new_min_nonce)
}

pub fn cancel_multiple_id(chain_id: u64, user: &Address, tx_hash: &B256) -> String {
    format!("{}-{}-{}", chain_id, addr(user), hash(tx_hash))
}

pub fn royalty_payment_id(
    chain_id: u64,
    collection: &Address,
    token_id: &U256,
    tx_hash: &B256,
    log_index: u64,
) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        chain_id,
        addr(collection),
        token_id,
        hash(tx_hash),
        log_index
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRegistry {
    pub id: String,
    pub chain_id: u64,
    pub address: String,
    pub dapp: String,
    pub uri: String,
    pub version: RegistryVersion,
    pub block_height: u64,
    pub timestamp: u64,
}
entity!(DataRegistry, EntityKind::DataRegistry);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub chain_id: u64,
    pub address: String,
    pub owner: String,
    pub kind: u8,
    pub block_height: u64,
    pub timestamp: u64,
}
entity!(Collection, EntityKind::Collection);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nft {
    pub id: String,
    pub chain_id: u64,
    pub collection: String,
    pub token_id: String,
    /// Empty until a mint/transfer is observed or enrichment filled it.
    pub owner: String,
    pub token_uri: String,
    pub block_height: u64,
    pub timestamp: u64,
    pub is_burned: bool,
    pub is_derived: bool,
    pub underlying_nft_id: Option<String>,
}
entity!(Nft, EntityKind::Nft);

impl Nft {
    /// Blank record; owner and URI unknown.
    pub fn blank(chain_id: u64, collection: &Address, token_id: &U256) -> Self {
        Self {
            id: nft_id(chain_id, collection, token_id),
            chain_id,
            collection: addr(collection),
            token_id: token_id.to_string(),
            owner: String::new(),
            token_uri: String::new(),
            block_height: 0,
            timestamp: 0,
            is_burned: false,
            is_derived: false,
            underlying_nft_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub chain_id: u64,
    pub collection: String,
    pub token_id: String,
    pub from: String,
    pub to: String,
    pub block_height: u64,
    pub timestamp: u64,
    pub tx_hash: String,
    pub log_index: u64,
}
entity!(Transfer, EntityKind::Transfer);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRegistryNftData {
    pub id: String,
    pub chain_id: u64,
    pub data_registry_id: String,
    pub collection: String,
    pub token_id: String,
    pub key: String,
    pub value: String,
    pub block_height: u64,
    pub tx_hash: String,
}
entity!(DataRegistryNftData, EntityKind::DataRegistryNftData);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRegistryNftInscription {
    pub id: String,
    pub chain_id: u64,
    pub data_registry_id: String,
    pub collection: String,
    pub token_id: String,
    pub metadata: String,
    pub block_height: u64,
    pub tx_hash: String,
}
entity!(DataRegistryNftInscription, EntityKind::DataRegistryNftInscription);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAccount {
    pub id: String,
    pub chain_id: u64,
    pub address: String,
    pub underlying_nft_id: String,
    pub block_height: u64,
    pub timestamp: u64,
}
entity!(DerivedAccount, EntityKind::DerivedAccount);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAccountRoyaltyClaimed {
    pub id: String,
    pub chain_id: u64,
    pub derived_account_id: String,
    pub token: String,
    pub amount: String,
    pub receiver: String,
    pub tx_hash: String,
    pub block_height: u64,
}
entity!(DerivedAccountRoyaltyClaimed, EntityKind::DerivedAccountRoyaltyClaimed);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonsCollection {
    pub id: String,
    pub chain_id: u64,
    pub contract: String,
    pub collection: String,
    pub kind: u8,
    pub campaign_id: String,
    pub data: String,
    pub block_height: u64,
    pub timestamp: u64,
}
entity!(AddonsCollection, EntityKind::AddonsCollection);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc6551Account {
    pub id: String,
    pub chain_id: u64,
    pub account: String,
    pub implementation: String,
    pub salt: String,
    pub underlying_nft_id: String,
    pub block_height: u64,
    pub timestamp: u64,
}
entity!(Erc6551Account, EntityKind::Erc6551Account);

/// Fill record shared by TakerBid and TakerAsk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFill {
    pub id: String,
    pub chain_id: u64,
    pub taker: String,
    pub maker: String,
    pub strategy: String,
    pub order_hash: String,
    pub order_nonce: String,
    pub currency: String,
    pub collection: String,
    pub token_id: String,
    pub amount: String,
    pub price: String,
    pub block_height: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TakerBid(pub OrderFill);

impl Entity for TakerBid {
    const KIND: EntityKind = EntityKind::TakerBid;
    fn id(&self) -> &str {
        &self.0.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TakerAsk(pub OrderFill);

impl Entity for TakerAsk {
    const KIND: EntityKind = EntityKind::TakerAsk;
    fn id(&self) -> &str {
        &self.0.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAllOrders {
    pub id: String,
    pub chain_id: u64,
    pub user: String,
    pub new_min_nonce: String,
    pub block_height: u64,
    pub timestamp: u64,
}
entity!(CancelAllOrders, EntityKind::CancelAllOrders);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMultipleOrders {
    pub id: String,
    pub chain_id: u64,
    pub user: String,
    pub order_nonces: Vec<String>,
    pub block_height: u64,
    pub timestamp: u64,
}
entity!(CancelMultipleOrders, EntityKind::CancelMultipleOrders);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoyaltyPayment {
    pub id: String,
    pub chain_id: u64,
    pub collection: String,
    pub token_id: String,
    pub royalty_recipient: String,
    pub currency: String,
    pub amount: String,
    pub block_height: u64,
    pub timestamp: u64,
}
entity!(RoyaltyPayment, EntityKind::RoyaltyPayment);

/// Committed watermark of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub chain_id: u64,
    pub block_number: u64,
}
entity!(Checkpoint, EntityKind::Checkpoint);

impl Checkpoint {
    pub fn new(chain_id: u64, block_number: u64) -> Self {
        Self {
            id: chain_id.to_string(),
            chain_id,
            block_number,
        }
    }
}

/// A datasource instantiated at runtime by a factory event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceRecord {
    pub id: String,
    pub chain_id: u64,
    pub template: String,
    pub address: String,
    pub start_block: u64,
}
entity!(DatasourceRecord, EntityKind::DatasourceRecord);
