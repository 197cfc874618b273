//! ABI types and decoding for the NFT2.0 contract family.
//!
//! Each watched datasource carries an [AbiId]. A log is decoded against that ABI only if its
//! topic0 is routed for it; unrouted topics (Approval, OwnershipTransferred, ...) are ignored.
//! A routed topic whose body does not match the declared event shape is a [DecodeError].

use crate::chain::{LogEntry, TransactionEntry};
use crate::error::DecodeError;
use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use serde::{Deserialize, Serialize};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface INft2Factory {
        event DataRegistryCreated(address dapp, address registry, string dappURI);
        event DataRegistryV2Created(address indexed dapp, address indexed registry, string dappURI);
        event CollectionCreated(address owner, address collection, uint8 kind);
        event DerivedAccountCreated(address underlyingCollection, uint256 underlyingTokenId, address derivedAccount);
        event AddonsCreated(address indexed collection, uint8 indexed kind, address addons, bytes32 campaignId, bytes data);
        event ERC6551AccountCreated(address account, address indexed implementation, bytes32 salt, uint256 chainId, address indexed tokenContract, uint256 indexed tokenId);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IERC721 {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
        function ownerOf(uint256 tokenId) external view returns (address);
        function tokenURI(uint256 tokenId) external view returns (string memory);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IDataRegistry {
        event Write(address requester, address nftCollection, uint256 tokenId, bytes32 key, bytes value);
        event Compose(address srcCollection, uint256 srcTokenId, address descCollection, uint256 descTokenId, bytes32[] keys);
        event Derive(address underlyingCollection, uint256 underlyingTokenId, address derivedCollection, uint256 derivedTokenId, uint256 startTime, uint256 endTime);
        event Reclaim(address underlyingCollection, uint256 underlyingTokenId, address derivedCollection, uint256 derivedTokenId);
        event Transfer(address from, address to, uint256 tokenId);
        event URIUpdated(string uri);
        function inscribe(address collection, uint256 tokenId, bytes calldata metadata) external;
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IDataRegistryV2 {
        event WriteBatch(address collection, uint256 startId, uint256 endId, bytes32 key, bytes value);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IDerivedAccount {
        event RoyaltyClaimed(address receiver, address requestToken, uint256 amount);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface INft2Marketplace {
        event TakerBid(bytes32 orderHash, uint256 orderNonce, address indexed taker, address indexed maker, address indexed strategy, address currency, address collection, uint256 tokenId, uint256 amount, uint256 price);
        event TakerAsk(bytes32 orderHash, uint256 orderNonce, address indexed taker, address indexed maker, address indexed strategy, address currency, address collection, uint256 tokenId, uint256 amount, uint256 price);
        event CancelAllOrders(address indexed user, uint256 newMinNonce);
        event CancelMultipleOrders(address indexed user, uint256[] orderNonces);
        event RoyaltyPayment(address indexed collection, uint256 indexed tokenId, address indexed royaltyRecipient, address currency, uint256 amount);
    }
}

/// Contract interface a datasource is decoded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbiId {
    Factory,
    Erc721,
    DataRegistry,
    DataRegistryV2,
    DerivedAccount,
    Marketplace,
}

impl AbiId {
    /// topic0 values routed to a handler for this ABI.
    pub fn topics(&self) -> Vec<B256> {
        match self {
            AbiId::Factory => vec![
                INft2Factory::DataRegistryCreated::SIGNATURE_HASH,
                INft2Factory::DataRegistryV2Created::SIGNATURE_HASH,
                INft2Factory::CollectionCreated::SIGNATURE_HASH,
                INft2Factory::DerivedAccountCreated::SIGNATURE_HASH,
                INft2Factory::AddonsCreated::SIGNATURE_HASH,
                INft2Factory::ERC6551AccountCreated::SIGNATURE_HASH,
            ],
            AbiId::Erc721 => vec![IERC721::Transfer::SIGNATURE_HASH],
            AbiId::DataRegistry => vec![
                IDataRegistry::Write::SIGNATURE_HASH,
                IDataRegistry::Compose::SIGNATURE_HASH,
                IDataRegistry::Derive::SIGNATURE_HASH,
                IDataRegistry::Reclaim::SIGNATURE_HASH,
                IDataRegistry::Transfer::SIGNATURE_HASH,
                IDataRegistry::URIUpdated::SIGNATURE_HASH,
            ],
            AbiId::DataRegistryV2 => vec![
                IDataRegistryV2::WriteBatch::SIGNATURE_HASH,
                IDataRegistry::Compose::SIGNATURE_HASH,
                IDataRegistry::Derive::SIGNATURE_HASH,
                IDataRegistry::Reclaim::SIGNATURE_HASH,
                IDataRegistry::Transfer::SIGNATURE_HASH,
                IDataRegistry::URIUpdated::SIGNATURE_HASH,
            ],
            AbiId::DerivedAccount => vec![IDerivedAccount::RoyaltyClaimed::SIGNATURE_HASH],
            AbiId::Marketplace => vec![
                INft2Marketplace::TakerBid::SIGNATURE_HASH,
                INft2Marketplace::TakerAsk::SIGNATURE_HASH,
                INft2Marketplace::CancelAllOrders::SIGNATURE_HASH,
                INft2Marketplace::CancelMultipleOrders::SIGNATURE_HASH,
                INft2Marketplace::RoyaltyPayment::SIGNATURE_HASH,
            ],
        }
    }

    /// Function selectors routed to a call handler for this ABI.
    pub fn call_selectors(&self) -> Vec<[u8; 4]> {
        match self {
            AbiId::DataRegistry => vec![IDataRegistry::inscribeCall::SELECTOR],
            _ => Vec::new(),
        }
    }

    pub fn has_call_handlers(&self) -> bool {
        !self.call_selectors().is_empty()
    }
}

/// A decoded, routed log. Variants are tagged by the handler they feed, so the same
/// topic can map to different variants under different ABIs (see `DerivedTransfer`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DataRegistryCreated(INft2Factory::DataRegistryCreated),
    DataRegistryV2Created(INft2Factory::DataRegistryV2Created),
    CollectionCreated(INft2Factory::CollectionCreated),
    DerivedAccountCreated(INft2Factory::DerivedAccountCreated),
    AddonsCreated(INft2Factory::AddonsCreated),
    ERC6551AccountCreated(INft2Factory::ERC6551AccountCreated),
    Transfer(IERC721::Transfer),
    Write(IDataRegistry::Write),
    WriteBatch(IDataRegistryV2::WriteBatch),
    Compose(IDataRegistry::Compose),
    Derive(IDataRegistry::Derive),
    Reclaim(IDataRegistry::Reclaim),
    DerivedTransfer(IERC721::Transfer),
    URIUpdated(IDataRegistry::URIUpdated),
    RoyaltyClaimed(IDerivedAccount::RoyaltyClaimed),
    TakerBid(INft2Marketplace::TakerBid),
    TakerAsk(INft2Marketplace::TakerAsk),
    CancelAllOrders(INft2Marketplace::CancelAllOrders),
    CancelMultipleOrders(INft2Marketplace::CancelMultipleOrders),
    RoyaltyPayment(INft2Marketplace::RoyaltyPayment),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::DataRegistryCreated(_) => "DataRegistryCreated",
            Event::DataRegistryV2Created(_) => "DataRegistryV2Created",
            Event::CollectionCreated(_) => "CollectionCreated",
            Event::DerivedAccountCreated(_) => "DerivedAccountCreated",
            Event::AddonsCreated(_) => "AddonsCreated",
            Event::ERC6551AccountCreated(_) => "ERC6551AccountCreated",
            Event::Transfer(_) => "Transfer",
            Event::Write(_) => "Write",
            Event::WriteBatch(_) => "WriteBatch",
            Event::Compose(_) => "Compose",
            Event::Derive(_) => "Derive",
            Event::Reclaim(_) => "Reclaim",
            Event::DerivedTransfer(_) => "DerivedTransfer",
            Event::URIUpdated(_) => "URIUpdated",
            Event::RoyaltyClaimed(_) => "RoyaltyClaimed",
            Event::TakerBid(_) => "TakerBid",
            Event::TakerAsk(_) => "TakerAsk",
            Event::CancelAllOrders(_) => "CancelAllOrders",
            Event::CancelMultipleOrders(_) => "CancelMultipleOrders",
            Event::RoyaltyPayment(_) => "RoyaltyPayment",
        }
    }
}

/// A decoded, routed transaction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Inscribe(IDataRegistry::inscribeCall),
}

fn decode<E: SolEvent>(log: &LogEntry) -> Result<E, DecodeError> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| DecodeError::abi(E::SIGNATURE, e))
}

/// ERC-721 Transfer with all three parameters indexed, or the unindexed form some
/// registries emit. Both share topic0.
fn decode_transfer(log: &LogEntry) -> Result<IERC721::Transfer, DecodeError> {
    if log.topics.len() == 4 {
        return decode::<IERC721::Transfer>(log);
    }
    let t = decode::<IDataRegistry::Transfer>(log)?;
    Ok(IERC721::Transfer {
        from: t.from,
        to: t.to,
        tokenId: t.tokenId,
    })
}

/// Decode `log` against `abi`. `Ok(None)` when topic0 is not routed for this ABI.
pub fn decode_log(abi: AbiId, log: &LogEntry) -> Result<Option<Event>, DecodeError> {
    let topic0 = *log.topic0().ok_or(DecodeError::MissingTopic0)?;
    let event = match abi {
        AbiId::Factory => {
            if topic0 == INft2Factory::DataRegistryCreated::SIGNATURE_HASH {
                Event::DataRegistryCreated(decode(log)?)
            } else if topic0 == INft2Factory::DataRegistryV2Created::SIGNATURE_HASH {
                Event::DataRegistryV2Created(decode(log)?)
            } else if topic0 == INft2Factory::CollectionCreated::SIGNATURE_HASH {
                Event::CollectionCreated(decode(log)?)
            } else if topic0 == INft2Factory::DerivedAccountCreated::SIGNATURE_HASH {
                Event::DerivedAccountCreated(decode(log)?)
            } else if topic0 == INft2Factory::AddonsCreated::SIGNATURE_HASH {
                Event::AddonsCreated(decode(log)?)
            } else if topic0 == INft2Factory::ERC6551AccountCreated::SIGNATURE_HASH {
                Event::ERC6551AccountCreated(decode(log)?)
            } else {
                return Ok(None);
            }
        }
        AbiId::Erc721 => {
            if topic0 == IERC721::Transfer::SIGNATURE_HASH {
                Event::Transfer(decode_transfer(log)?)
            } else {
                return Ok(None);
            }
        }
        AbiId::DataRegistry | AbiId::DataRegistryV2 => {
            if abi == AbiId::DataRegistry && topic0 == IDataRegistry::Write::SIGNATURE_HASH {
                Event::Write(decode(log)?)
            } else if abi == AbiId::DataRegistryV2
                && topic0 == IDataRegistryV2::WriteBatch::SIGNATURE_HASH
            {
                Event::WriteBatch(decode(log)?)
            } else if topic0 == IDataRegistry::Compose::SIGNATURE_HASH {
                Event::Compose(decode(log)?)
            } else if topic0 == IDataRegistry::Derive::SIGNATURE_HASH {
                Event::Derive(decode(log)?)
            } else if topic0 == IDataRegistry::Reclaim::SIGNATURE_HASH {
                Event::Reclaim(decode(log)?)
            } else if topic0 == IDataRegistry::Transfer::SIGNATURE_HASH {
                Event::DerivedTransfer(decode_transfer(log)?)
            } else if topic0 == IDataRegistry::URIUpdated::SIGNATURE_HASH {
                Event::URIUpdated(decode(log)?)
            } else {
                return Ok(None);
            }
        }
        AbiId::DerivedAccount => {
            if topic0 == IDerivedAccount::RoyaltyClaimed::SIGNATURE_HASH {
                Event::RoyaltyClaimed(decode(log)?)
            } else {
                return Ok(None);
            }
        }
        AbiId::Marketplace => {
            if topic0 == INft2Marketplace::TakerBid::SIGNATURE_HASH {
                Event::TakerBid(decode(log)?)
            } else if topic0 == INft2Marketplace::TakerAsk::SIGNATURE_HASH {
                Event::TakerAsk(decode(log)?)
            } else if topic0 == INft2Marketplace::CancelAllOrders::SIGNATURE_HASH {
                Event::CancelAllOrders(decode(log)?)
            } else if topic0 == INft2Marketplace::CancelMultipleOrders::SIGNATURE_HASH {
                Event::CancelMultipleOrders(decode(log)?)
            } else if topic0 == INft2Marketplace::RoyaltyPayment::SIGNATURE_HASH {
                Event::RoyaltyPayment(decode(log)?)
            } else {
                return Ok(None);
            }
        }
    };
    Ok(Some(event))
}

/// Decode a transaction's calldata against `abi`. `Ok(None)` when the selector is not routed.
pub fn decode_call(abi: AbiId, tx: &TransactionEntry) -> Result<Option<Call>, DecodeError> {
    let Some(selector) = tx.selector() else {
        return Ok(None);
    };
    match abi {
        AbiId::DataRegistry if selector == IDataRegistry::inscribeCall::SELECTOR => {
            let call = IDataRegistry::inscribeCall::abi_decode(&tx.input, true)
                .map_err(|e| DecodeError::abi(IDataRegistry::inscribeCall::SIGNATURE, e))?;
            Ok(Some(Call::Inscribe(call)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Address, Bytes, U256};

    fn log_from(event: &impl SolEvent) -> LogEntry {
        let data = event.encode_log_data();
        LogEntry {
            address: address!("00000000000000000000000000000000000000c1"),
            block_number: 1,
            transaction_hash: B256::repeat_byte(0x11),
            transaction_index: 0,
            log_index: 0,
            topics: data.topics().to_vec(),
            data: data.data.clone(),
        }
    }

    #[test]
    fn transfer_topic_matches_erc721_signature() {
        assert_eq!(
            IERC721::Transfer::SIGNATURE,
            "Transfer(address,address,uint256)"
        );
        assert_eq!(
            IERC721::Transfer::SIGNATURE_HASH,
            IDataRegistry::Transfer::SIGNATURE_HASH
        );
    }

    #[test]
    fn unrouted_topic_is_ignored() {
        let ev = IERC721::Transfer {
            from: Address::ZERO,
            to: address!("00000000000000000000000000000000000000a1"),
            tokenId: U256::from(1),
        };
        let log = log_from(&ev);
        assert_eq!(decode_log(AbiId::Marketplace, &log), Ok(None));
        assert_eq!(decode_log(AbiId::Erc721, &log), Ok(Some(Event::Transfer(ev))));
    }

    #[test]
    fn registry_transfer_accepts_unindexed_encoding() {
        let ev = IDataRegistry::Transfer {
            from: address!("00000000000000000000000000000000000000a1"),
            to: address!("00000000000000000000000000000000000000a2"),
            tokenId: U256::from(9),
        };
        let decoded = decode_log(AbiId::DataRegistryV2, &log_from(&ev)).unwrap();
        match decoded {
            Some(Event::DerivedTransfer(t)) => {
                assert_eq!(t.from, ev.from);
                assert_eq!(t.to, ev.to);
                assert_eq!(t.tokenId, U256::from(9));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn write_is_not_routed_for_v2_registry() {
        let ev = IDataRegistry::Write {
            requester: Address::ZERO,
            nftCollection: Address::ZERO,
            tokenId: U256::from(1),
            key: B256::repeat_byte(1),
            value: Bytes::from(vec![1, 2]),
        };
        assert_eq!(decode_log(AbiId::DataRegistryV2, &log_from(&ev)), Ok(None));
        assert!(matches!(
            decode_log(AbiId::DataRegistry, &log_from(&ev)),
            Ok(Some(Event::Write(_)))
        ));
    }

    #[test]
    fn truncated_body_is_a_decode_error() {
        let ev = INft2Factory::CollectionCreated {
            owner: Address::ZERO,
            collection: address!("00000000000000000000000000000000000000c2"),
            kind: 1,
        };
        let mut log = log_from(&ev);
        log.data = Bytes::from(log.data[..40].to_vec());
        let err = decode_log(AbiId::Factory, &log).unwrap_err();
        assert!(matches!(err, DecodeError::Abi { .. }));
    }

    #[test]
    fn empty_topics_rejected() {
        let log = LogEntry {
            address: Address::ZERO,
            block_number: 1,
            transaction_hash: B256::ZERO,
            transaction_index: 0,
            log_index: 0,
            topics: vec![],
            data: Bytes::new(),
        };
        assert_eq!(decode_log(AbiId::Erc721, &log), Err(DecodeError::MissingTopic0));
    }

    #[test]
    fn inscribe_call_decodes() {
        let call = IDataRegistry::inscribeCall {
            collection: address!("00000000000000000000000000000000000000c3"),
            tokenId: U256::from(5),
            metadata: Bytes::from(b"hello".to_vec()),
        };
        let tx = TransactionEntry {
            hash: B256::repeat_byte(2),
            block_number: 3,
            transaction_index: 1,
            from: Address::ZERO,
            to: Some(Address::ZERO),
            input: Bytes::from(call.abi_encode()),
        };
        assert_eq!(
            decode_call(AbiId::DataRegistry, &tx),
            Ok(Some(Call::Inscribe(call)))
        );
        assert_eq!(decode_call(AbiId::DataRegistryV2, &tx), Ok(None));
    }
}
