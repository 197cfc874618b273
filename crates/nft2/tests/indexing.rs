//! Pipeline tests: scripted chain -> block processor -> entity store.

mod common;

use alloy::primitives::{address, Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use common::{chain_config, indexer_config, init_tracing, processor, MockChain};
use nft2::abi::{IDataRegistry, IDataRegistryV2, IERC721, INft2Factory, INft2Marketplace};
use nft2::entities::{
    addr, cancel_multiple_id, contract_id, inscription_id, nft_data_id, nft_id, order_id,
    CancelMultipleOrders, Checkpoint, Collection, DataRegistry, DataRegistryNftData,
    DataRegistryNftInscription, DatasourceRecord, DerivedAccount, Nft, TakerBid, Transfer,
};
use nft2::{run_chains, EntityStore, EntityStoreExt, IndexerError, MemoryStore, ProcessorState};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const FACTORY: Address = address!("00000000000000000000000000000000000000f1");
const MARKET: Address = address!("00000000000000000000000000000000000000e1");
const COLL: Address = address!("00000000000000000000000000000000000000c1");
const REG: Address = address!("00000000000000000000000000000000000000d1");
const ACCOUNT: Address = address!("00000000000000000000000000000000000000da");
const OWNER: Address = address!("00000000000000000000000000000000000000b1");
const ALICE: Address = address!("00000000000000000000000000000000000000a1");

fn new_store() -> Arc<dyn EntityStore> {
    Arc::new(MemoryStore::new())
}

fn collection_created(collection: Address) -> INft2Factory::CollectionCreated {
    INft2Factory::CollectionCreated {
        owner: OWNER,
        collection,
        kind: 1,
    }
}

fn transfer(from: Address, to: Address, token: u64) -> IERC721::Transfer {
    IERC721::Transfer {
        from,
        to,
        tokenId: U256::from(token),
    }
}

async fn nft(
    store: &Arc<dyn EntityStore>,
    chain_id: u64,
    collection: Address,
    token: u64,
) -> Option<Nft> {
    store
        .load(&nft_id(chain_id, &collection, &U256::from(token)))
        .await
        .unwrap()
}

#[tokio::test]
async fn collection_lifecycle_end_to_end() {
    init_tracing();
    let mock = MockChain::new();
    mock.emit(100, FACTORY, &collection_created(COLL));
    mock.emit(101, COLL, &transfer(Address::ZERO, ALICE, 1));
    mock.emit(102, COLL, &transfer(ALICE, Address::ZERO, 1));

    let chain = chain_config(56, FACTORY, 100);
    let config = indexer_config(vec![chain.clone()], 102);
    let store = new_store();
    let p = processor(&chain, &config, &mock, &store).await;
    p.run().await.unwrap();

    let coll: Collection = store.load(&contract_id(56, &COLL)).await.unwrap().unwrap();
    assert_eq!(coll.owner, addr(&OWNER));
    assert_eq!(coll.kind, 1);
    assert_eq!(coll.block_height, 100);

    let token = nft(&store, 56, COLL, 1).await.unwrap();
    assert!(token.is_burned);
    assert_eq!(token.owner, addr(&ALICE));
    assert_eq!(token.block_height, 101);

    assert_eq!(store.load_all::<Transfer>().await.unwrap().len(), 2);
    let cp: Checkpoint = store.load("56").await.unwrap().unwrap();
    assert_eq!(cp.block_number, 102);
    assert_eq!(*p.state().borrow(), ProcessorState::Idle);
}

#[tokio::test]
async fn logs_of_a_new_collection_in_its_creation_block_are_indexed() {
    init_tracing();
    let mock = MockChain::new();
    mock.emit(100, FACTORY, &collection_created(COLL));
    mock.emit(100, COLL, &transfer(Address::ZERO, ALICE, 7));

    let chain = chain_config(56, FACTORY, 100);
    let config = indexer_config(vec![chain.clone()], 100);
    let store = new_store();
    processor(&chain, &config, &mock, &store).await.run().await.unwrap();

    let token = nft(&store, 56, COLL, 7).await.unwrap();
    assert_eq!(token.owner, addr(&ALICE));
    let records: Vec<DatasourceRecord> = store.load_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].template, "Collection");
    assert_eq!(records[0].start_block, 100);
}

#[tokio::test]
async fn collection_logs_before_creation_are_ignored() {
    let mock = MockChain::new();
    mock.emit(95, COLL, &transfer(Address::ZERO, ALICE, 1));
    mock.emit(100, FACTORY, &collection_created(COLL));

    let chain = chain_config(56, FACTORY, 90);
    let config = indexer_config(vec![chain.clone()], 100);
    let store = new_store();
    processor(&chain, &config, &mock, &store).await.run().await.unwrap();

    assert!(nft(&store, 56, COLL, 1).await.is_none());
}

#[tokio::test]
async fn v2_registry_write_batch_and_compose() {
    init_tracing();
    let key = B256::repeat_byte(0x4b);
    let mock = MockChain::new();
    mock.emit(
        50,
        FACTORY,
        &INft2Factory::DataRegistryV2Created {
            dapp: OWNER,
            registry: REG,
            dappURI: "https://dapp.example".into(),
        },
    );
    mock.emit(
        51,
        REG,
        &IDataRegistryV2::WriteBatch {
            collection: COLL,
            startId: U256::from(10),
            endId: U256::from(12),
            key,
            value: Bytes::from(vec![0xca, 0xfe]),
        },
    );
    mock.emit(
        52,
        REG,
        &IDataRegistry::Compose {
            srcCollection: COLL,
            srcTokenId: U256::from(11),
            descCollection: ACCOUNT,
            descTokenId: U256::from(1),
            keys: vec![key],
        },
    );

    let chain = chain_config(56, FACTORY, 50);
    let config = indexer_config(vec![chain.clone()], 52);
    let store = new_store();
    processor(&chain, &config, &mock, &store).await.run().await.unwrap();

    let registry: DataRegistry = store.load(&contract_id(56, &REG)).await.unwrap().unwrap();
    assert_eq!(registry.uri, "https://dapp.example");
    assert_eq!(store.load_all::<DataRegistryNftData>().await.unwrap().len(), 4);

    let data = |collection: Address, token: u64| {
        nft_data_id(56, &REG, &collection, &U256::from(token), &key)
    };
    let moved: DataRegistryNftData = store.load(&data(ACCOUNT, 1)).await.unwrap().unwrap();
    assert_eq!(moved.value, "0xcafe");
    let emptied: DataRegistryNftData = store.load(&data(COLL, 11)).await.unwrap().unwrap();
    assert_eq!((emptied.key.as_str(), emptied.value.as_str()), ("", ""));
    let untouched: DataRegistryNftData = store.load(&data(COLL, 12)).await.unwrap().unwrap();
    assert_eq!(untouched.value, "0xcafe");
}

#[tokio::test]
async fn inscribe_calls_are_indexed_for_known_registries() {
    init_tracing();
    let mock = MockChain::new();
    mock.emit(
        10,
        FACTORY,
        &INft2Factory::DataRegistryCreated {
            dapp: OWNER,
            registry: REG,
            dappURI: String::new(),
        },
    );
    let call = IDataRegistry::inscribeCall {
        collection: COLL,
        tokenId: U256::from(3),
        metadata: Bytes::from(b"{}".to_vec()),
    };
    // Before the registry existed: no datasource, ignored.
    let early = mock.add_tx(9, REG, call.abi_encode());
    let hash = mock.add_tx(11, REG, call.abi_encode());

    let chain = chain_config(56, FACTORY, 5);
    let config = indexer_config(vec![chain.clone()], 11);
    let store = new_store();
    processor(&chain, &config, &mock, &store).await.run().await.unwrap();

    let all: Vec<DataRegistryNftInscription> = store.load_all().await.unwrap();
    assert_eq!(all.len(), 1);
    let ins: DataRegistryNftInscription = store
        .load(&inscription_id(56, &hash, 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ins.metadata, "0x7b7d");
    assert_eq!(ins.data_registry_id, contract_id(56, &REG));
    assert!(!store
        .exists::<DataRegistryNftInscription>(&inscription_id(56, &early, 0))
        .await
        .unwrap());
}

#[tokio::test]
async fn malformed_routed_log_halts_at_its_block() {
    init_tracing();
    let mock = MockChain::new();
    mock.emit(6, FACTORY, &collection_created(COLL));
    let good = collection_created(REG).encode_log_data();
    mock.emit_raw(
        7,
        FACTORY,
        good.topics().to_vec(),
        Bytes::from(good.data[..40].to_vec()),
    );
    mock.emit(8, FACTORY, &collection_created(ACCOUNT));

    let chain = chain_config(56, FACTORY, 5);
    let config = indexer_config(vec![chain.clone()], 8);
    let store = new_store();
    let p = processor(&chain, &config, &mock, &store).await;
    let err = p.run().await.unwrap_err();

    assert!(matches!(err, IndexerError::Decode { block: 7, .. }));
    assert!(!err.is_transient());
    assert!(matches!(
        *p.state().borrow(),
        ProcessorState::Failed { block: 7, .. }
    ));
    let cp: Checkpoint = store.load("56").await.unwrap().unwrap();
    assert_eq!(cp.block_number, 6);
    assert!(!store.exists::<Collection>(&contract_id(56, &ACCOUNT)).await.unwrap());
}

#[tokio::test]
async fn transient_fetch_failures_are_retried() {
    init_tracing();
    let mock = MockChain::new();
    mock.emit(20, FACTORY, &collection_created(COLL));
    // Three attempts per step: the first step gives up, the run loop retries the block.
    mock.fail_next_get_logs(4);

    let chain = chain_config(56, FACTORY, 20);
    let config = indexer_config(vec![chain.clone()], 20);
    let store = new_store();
    processor(&chain, &config, &mock, &store).await.run().await.unwrap();

    assert!(store.exists::<Collection>(&contract_id(56, &COLL)).await.unwrap());
    // Four failures, the range fetch, then the new collection's own logs.
    assert_eq!(mock.get_logs_calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn restart_resumes_from_checkpoint_with_discovered_sources() {
    init_tracing();
    let mock = MockChain::new();
    mock.emit(100, FACTORY, &collection_created(COLL));
    mock.emit(101, COLL, &transfer(Address::ZERO, ALICE, 1));

    let chain = chain_config(56, FACTORY, 100);
    let store = new_store();
    let config = indexer_config(vec![chain.clone()], 101);
    processor(&chain, &config, &mock, &store).await.run().await.unwrap();

    mock.emit(102, COLL, &transfer(ALICE, OWNER, 1));
    mock.log_requests.lock().unwrap().clear();
    let config = indexer_config(vec![chain.clone()], 102);
    let p = processor(&chain, &config, &mock, &store).await;
    p.run().await.unwrap();

    let token = nft(&store, 56, COLL, 1).await.unwrap();
    assert_eq!(token.owner, addr(&OWNER));
    let requests = mock.log_requests.lock().unwrap().clone();
    assert!(requests.iter().all(|f| f.from_block >= 102));
    assert!(requests.iter().any(|f| f.addresses.contains(&COLL)));
}

#[tokio::test]
async fn chains_are_isolated() {
    init_tracing();
    let bnb = MockChain::new();
    let avax = MockChain::new();
    bnb.emit(10, FACTORY, &collection_created(COLL));
    bnb.emit(11, COLL, &transfer(Address::ZERO, ALICE, 1));
    avax.emit(10, FACTORY, &collection_created(COLL));
    avax.emit(11, COLL, &transfer(Address::ZERO, OWNER, 1));
    // A malformed log halts avax only.
    avax.emit_raw(12, FACTORY, vec![INft2Factory::CollectionCreated::SIGNATURE_HASH], Bytes::new());
    bnb.set_tip(12);

    let chains = vec![chain_config(56, FACTORY, 10), chain_config(43114, FACTORY, 10)];
    let config = indexer_config(chains.clone(), 12);
    let store = new_store();
    let processors = vec![
        Arc::new(processor(&chains[0], &config, &bnb, &store).await),
        Arc::new(processor(&chains[1], &config, &avax, &store).await),
    ];
    let exits = run_chains(processors).await;

    assert!(exits[0].result.is_ok());
    assert!(exits[1].result.is_err());
    assert_eq!(exits[1].chain_id, 43114);
    assert_eq!(nft(&store, 56, COLL, 1).await.unwrap().owner, addr(&ALICE));
    assert_eq!(nft(&store, 43114, COLL, 1).await.unwrap().owner, addr(&OWNER));
    assert_eq!(store.load_all::<Collection>().await.unwrap().len(), 2);
}

#[tokio::test]
async fn derived_account_backfills_underlying_nft() {
    init_tracing();
    let mock = MockChain::new();
    mock.respond(COLL, IERC721::ownerOfCall::SELECTOR, (ALICE,).abi_encode_params());
    mock.respond(
        COLL,
        IERC721::tokenURICall::SELECTOR,
        ("ipfs://meta/5".to_string(),).abi_encode_params(),
    );
    mock.emit(
        30,
        FACTORY,
        &INft2Factory::DerivedAccountCreated {
            underlyingCollection: COLL,
            underlyingTokenId: U256::from(5),
            derivedAccount: ACCOUNT,
        },
    );

    let chain = chain_config(56, FACTORY, 30);
    let config = indexer_config(vec![chain.clone()], 30);
    let store = new_store();
    processor(&chain, &config, &mock, &store).await.run().await.unwrap();

    let account: DerivedAccount = store.load(&contract_id(56, &ACCOUNT)).await.unwrap().unwrap();
    let underlying = nft(&store, 56, COLL, 5).await.unwrap();
    assert_eq!(account.underlying_nft_id, underlying.id);
    assert_eq!(underlying.owner, addr(&ALICE));
    assert_eq!(underlying.token_uri, "ipfs://meta/5");
}

#[tokio::test]
async fn marketplace_events_are_appended_and_broadcast() {
    init_tracing();
    let mock = MockChain::new();
    let order_hash = B256::repeat_byte(0x0a);
    mock.emit(
        40,
        MARKET,
        &INft2Marketplace::TakerBid {
            orderHash: order_hash,
            orderNonce: U256::from(2),
            taker: ALICE,
            maker: OWNER,
            strategy: Address::ZERO,
            currency: Address::ZERO,
            collection: COLL,
            tokenId: U256::from(1),
            amount: U256::from(1),
            price: U256::from(500),
        },
    );
    let cancel_tx = mock.emit(
        41,
        MARKET,
        &INft2Marketplace::CancelMultipleOrders {
            user: OWNER,
            orderNonces: vec![U256::from(3), U256::from(4)],
        },
    );

    let mut chain = chain_config(56, FACTORY, 40);
    chain.marketplace_address = Some(MARKET);
    let config = indexer_config(vec![chain.clone()], 41);
    let store = new_store();
    let p = processor(&chain, &config, &mock, &store).await;
    let mut committed = p.subscribe();
    p.run().await.unwrap();

    let bid: TakerBid = store
        .load(&order_id(56, &order_hash, &U256::from(2)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bid.0.taker, addr(&ALICE));
    assert_eq!(bid.0.price, "500");
    let cancel: CancelMultipleOrders = store
        .load(&cancel_multiple_id(56, &OWNER, &cancel_tx))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancel.order_nonces, vec!["3", "4"]);

    let first = committed.recv().await.unwrap();
    let second = committed.recv().await.unwrap();
    assert_eq!((first.number, first.applied), (40, 1));
    assert_eq!((second.number, second.applied), (41, 1));
}

#[test]
fn run_with_nothing_to_index_stops_at_end_block() {
    let mock = MockChain::new();
    mock.set_tip(50);
    let chain = chain_config(56, FACTORY, 1);
    let config = indexer_config(vec![chain.clone()], 50);
    let store = new_store();
    tokio_test::block_on(async {
        let p = processor(&chain, &config, &mock, &store).await;
        tokio_test::assert_ok!(p.run().await);
    });
    let cp: Option<Checkpoint> = tokio_test::block_on(store.load("56")).unwrap();
    assert_eq!(cp.map(|c| c.block_number), Some(50));
}

#[tokio::test]
async fn genesis_block_is_indexed() {
    init_tracing();
    let mock = MockChain::new();
    mock.emit(0, FACTORY, &collection_created(COLL));

    let chain = chain_config(56, FACTORY, 0);
    let config = indexer_config(vec![chain.clone()], 0);
    let store = new_store();
    let p = processor(&chain, &config, &mock, &store).await;
    p.run().await.unwrap();

    let coll: Collection = store.load(&contract_id(56, &COLL)).await.unwrap().unwrap();
    assert_eq!(coll.block_height, 0);
    let cp: Checkpoint = store.load("56").await.unwrap().unwrap();
    assert_eq!(cp.block_number, 0);
}

#[tokio::test]
async fn rejected_log_ranges_are_narrowed() {
    init_tracing();
    let mock = MockChain::new();
    mock.limit_logs_span(3);
    mock.emit(1, FACTORY, &collection_created(COLL));
    mock.emit(3, COLL, &transfer(Address::ZERO, ALICE, 1));
    mock.emit(8, COLL, &transfer(Address::ZERO, ALICE, 2));
    mock.emit(12, COLL, &transfer(Address::ZERO, OWNER, 3));

    let chain = chain_config(56, FACTORY, 1);
    let config = indexer_config(vec![chain.clone()], 12);
    let store = new_store();
    processor(&chain, &config, &mock, &store).await.run().await.unwrap();

    for token in 1..=3 {
        assert!(nft(&store, 56, COLL, token).await.is_some(), "token {token}");
    }
    let cp: Checkpoint = store.load("56").await.unwrap().unwrap();
    assert_eq!(cp.block_number, 12);

    let requests = mock.log_requests.lock().unwrap().clone();
    assert!(requests.iter().any(|f| f.to_block - f.from_block + 1 > 3));
    let last = requests.last().unwrap();
    assert!(last.to_block - last.from_block + 1 <= 3);
}
