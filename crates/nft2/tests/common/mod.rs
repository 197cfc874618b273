//! Common helpers for integration tests: a scripted in-memory chain and config builders.

#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, B256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use nft2::{
    BlockHeader, BlockProcessor, ChainClient, ChainConfig, ClientError, EntityStore,
    IndexerConfig, LogEntry, LogFilter, ReconnectionConfig, TransactionEntry,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn tx_hash(block: u64, index: u64) -> B256 {
    B256::left_padding_from(&(block * 10_000 + index).to_be_bytes())
}

pub fn header(number: u64) -> BlockHeader {
    BlockHeader {
        number,
        hash: B256::left_padding_from(&number.to_be_bytes()),
        timestamp: 1_700_000_000 + number * 3,
    }
}

/// Scripted chain. Each emitted log gets its own transaction hash; log indices count up
/// per block in emission order.
#[derive(Default)]
pub struct MockChain {
    tip: AtomicU64,
    logs: Mutex<Vec<LogEntry>>,
    txs: Mutex<BTreeMap<u64, Vec<TransactionEntry>>>,
    calls: Mutex<HashMap<(Address, [u8; 4]), Bytes>>,
    failing_get_logs: AtomicU32,
    max_logs_span: AtomicU64,
    pub get_logs_calls: AtomicUsize,
    pub log_requests: Mutex<Vec<LogFilter>>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_tip(&self, block: u64) {
        self.tip.fetch_max(block, Ordering::SeqCst);
    }

    /// Append `event` emitted by `address` at `block`. Returns the log's tx hash.
    pub fn emit<E: SolEvent>(&self, block: u64, address: Address, event: &E) -> B256 {
        let data = event.encode_log_data();
        self.emit_raw(block, address, data.topics().to_vec(), data.data.clone())
    }

    pub fn emit_raw(&self, block: u64, address: Address, topics: Vec<B256>, data: Bytes) -> B256 {
        let mut logs = self.logs.lock().unwrap();
        let log_index = logs.iter().filter(|l| l.block_number == block).count() as u64;
        let hash = tx_hash(block, log_index);
        logs.push(LogEntry {
            address,
            block_number: block,
            transaction_hash: hash,
            transaction_index: log_index,
            log_index,
            topics,
            data,
        });
        self.set_tip(block);
        hash
    }

    /// Append a transaction calling `to` with `input` at `block`.
    pub fn add_tx(&self, block: u64, to: Address, input: Vec<u8>) -> B256 {
        let mut txs = self.txs.lock().unwrap();
        let entry = txs.entry(block).or_default();
        let index = entry.len() as u64;
        let hash = tx_hash(block, 5_000 + index);
        entry.push(TransactionEntry {
            hash,
            block_number: block,
            transaction_index: index,
            from: Address::repeat_byte(0xee),
            to: Some(to),
            input: Bytes::from(input),
        });
        drop(txs);
        self.set_tip(block);
        hash
    }

    /// Answer eth_call to `to` with `selector` by `output`. Unscripted calls revert.
    pub fn respond(&self, to: Address, selector: [u8; 4], output: Vec<u8>) {
        self.calls
            .lock()
            .unwrap()
            .insert((to, selector), Bytes::from(output));
    }

    /// Reject eth_getLogs ranges wider than `blocks` with an RPC error, the way public nodes
    /// cap query ranges.
    pub fn limit_logs_span(&self, blocks: u64) {
        self.max_logs_span.store(blocks, Ordering::SeqCst);
    }

    /// Make the next `n` eth_getLogs requests fail with a transport error.
    pub fn fail_next_get_logs(&self, n: u32) {
        self.failing_get_logs.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ClientError> {
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn get_block_header(&self, number: u64) -> Result<BlockHeader, ClientError> {
        Ok(header(number))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ClientError> {
        self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
        self.log_requests.lock().unwrap().push(filter.clone());
        let failing = self.failing_get_logs.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_get_logs.store(failing - 1, Ordering::SeqCst);
            return Err(ClientError::Transport("connection reset".into()));
        }
        let limit = self.max_logs_span.load(Ordering::SeqCst);
        if limit > 0 && filter.to_block - filter.from_block + 1 > limit {
            return Err(ClientError::Rpc(format!(
                "block range exceeds limit of {limit}"
            )));
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.block_number >= filter.from_block && l.block_number <= filter.to_block)
            .filter(|l| filter.addresses.contains(&l.address))
            .filter(|l| {
                filter.topics.is_empty()
                    || l.topic0().is_some_and(|t| filter.topics.contains(t))
            })
            .cloned()
            .collect())
    }

    async fn get_block_transactions(
        &self,
        number: u64,
    ) -> Result<Vec<TransactionEntry>, ClientError> {
        Ok(self
            .txs
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn call(
        &self,
        to: Address,
        calldata: Bytes,
        _block: Option<u64>,
    ) -> Result<Bytes, ClientError> {
        let selector: [u8; 4] = calldata
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| ClientError::Rpc("short calldata".into()))?;
        self.calls
            .lock()
            .unwrap()
            .get(&(to, selector))
            .cloned()
            .ok_or_else(|| ClientError::Rpc("execution reverted".into()))
    }
}

pub fn chain_config(chain_id: u64, factory: Address, start_block: u64) -> ChainConfig {
    ChainConfig {
        chain_id,
        name: format!("test-{chain_id}"),
        rpc_endpoints: vec!["http://unused.invalid".into()],
        start_block,
        factory_address: factory,
        marketplace_address: None,
        marketplace_start_block: None,
    }
}

/// Fast config: no backoff, small ranges, stops at `end_block`.
pub fn indexer_config(chains: Vec<ChainConfig>, end_block: u64) -> IndexerConfig {
    IndexerConfig {
        chains,
        getlogs_max_range: 10,
        poll_interval_ms: 5,
        call_timeout_ms: 200,
        max_fetch_attempts: 3,
        end_block: Some(end_block),
        reconnection: ReconnectionConfig {
            initial_backoff_secs: 0,
            max_backoff_secs: 0,
        },
        ..IndexerConfig::default()
    }
}

pub async fn processor(
    chain: &ChainConfig,
    config: &IndexerConfig,
    mock: &Arc<MockChain>,
    store: &Arc<dyn EntityStore>,
) -> BlockProcessor {
    let client: Arc<dyn ChainClient> = mock.clone();
    BlockProcessor::new(chain, config, client, Arc::clone(store)).await
}
