//! Block processor: the per-chain indexing loop.
//!
//! Blocks are processed strictly in ascending order. For each block the processor
//!
//! 1. fetches the logs of every active datasource (per range, see [BlockProcessor::process_range]),
//! 2. decodes them, registering datasources discovered by factory events and pulling in the
//!    new addresses' logs for the same block before anything is dispatched,
//! 3. dispatches logs in log-index order, then calls in transaction-index order,
//! 4. commits the block's writes, the checkpoint and new datasource records in one flush.
//!
//! A transient fetch failure aborts the block before any write and is retried from the
//! watermark. A decode or store failure halts the chain with the failing block number.

use crate::abi::{decode_call, decode_log, AbiId, Call, Event};
use crate::chain::{BlockHeader, ChainClient, LogEntry, LogFilter, TransactionEntry};
use crate::config::{ChainConfig, IndexerConfig, ReconnectionConfig};
use crate::cursor::Cursor;
use crate::datasource::{DatasourceRegistry, FACTORY, MARKETPLACE};
use crate::entities::{Checkpoint, DatasourceRecord};
use crate::error::{ClientError, IndexerError};
use crate::handlers::{
    dispatch_call, dispatch_event, factory, EntryMeta, HandlerContext, HandlerSettings, Outcome,
};
use crate::store::{EntityStore, EntityStoreExt, StagedStore};
use alloy::primitives::{Address, B256};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::Instrument;

/// Addresses per eth_getLogs request.
const MAX_ADDRESSES_PER_REQUEST: usize = 500;

/// Processor state, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Fetching,
    Decoding,
    Dispatching,
    /// Watermark after the last commit.
    Committed(u64),
    /// Halted on a fatal error.
    Failed { block: u64, reason: String },
}

/// Broadcast after each committed block that held entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCommitted {
    pub chain_id: u64,
    pub number: u64,
    pub applied: usize,
    pub skipped: usize,
}

/// Loop tunables, taken from [IndexerConfig].
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub getlogs_max_range: u64,
    pub poll_interval: Duration,
    pub max_fetch_attempts: u32,
    pub end_block: Option<u64>,
    pub reconnection: ReconnectionConfig,
}

impl From<&IndexerConfig> for ProcessorOptions {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            getlogs_max_range: config.getlogs_max_range.max(1),
            poll_interval: config.poll_interval(),
            max_fetch_attempts: config.max_fetch_attempts.max(1),
            end_block: config.end_block,
            reconnection: config.reconnection.clone(),
        }
    }
}

enum Entry {
    Log(Event),
    Call(Call),
}

struct Decoded {
    meta: EntryMeta,
    entry: Entry,
}

impl Decoded {
    fn name(&self) -> &'static str {
        match &self.entry {
            Entry::Log(ev) => ev.name(),
            Entry::Call(Call::Inscribe(_)) => "inscribe",
        }
    }
}

/// Logs of one fetched range, grouped by block. Duplicate `(txHash, logIndex)` pairs
/// are dropped on insert.
#[derive(Default)]
struct RangeLogs {
    by_block: BTreeMap<u64, Vec<LogEntry>>,
    seen: HashSet<(B256, u64)>,
}

impl RangeLogs {
    fn insert(&mut self, log: LogEntry) -> bool {
        if !self.seen.insert((log.transaction_hash, log.log_index)) {
            return false;
        }
        self.by_block.entry(log.block_number).or_default().push(log);
        true
    }

    fn take(&mut self, block: u64) -> Vec<LogEntry> {
        let mut logs = self.by_block.remove(&block).unwrap_or_default();
        logs.sort_by_key(|l| l.log_index);
        logs
    }
}

/// Per-chain indexing loop.
pub struct BlockProcessor {
    chain_id: u64,
    name: String,
    start_block: u64,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn EntityStore>,
    datasources: DatasourceRegistry,
    settings: HandlerSettings,
    options: ProcessorOptions,
    /// Current eth_getLogs range width. Starts at `getlogs_max_range`, halved when the node
    /// rejects a range.
    logs_span: AtomicU64,
    state_tx: watch::Sender<ProcessorState>,
    committed_tx: broadcast::Sender<BlockCommitted>,
}

impl BlockProcessor {
    /// Processor for `chain` with the factory (and optional marketplace) as static sources.
    pub async fn new(
        chain: &ChainConfig,
        config: &IndexerConfig,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        let datasources = DatasourceRegistry::with_protocol_templates(chain.chain_id);
        datasources
            .add_static(FACTORY, AbiId::Factory, chain.factory_address, chain.start_block)
            .await;
        if let Some(marketplace) = chain.marketplace_address {
            let start = chain.marketplace_start_block.unwrap_or(chain.start_block);
            datasources
                .add_static(MARKETPLACE, AbiId::Marketplace, marketplace, start)
                .await;
        }
        let start_block = chain
            .marketplace_address
            .and(chain.marketplace_start_block)
            .map_or(chain.start_block, |m| m.min(chain.start_block));
        let options = ProcessorOptions::from(config);
        let (state_tx, _) = watch::channel(ProcessorState::Idle);
        let (committed_tx, _) = broadcast::channel(256);
        Self {
            chain_id: chain.chain_id,
            name: chain.name.clone(),
            start_block,
            client,
            store,
            datasources,
            settings: HandlerSettings {
                enrich_nfts: config.enrich_nfts,
                call_timeout: config.call_timeout(),
                max_write_batch_span: config.max_write_batch_span,
            },
            logs_span: AtomicU64::new(options.getlogs_max_range),
            options,
            state_tx,
            committed_tx,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn datasources(&self) -> &DatasourceRegistry {
        &self.datasources
    }

    /// Subscribe to committed-block notices.
    pub fn subscribe(&self) -> broadcast::Receiver<BlockCommitted> {
        self.committed_tx.subscribe()
    }

    /// Watch the state machine.
    pub fn state(&self) -> watch::Receiver<ProcessorState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ProcessorState) {
        self.state_tx.send_replace(state);
    }

    /// Reload the checkpoint and runtime datasources persisted by earlier runs.
    pub async fn resume(&self) -> Result<Cursor, IndexerError> {
        let at = self.start_block;
        let checkpoint = self
            .store
            .load::<Checkpoint>(&self.chain_id.to_string())
            .await
            .map_err(|source| IndexerError::Store { block: at, source })?;
        let records = self
            .store
            .load_all::<DatasourceRecord>()
            .await
            .map_err(|source| IndexerError::Store { block: at, source })?;
        let restored = self
            .datasources
            .restore(&records)
            .await
            .map_err(|source| IndexerError::Registry { block: at, source })?;
        let cursor = Cursor::resume(checkpoint.map(|c| c.block_number), self.start_block);
        tracing::info!(
            chain_id = self.chain_id,
            chain = %self.name,
            watermark = ?cursor.last_processed_block,
            restored,
            "resuming"
        );
        if let Some(block) = cursor.last_processed_block {
            self.set_state(ProcessorState::Committed(block));
        }
        Ok(cursor)
    }

    /// Follow the chain until `end_block` (forever when unset) or a fatal error.
    pub async fn run(&self) -> Result<(), IndexerError> {
        let mut cursor = self.resume().await?;
        let mut failures = 0u32;
        loop {
            if let Some(end) = self.options.end_block {
                if cursor.reached(end) {
                    tracing::info!(chain_id = self.chain_id, end, "reached end block");
                    self.set_state(ProcessorState::Idle);
                    return Ok(());
                }
            }
            match self.step(&mut cursor).await {
                Ok(true) => failures = 0,
                Ok(false) => {
                    failures = 0;
                    self.set_state(ProcessorState::Idle);
                    sleep(self.options.poll_interval).await;
                }
                Err(e) if e.is_transient() => {
                    let delay = self.retry_delay(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        chain_id = self.chain_id,
                        block = e.block(),
                        reason = %e,
                        ?delay,
                        "block aborted, retrying from watermark"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        chain_id = self.chain_id,
                        block = e.block(),
                        reason = %e,
                        "indexing halted"
                    );
                    self.set_state(ProcessorState::Failed {
                        block: e.block(),
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.options.reconnection.backoff(attempt);
        if base.is_zero() {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..500))
    }

    /// Process everything up to the current target. `Ok(false)` when already caught up.
    pub async fn step(&self, cursor: &mut Cursor) -> Result<bool, IndexerError> {
        let next = cursor.next_block();
        let tip = self
            .with_retry(next, "eth_blockNumber", || self.client.block_number())
            .await?;
        let target = self.options.end_block.map_or(tip, |end| end.min(tip));
        if next > target {
            return Ok(false);
        }
        self.process_range(cursor, target).await?;
        Ok(true)
    }

    /// Process `[cursor.next_block(), to]` in ranges of at most `getlogs_max_range` blocks.
    ///
    /// A range the node rejects is halved and retried from the watermark; a single block the
    /// node still rejects surfaces as [IndexerError::Fetch].
    pub async fn process_range(&self, cursor: &mut Cursor, to: u64) -> Result<(), IndexerError> {
        let mut from = cursor.next_block();
        while from <= to {
            let span = self.logs_span.load(Ordering::Relaxed);
            let range_end = from.saturating_add(span - 1).min(to);
            match self.process_chunk(cursor, from, range_end).await {
                Ok(()) => from = range_end + 1,
                Err(IndexerError::RangeRejected {
                    block,
                    from: rejected_from,
                    to: rejected_to,
                    reason,
                }) => {
                    let narrowed = ((rejected_to - rejected_from + 1) / 2).max(1);
                    self.logs_span.fetch_min(narrowed, Ordering::Relaxed);
                    tracing::warn!(
                        chain_id = self.chain_id,
                        block,
                        rejected_from,
                        rejected_to,
                        narrowed,
                        %reason,
                        "eth_getLogs range rejected, narrowing"
                    );
                    from = cursor.next_block();
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn process_chunk(
        &self,
        cursor: &mut Cursor,
        from: u64,
        to: u64,
    ) -> Result<(), IndexerError> {
        self.set_state(ProcessorState::Fetching);
        let addresses = self.datasources.addresses_up_to(to).await;
        let mut range = RangeLogs::default();
        for log in self.fetch_logs(&addresses, from, to).await? {
            range.insert(log);
        }
        tracing::debug!(
            chain_id = self.chain_id,
            from,
            to,
            addresses = addresses.len(),
            logs = range.seen.len(),
            "fetched range"
        );

        for block in from..=to {
            let logs = range.take(block);
            let span = tracing::info_span!("block", chain_id = self.chain_id, number = block);
            self.process_block(cursor, block, to, logs, &mut range)
                .instrument(span)
                .await?;
        }

        if !cursor.reached(to) {
            self.store
                .store(&Checkpoint::new(self.chain_id, to))
                .await
                .map_err(|source| IndexerError::Store { block: to, source })?;
            cursor.advance(to);
            self.set_state(ProcessorState::Committed(to));
        }
        Ok(())
    }

    async fn process_block(
        &self,
        cursor: &mut Cursor,
        block: u64,
        range_end: u64,
        logs: Vec<LogEntry>,
        range: &mut RangeLogs,
    ) -> Result<(), IndexerError> {
        self.set_state(ProcessorState::Decoding);
        let mut entries = self.decode_logs(block, range_end, logs, range).await?;

        if self.datasources.has_call_sources(block).await {
            self.set_state(ProcessorState::Fetching);
            let txs = self
                .with_retry(block, "eth_getBlockByNumber", || {
                    self.client.get_block_transactions(block)
                })
                .await?;
            self.set_state(ProcessorState::Decoding);
            entries.extend(self.decode_calls(block, &txs).await?);
        }

        if entries.is_empty() {
            return Ok(());
        }

        self.set_state(ProcessorState::Fetching);
        let header = self
            .with_retry(block, "eth_getBlockByNumber", || {
                self.client.get_block_header(block)
            })
            .await?;

        self.set_state(ProcessorState::Dispatching);
        let (applied, skipped) = self.dispatch_and_commit(&header, &entries).await?;
        cursor.advance(block);
        self.set_state(ProcessorState::Committed(block));
        tracing::debug!(applied, skipped, "block committed");
        let _ = self.committed_tx.send(BlockCommitted {
            chain_id: self.chain_id,
            number: block,
            applied,
            skipped,
        });
        Ok(())
    }

    /// Decode `logs` of `block`, registering discovered datasources on the way. Logs of
    /// newly registered addresses are fetched for `[block, range_end]`: the ones at `block`
    /// join this pass, later ones are parked in `range`.
    async fn decode_logs(
        &self,
        block: u64,
        range_end: u64,
        logs: Vec<LogEntry>,
        range: &mut RangeLogs,
    ) -> Result<Vec<Decoded>, IndexerError> {
        let mut decoded = Vec::new();
        let mut pending = logs;
        while !pending.is_empty() {
            let mut discovered = BTreeSet::new();
            for log in pending.drain(..) {
                for ds in self.datasources.sources_for(&log.address, block).await {
                    let event = decode_log(ds.abi, &log)
                        .map_err(|source| IndexerError::Decode { block, source })?;
                    let Some(event) = event else { continue };
                    if let Some((template, address)) = factory::discovered_datasource(&event) {
                        let added = self
                            .datasources
                            .instantiate(template, address, block)
                            .await
                            .map_err(|source| IndexerError::Registry { block, source })?;
                        if added {
                            discovered.insert(address);
                        }
                    }
                    decoded.push(Decoded {
                        meta: EntryMeta::from_log(&log),
                        entry: Entry::Log(event),
                    });
                }
            }
            if discovered.is_empty() {
                break;
            }
            let addresses: Vec<Address> = discovered.into_iter().collect();
            self.set_state(ProcessorState::Fetching);
            for log in self.fetch_logs(&addresses, block, range_end).await? {
                let at = log.block_number;
                if at < block {
                    continue;
                }
                let seen = (log.transaction_hash, log.log_index);
                if at == block {
                    if range.seen.insert(seen) {
                        pending.push(log);
                    }
                } else {
                    range.insert(log);
                }
            }
            self.set_state(ProcessorState::Decoding);
        }
        // Stable: entries of one log keep datasource registration order.
        decoded.sort_by_key(|d| d.meta.log_index_or_zero());
        Ok(decoded)
    }

    async fn decode_calls(
        &self,
        block: u64,
        txs: &[TransactionEntry],
    ) -> Result<Vec<Decoded>, IndexerError> {
        let mut decoded = Vec::new();
        for tx in txs {
            let Some(to) = tx.to else { continue };
            for ds in self.datasources.sources_for(&to, block).await {
                if !ds.abi.has_call_handlers() {
                    continue;
                }
                if let Some(call) = decode_call(ds.abi, tx)
                    .map_err(|source| IndexerError::Decode { block, source })?
                {
                    decoded.push(Decoded {
                        meta: EntryMeta::from_tx(tx, to),
                        entry: Entry::Call(call),
                    });
                }
            }
        }
        Ok(decoded)
    }

    async fn dispatch_and_commit(
        &self,
        header: &BlockHeader,
        entries: &[Decoded],
    ) -> Result<(usize, usize), IndexerError> {
        let block = header.number;
        let staged = StagedStore::new(Arc::clone(&self.store));
        let (mut applied, mut skipped) = (0usize, 0usize);
        {
            let ctx = HandlerContext {
                chain_id: self.chain_id,
                block: header,
                store: &staged,
                datasources: &self.datasources,
                client: self.client.as_ref(),
                settings: &self.settings,
            };
            for d in entries {
                let outcome = match &d.entry {
                    Entry::Log(event) => dispatch_event(&ctx, &d.meta, event).await,
                    Entry::Call(call) => dispatch_call(&ctx, &d.meta, call).await,
                }
                .map_err(|e| e.at_block(block))?;
                match outcome {
                    Outcome::Applied => applied += 1,
                    Outcome::Skipped(reason) => {
                        skipped += 1;
                        tracing::debug!(entry = d.name(), %reason, "entry skipped");
                    }
                }
            }
        }

        let store_err = |source| IndexerError::Store { block, source };
        staged
            .store(&Checkpoint::new(self.chain_id, block))
            .await
            .map_err(store_err)?;
        for ds in self.datasources.take_fresh().await {
            staged
                .store(&self.datasources.to_record(&ds))
                .await
                .map_err(store_err)?;
        }
        let written = staged.commit().await.map_err(store_err)?;
        tracing::trace!(written, "flushed block writes");
        Ok((applied, skipped))
    }

    async fn fetch_logs(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
    ) -> Result<Vec<LogEntry>, IndexerError> {
        let mut topics: Vec<B256> = Vec::new();
        for (_, abi) in self.datasources.active_filters(to).await {
            for t in abi.topics() {
                if !topics.contains(&t) {
                    topics.push(t);
                }
            }
        }
        let mut logs = Vec::new();
        for batch in addresses.chunks(MAX_ADDRESSES_PER_REQUEST) {
            let filter = LogFilter {
                from_block: from,
                to_block: to,
                addresses: batch.to_vec(),
                topics: topics.clone(),
            };
            let fetched = self
                .with_retry(from, "eth_getLogs", || self.client.get_logs(&filter))
                .await
                .map_err(|e| match e {
                    IndexerError::Fetch {
                        block,
                        source: ClientError::Rpc(reason),
                    } if to > from => IndexerError::RangeRejected {
                        block,
                        from,
                        to,
                        reason,
                    },
                    other => other,
                })?;
            logs.extend(fetched);
        }
        Ok(logs)
    }

    /// Run `op` up to `max_fetch_attempts` times with backoff.
    async fn with_retry<T, F, Fut>(
        &self,
        block: u64,
        method: &'static str,
        mut op: F,
    ) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(source) => {
                    attempt += 1;
                    if attempt >= self.options.max_fetch_attempts {
                        return Err(IndexerError::Fetch { block, source });
                    }
                    let delay = self.options.reconnection.backoff(attempt - 1);
                    tracing::warn!(
                        chain_id = self.chain_id,
                        block,
                        method,
                        attempt,
                        reason = %source,
                        "fetch failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Exit status of one chain under [run_chains].
#[derive(Debug)]
pub struct ChainExit {
    pub chain_id: u64,
    pub result: anyhow::Result<()>,
}

/// Run every processor on its own task. A halt on one chain leaves the others running;
/// returns once all of them stopped.
pub async fn run_chains(processors: Vec<Arc<BlockProcessor>>) -> Vec<ChainExit> {
    let handles: Vec<_> = processors
        .into_iter()
        .map(|p| {
            let chain_id = p.chain_id();
            (chain_id, tokio::spawn(async move { p.run().await }))
        })
        .collect();
    let (ids, tasks): (Vec<u64>, Vec<_>) = handles.into_iter().unzip();
    let results = futures_util::future::join_all(tasks).await;
    ids.into_iter()
        .zip(results)
        .map(|(chain_id, joined)| {
            let result = match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::Error::new(e)),
                Err(e) => Err(anyhow::anyhow!("chain {chain_id} task failed: {e}")),
            };
            ChainExit { chain_id, result }
        })
        .collect()
}
