//! Handler set: per-event business logic mutating entities through the block's store.
//!
//! Handlers never hold state between calls; every invocation re-reads what it needs from
//! [HandlerContext::store]. A missing dependency is reported as [Outcome::Skipped] and the
//! rest of the block carries on. Store and registry failures propagate and abort the block.

pub mod collection;
pub mod data_registry;
pub mod derived_account;
pub mod factory;
pub mod marketplace;
pub mod nft;

use crate::abi::{Call, Event};
use crate::chain::{BlockHeader, ChainClient, LogEntry, TransactionEntry};
use crate::datasource::DatasourceRegistry;
use crate::error::HandlerError;
use crate::store::EntityStore;
use alloy::primitives::{Address, B256};
use std::time::Duration;

/// Tunables handlers read from config.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub enrich_nfts: bool,
    pub call_timeout: Duration,
    pub max_write_batch_span: u64,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            enrich_nfts: true,
            call_timeout: Duration::from_secs(5),
            max_write_batch_span: 10_000,
        }
    }
}

/// Everything a handler may touch: chain id, block metadata, store, registry, node.
pub struct HandlerContext<'a> {
    pub chain_id: u64,
    pub block: &'a BlockHeader,
    pub store: &'a dyn EntityStore,
    pub datasources: &'a DatasourceRegistry,
    pub client: &'a dyn ChainClient,
    pub settings: &'a HandlerSettings,
}

/// Where a decoded entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    /// Emitting contract (logs) or call target (calls).
    pub address: Address,
    pub block_number: u64,
    pub tx_hash: B256,
    pub tx_index: u64,
    /// Log index; None for calls.
    pub log_index: Option<u64>,
}

impl EntryMeta {
    pub fn from_log(log: &LogEntry) -> Self {
        Self {
            address: log.address,
            block_number: log.block_number,
            tx_hash: log.transaction_hash,
            tx_index: log.transaction_index,
            log_index: Some(log.log_index),
        }
    }

    pub fn from_tx(tx: &TransactionEntry, to: Address) -> Self {
        Self {
            address: to,
            block_number: tx.block_number,
            tx_hash: tx.hash,
            tx_index: tx.transaction_index,
            log_index: None,
        }
    }

    pub(crate) fn log_index_or_zero(&self) -> u64 {
        self.log_index.unwrap_or_default()
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// A referenced entity is absent or the event is out of bounds; nothing was written.
    Skipped(String),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

/// Route a decoded log to its handler.
pub async fn dispatch_event(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    event: &Event,
) -> Result<Outcome, HandlerError> {
    match event {
        Event::DataRegistryCreated(ev) => factory::handle_data_registry_created(ctx, ev).await,
        Event::DataRegistryV2Created(ev) => {
            factory::handle_data_registry_v2_created(ctx, ev).await
        }
        Event::CollectionCreated(ev) => factory::handle_collection_created(ctx, ev).await,
        Event::DerivedAccountCreated(ev) => {
            factory::handle_derived_account_created(ctx, ev).await
        }
        Event::AddonsCreated(ev) => factory::handle_addons_created(ctx, ev).await,
        Event::ERC6551AccountCreated(ev) => {
            factory::handle_erc6551_account_created(ctx, ev).await
        }
        Event::Transfer(ev) => collection::handle_transfer(ctx, meta, ev).await,
        Event::Write(ev) => data_registry::handle_write(ctx, meta, ev).await,
        Event::WriteBatch(ev) => data_registry::handle_write_batch(ctx, meta, ev).await,
        Event::Compose(ev) => data_registry::handle_compose(ctx, meta, ev).await,
        Event::Derive(ev) => data_registry::handle_derive(ctx, ev).await,
        Event::Reclaim(ev) => data_registry::handle_reclaim(ctx, ev).await,
        Event::DerivedTransfer(ev) => data_registry::handle_derived_transfer(ctx, meta, ev).await,
        Event::URIUpdated(ev) => data_registry::handle_uri_updated(ctx, meta, ev).await,
        Event::RoyaltyClaimed(ev) => derived_account::handle_royalty_claimed(ctx, meta, ev).await,
        Event::TakerBid(ev) => marketplace::handle_taker_bid(ctx, ev).await,
        Event::TakerAsk(ev) => marketplace::handle_taker_ask(ctx, ev).await,
        Event::CancelAllOrders(ev) => marketplace::handle_cancel_all_orders(ctx, ev).await,
        Event::CancelMultipleOrders(ev) => {
            marketplace::handle_cancel_multiple_orders(ctx, meta, ev).await
        }
        Event::RoyaltyPayment(ev) => marketplace::handle_royalty_payment(ctx, meta, ev).await,
    }
}

/// Route a decoded call to its handler.
pub async fn dispatch_call(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    call: &Call,
) -> Result<Outcome, HandlerError> {
    match call {
        Call::Inscribe(c) => data_registry::handle_inscribe_call(ctx, meta, c).await,
    }
}
