//! Off-chain indexer for the NFT2.0 contract family.
//!
//! - **Datasource registry** ([datasource]): static factory/marketplace sources plus the
//!   registries, collections and derived accounts the factory deploys at runtime.
//! - **Block processor** ([processor]): ordered per-chain block loop with same-block
//!   discovery, per-block atomic commits and a persisted watermark.
//! - **Handlers** ([handlers]): per-event entity mutations against an [store::EntityStore].
//!
//! The node is reached through the [chain::ChainClient] port; [rpc::HttpChainClient] is the
//! JSON-RPC implementation.

pub mod abi;
pub mod chain;
pub mod config;
pub mod cursor;
pub mod datasource;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod processor;
pub mod rpc;
pub mod store;

pub use abi::{AbiId, Call, Event};
pub use chain::{BlockHeader, ChainClient, LogEntry, LogFilter, TransactionEntry};
pub use config::{ChainConfig, IndexerConfig, ReconnectionConfig};
pub use cursor::Cursor;
pub use datasource::{Datasource, DatasourceRegistry};
pub use error::{
    ClientError, ConfigError, DecodeError, HandlerError, IndexerError, RegistryError, StoreError,
};
pub use handlers::{HandlerContext, HandlerSettings, Outcome};
pub use processor::{run_chains, BlockCommitted, BlockProcessor, ChainExit, ProcessorState};
pub use rpc::HttpChainClient;
pub use store::{EntityStore, EntityStoreExt, MemoryStore, StagedStore};
