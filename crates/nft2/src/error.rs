//! Error taxonomy for the indexing pipeline.
//!
//! - [ClientError]: RPC / node failures. Retried at the fetch step.
//! - [DecodeError]: a routed log or call whose body does not match its ABI. Fatal for the block.
//! - [StoreError]: entity store failures. Fatal for the block.
//! - [IndexerError]: top-level error surfaced by the block processor.

use thiserror::Error;

/// Errors produced by a [crate::chain::ChainClient].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("all RPC endpoints failed, last error: {0}")]
    Exhausted(Box<ClientError>),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Transport(format!("timeout: {e}"))
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

/// A log or call matched a routed signature but its body failed ABI decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopic0,
    #[error("failed to decode {name}: {reason}")]
    Abi { name: &'static str, reason: String },
}

impl DecodeError {
    pub(crate) fn abi(name: &'static str, e: impl std::fmt::Display) -> Self {
        DecodeError::Abi {
            name,
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize {kind} {id}: {reason}")]
    Serialize {
        kind: &'static str,
        id: String,
        reason: String,
    },
    #[error("failed to deserialize {kind} {id}: {reason}")]
    Deserialize {
        kind: &'static str,
        id: String,
        reason: String,
    },
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown datasource template: {0}")]
    UnknownTemplate(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level error from the block processor.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("fetch failed at block {block}: {source}")]
    Fetch {
        block: u64,
        #[source]
        source: ClientError,
    },
    /// The node refused an eth_getLogs range wider than one block. The processor narrows
    /// the range and retries.
    #[error("eth_getLogs rejected {from}..={to} at block {block}: {reason}")]
    RangeRejected {
        block: u64,
        from: u64,
        to: u64,
        reason: String,
    },
    #[error("malformed entry in block {block}: {source}")]
    Decode {
        block: u64,
        #[source]
        source: DecodeError,
    },
    #[error("store failure in block {block}: {source}")]
    Store {
        block: u64,
        #[source]
        source: StoreError,
    },
    #[error("datasource registry failure in block {block}: {source}")]
    Registry {
        block: u64,
        #[source]
        source: RegistryError,
    },
}

impl IndexerError {
    /// Transient errors abort the block and are retried from the watermark.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IndexerError::Fetch { .. } | IndexerError::RangeRejected { .. }
        )
    }

    /// Block at which processing stopped.
    pub fn block(&self) -> u64 {
        match self {
            IndexerError::Fetch { block, .. }
            | IndexerError::RangeRejected { block, .. }
            | IndexerError::Decode { block, .. }
            | IndexerError::Store { block, .. }
            | IndexerError::Registry { block, .. } => *block,
        }
    }
}

/// Errors raised inside a handler. Missing dependencies are not errors; handlers
/// report them as [crate::handlers::Outcome::Skipped].
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl HandlerError {
    pub(crate) fn at_block(self, block: u64) -> IndexerError {
        match self {
            HandlerError::Store(source) => IndexerError::Store { block, source },
            HandlerError::Registry(source) => IndexerError::Registry { block, source },
        }
    }
}
