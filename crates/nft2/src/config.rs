//! Indexer configuration.

use crate::error::ConfigError;
use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// One chain to index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Human-readable name for logs ("bnb", "avax-testnet", ...).
    #[serde(default)]
    pub name: String,
    /// HTTP JSON-RPC endpoints, tried in order on failure.
    pub rpc_endpoints: Vec<String>,
    /// First block of the factory datasource.
    pub start_block: u64,
    pub factory_address: Address,
    #[serde(default)]
    pub marketplace_address: Option<Address>,
    /// Defaults to `start_block`.
    #[serde(default)]
    pub marketplace_start_block: Option<u64>,
}

/// Reconnection backoff.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconnectionConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

impl ReconnectionConfig {
    /// Delay before retry number `attempt` (0-based): doubles from the initial backoff, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self
            .initial_backoff_secs
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}

/// Indexer configuration shared by all chains.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub chains: Vec<ChainConfig>,
    /// Max block range per eth_getLogs request.
    pub getlogs_max_range: u64,
    /// Sleep between polls once caught up with the chain tip.
    pub poll_interval_ms: u64,
    /// Bound on best-effort enrichment calls (tokenURI / ownerOf).
    pub call_timeout_ms: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_ms: u64,
    /// Query tokenURI/ownerOf when an NFT is created lazily.
    pub enrich_nfts: bool,
    /// Largest `endId - startId` a single WriteBatch may expand to.
    pub max_write_batch_span: u64,
    /// Fetch attempts per step before the block is abandoned and retried from the watermark.
    pub max_fetch_attempts: u32,
    /// Stop after committing this block (all chains). Follows the tip forever when None.
    pub end_block: Option<u64>,
    pub reconnection: ReconnectionConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chains: Vec::new(),
            getlogs_max_range: 1000,
            poll_interval_ms: 3000,
            call_timeout_ms: 5000,
            request_timeout_ms: 15000,
            enrich_nfts: true,
            max_write_batch_span: 10_000,
            max_fetch_attempts: 5,
            end_block: None,
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Load from a YAML file and validate.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::Invalid("no chains configured".into()));
        }
        if self.getlogs_max_range == 0 {
            return Err(ConfigError::Invalid("getlogs_max_range must be > 0".into()));
        }
        if self.max_fetch_attempts == 0 {
            return Err(ConfigError::Invalid("max_fetch_attempts must be > 0".into()));
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.rpc_endpoints.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "chain {} has no rpc endpoints",
                    chain.chain_id
                )));
            }
            if !seen.insert(chain.chain_id) {
                return Err(ConfigError::Invalid(format!(
                    "chain {} configured twice",
                    chain.chain_id
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
