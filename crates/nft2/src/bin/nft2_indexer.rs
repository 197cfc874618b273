//! nft2-indexer: index one or more chains into the in-process entity store.
//!
//! Either `--config chains.yaml` or a single chain from flags / environment:
//!
//! ```text
//! CHAIN_ID=56 RPC_ENDPOINT=https://bsc.example PROTOCOL_START_BLOCK=30000000 \
//! PROTOCOL_FACTORY_ADDRESS=0x... nft2-indexer
//! ```

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use clap::Parser;
use nft2::{
    run_chains, BlockProcessor, ChainConfig, EntityStore, HttpChainClient, IndexerConfig,
    MemoryStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// NFT2.0 event indexer
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct CliArgs {
    /// YAML config describing all chains. Chain flags are ignored when set.
    #[clap(long, env = "NFT2_CONFIG")]
    config: Option<PathBuf>,

    #[clap(long, env = "CHAIN_ID")]
    chain_id: Option<u64>,

    /// Name used in logs.
    #[clap(long, env = "CHAIN_NAME", default_value = "")]
    chain_name: String,

    /// Comma separated HTTP JSON-RPC endpoints.
    #[clap(long, env = "RPC_ENDPOINT", value_delimiter = ',')]
    rpc_endpoint: Vec<String>,

    #[clap(long, env = "PROTOCOL_START_BLOCK")]
    start_block: Option<u64>,

    #[clap(long, env = "PROTOCOL_FACTORY_ADDRESS")]
    factory_address: Option<Address>,

    #[clap(long, env = "MARKETPLACE_ADDRESS")]
    marketplace_address: Option<Address>,

    #[clap(long, env = "MARKETPLACE_START_BLOCK")]
    marketplace_start_block: Option<u64>,

    /// Stop after this block.
    #[clap(long)]
    end_block: Option<u64>,

    /// Skip tokenURI/ownerOf calls for lazily created NFTs.
    #[clap(long)]
    no_enrich: bool,
}

impl CliArgs {
    fn indexer_config(&self) -> Result<IndexerConfig> {
        let mut config = match &self.config {
            Some(path) => IndexerConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => {
                let Some(chain_id) = self.chain_id else {
                    bail!("either --config or CHAIN_ID is required");
                };
                let Some(factory_address) = self.factory_address else {
                    bail!("PROTOCOL_FACTORY_ADDRESS is required");
                };
                let config = IndexerConfig {
                    chains: vec![ChainConfig {
                        chain_id,
                        name: self.chain_name.clone(),
                        rpc_endpoints: self.rpc_endpoint.clone(),
                        start_block: self.start_block.unwrap_or_default(),
                        factory_address,
                        marketplace_address: self.marketplace_address,
                        marketplace_start_block: self.marketplace_start_block,
                    }],
                    ..IndexerConfig::default()
                };
                config.validate()?;
                config
            }
        };
        if self.end_block.is_some() {
            config.end_block = self.end_block;
        }
        if self.no_enrich {
            config.enrich_nfts = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .compact()
        .init();

    let args = CliArgs::parse();
    let config = args.indexer_config()?;
    let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());

    let mut processors = Vec::with_capacity(config.chains.len());
    for chain in &config.chains {
        let client = HttpChainClient::new(chain.rpc_endpoints.clone(), config.request_timeout())
            .with_context(|| format!("chain {}: building RPC client", chain.chain_id))?;
        let processor =
            BlockProcessor::new(chain, &config, Arc::new(client), Arc::clone(&store)).await;
        tracing::info!(
            chain_id = chain.chain_id,
            chain = %chain.name,
            start_block = chain.start_block,
            "chain configured"
        );
        processors.push(Arc::new(processor));
    }

    tokio::select! {
        exits = run_chains(processors) => {
            let mut failed = 0;
            for exit in exits {
                if let Err(e) = exit.result {
                    tracing::error!(chain_id = exit.chain_id, reason = %e, "chain stopped");
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{failed} chain(s) halted");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }
    Ok(())
}
