//! Lazy NFT materialization.
//!
//! Derive, compose, reclaim and factory events can name tokens whose mint was never indexed.
//! [get_or_create_nft] creates a blank record for them and, best-effort, backfills owner and
//! URI with read-only calls bounded by `call_timeout`. Enrichment failures never fail a handler.

use super::HandlerContext;
use crate::abi::IERC721;
use crate::entities::{addr, nft_id, Nft};
use crate::error::StoreError;
use crate::store::EntityStoreExt;
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;

/// Owner and URI read from the collection contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftMetadata {
    pub owner: Address,
    pub token_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    Enriched(NftMetadata),
    EnrichmentFailed(String),
}

async fn read_call<C: SolCall>(
    ctx: &HandlerContext<'_>,
    collection: Address,
    call: C,
) -> Result<C::Return, String> {
    let calldata = Bytes::from(call.abi_encode());
    let fut = ctx
        .client
        .call(collection, calldata, Some(ctx.block.number));
    let raw = match tokio::time::timeout(ctx.settings.call_timeout, fut).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => return Err(format!("{}: {e}", C::SIGNATURE)),
        Err(_) => {
            return Err(format!(
                "{}: timed out after {:?}",
                C::SIGNATURE,
                ctx.settings.call_timeout
            ))
        }
    };
    C::abi_decode_returns(&raw, true).map_err(|e| format!("{}: {e}", C::SIGNATURE))
}

/// Query `ownerOf` and `tokenURI` at the current block.
pub async fn enrich(ctx: &HandlerContext<'_>, collection: Address, token_id: U256) -> Enrichment {
    let owner = match read_call(ctx, collection, IERC721::ownerOfCall { tokenId: token_id }).await
    {
        Ok(r) => r._0,
        Err(reason) => return Enrichment::EnrichmentFailed(reason),
    };
    let token_uri =
        match read_call(ctx, collection, IERC721::tokenURICall { tokenId: token_id }).await {
            Ok(r) => r._0,
            Err(reason) => return Enrichment::EnrichmentFailed(reason),
        };
    Enrichment::Enriched(NftMetadata { owner, token_uri })
}

/// Load the NFT, or create it blank (enriched when enabled) if it was never seen.
/// The created record is saved before returning.
pub async fn get_or_create_nft(
    ctx: &HandlerContext<'_>,
    collection: Address,
    token_id: U256,
) -> Result<Nft, StoreError> {
    let id = nft_id(ctx.chain_id, &collection, &token_id);
    if let Some(nft) = ctx.store.load::<Nft>(&id).await? {
        return Ok(nft);
    }
    let mut nft = Nft::blank(ctx.chain_id, &collection, &token_id);
    if ctx.settings.enrich_nfts {
        match enrich(ctx, collection, token_id).await {
            Enrichment::Enriched(meta) => {
                nft.owner = addr(&meta.owner);
                nft.token_uri = meta.token_uri;
            }
            Enrichment::EnrichmentFailed(reason) => {
                tracing::warn!(
                    nft = %id,
                    reason = %reason,
                    "NFT enrichment failed, creating with blank fields"
                );
            }
        }
    }
    tracing::info!(nft = %id, "created NFT lazily");
    ctx.store.store(&nft).await?;
    Ok(nft)
}
