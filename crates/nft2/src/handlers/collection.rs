//! ERC-721 collection handler: ownership tracking and transfer history.

use super::nft::get_or_create_nft;
use super::{EntryMeta, HandlerContext, Outcome};
use crate::abi::IERC721;
use crate::entities::{addr, hash, nft_id, transfer_id, Nft, Transfer};
use crate::error::HandlerError;
use crate::store::EntityStoreExt;
use alloy::primitives::Address;

pub(crate) async fn record_transfer(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    collection: Address,
    ev: &IERC721::Transfer,
) -> Result<(), HandlerError> {
    let log_index = meta.log_index_or_zero();
    ctx.store
        .store(&Transfer {
            id: transfer_id(ctx.chain_id, &meta.tx_hash, log_index),
            chain_id: ctx.chain_id,
            collection: addr(&collection),
            token_id: ev.tokenId.to_string(),
            from: addr(&ev.from),
            to: addr(&ev.to),
            block_height: ctx.block.number,
            timestamp: ctx.block.timestamp,
            tx_hash: hash(&meta.tx_hash),
            log_index,
        })
        .await?;
    Ok(())
}

/// Mint, burn or move a token of the collection at `meta.address`.
///
/// A mint never triggers enrichment: the owner is known from the event. `block_height` and
/// `timestamp` record the mint. A burn keeps the last owner and only flips `is_burned`.
pub async fn handle_transfer(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    ev: &IERC721::Transfer,
) -> Result<Outcome, HandlerError> {
    let collection = meta.address;
    let id = nft_id(ctx.chain_id, &collection, &ev.tokenId);

    if ev.from == Address::ZERO {
        let mut nft = ctx
            .store
            .load::<Nft>(&id)
            .await?
            .unwrap_or_else(|| Nft::blank(ctx.chain_id, &collection, &ev.tokenId));
        nft.owner = addr(&ev.to);
        nft.block_height = ctx.block.number;
        nft.timestamp = ctx.block.timestamp;
        tracing::debug!(nft = %id, owner = %nft.owner, "mint");
        ctx.store.store(&nft).await?;
    } else if ev.to == Address::ZERO {
        let mut nft = get_or_create_nft(ctx, collection, ev.tokenId).await?;
        nft.is_burned = true;
        tracing::debug!(nft = %id, "burn");
        ctx.store.store(&nft).await?;
    } else {
        let mut nft = get_or_create_nft(ctx, collection, ev.tokenId).await?;
        nft.owner = addr(&ev.to);
        ctx.store.store(&nft).await?;
    }

    record_transfer(ctx, meta, collection, ev).await?;
    Ok(Outcome::Applied)
}
