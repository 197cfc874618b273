//! Data registry handlers (v1 and v2): per-token key/value data, derivation, inscriptions.

use super::collection::record_transfer;
use super::nft::get_or_create_nft;
use super::{EntryMeta, HandlerContext, Outcome};
use crate::abi::{IDataRegistry, IDataRegistryV2, IERC721};
use crate::entities::{
    addr, bytes_hex, contract_id, hash, inscription_id, nft_data_id, DataRegistry,
    DataRegistryNftData, DataRegistryNftInscription,
};
use crate::error::HandlerError;
use crate::store::EntityStoreExt;
use alloy::primitives::{Address, Bytes, B256, U256};

fn data_record(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    collection: &Address,
    token_id: &U256,
    key: &B256,
    value: &Bytes,
) -> DataRegistryNftData {
    DataRegistryNftData {
        id: nft_data_id(ctx.chain_id, &meta.address, collection, token_id, key),
        chain_id: ctx.chain_id,
        data_registry_id: contract_id(ctx.chain_id, &meta.address),
        collection: addr(collection),
        token_id: token_id.to_string(),
        key: hash(key),
        value: bytes_hex(value),
        block_height: ctx.block.number,
        tx_hash: hash(&meta.tx_hash),
    }
}

/// Create or overwrite one `(registry, collection, tokenId, key)` record.
pub async fn handle_write(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    ev: &IDataRegistry::Write,
) -> Result<Outcome, HandlerError> {
    let record = data_record(ctx, meta, &ev.nftCollection, &ev.tokenId, &ev.key, &ev.value);
    tracing::debug!(data = %record.id, "write");
    ctx.store.store(&record).await?;
    Ok(Outcome::Applied)
}

/// Apply one key/value to every token id in `[startId, endId]`, one record each.
pub async fn handle_write_batch(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    ev: &IDataRegistryV2::WriteBatch,
) -> Result<Outcome, HandlerError> {
    let registry = addr(&meta.address);
    if ev.endId < ev.startId {
        tracing::error!(
            %registry,
            start_id = %ev.startId,
            end_id = %ev.endId,
            "WriteBatch range is inverted, skipping"
        );
        return Ok(Outcome::Skipped(format!(
            "inverted range {}..={}",
            ev.startId, ev.endId
        )));
    }
    let span = ev.endId - ev.startId;
    if span > U256::from(ctx.settings.max_write_batch_span) {
        tracing::error!(
            %registry,
            start_id = %ev.startId,
            end_id = %ev.endId,
            cap = ctx.settings.max_write_batch_span,
            "WriteBatch range exceeds cap, skipping"
        );
        return Ok(Outcome::Skipped(format!(
            "range {}..={} exceeds cap {}",
            ev.startId, ev.endId, ctx.settings.max_write_batch_span
        )));
    }

    let mut token_id = ev.startId;
    let mut written = 0u64;
    loop {
        let record = data_record(ctx, meta, &ev.collection, &token_id, &ev.key, &ev.value);
        ctx.store.store(&record).await?;
        written += 1;
        if token_id == ev.endId {
            break;
        }
        token_id += U256::from(1);
    }
    tracing::debug!(%registry, written, "write batch");
    Ok(Outcome::Applied)
}

/// Move each key's value from the source token to the destination token.
///
/// The source record is kept with key and value cleared. A key whose source record is
/// absent is skipped on its own; the other keys still move.
pub async fn handle_compose(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    ev: &IDataRegistry::Compose,
) -> Result<Outcome, HandlerError> {
    let mut moved = 0usize;
    for key in &ev.keys {
        let src_id = nft_data_id(
            ctx.chain_id,
            &meta.address,
            &ev.srcCollection,
            &ev.srcTokenId,
            key,
        );
        let dest_id = nft_data_id(
            ctx.chain_id,
            &meta.address,
            &ev.descCollection,
            &ev.descTokenId,
            key,
        );
        if src_id == dest_id {
            tracing::warn!(data = %src_id, "compose onto itself, skipping key");
            continue;
        }
        let Some(mut src) = ctx.store.load::<DataRegistryNftData>(&src_id).await? else {
            tracing::error!(data = %src_id, "compose source not found");
            continue;
        };
        let mut dest = match ctx.store.load::<DataRegistryNftData>(&dest_id).await? {
            Some(dest) => dest,
            None => {
                tracing::info!(data = %dest_id, "creating compose destination");
                data_record(
                    ctx,
                    meta,
                    &ev.descCollection,
                    &ev.descTokenId,
                    key,
                    &Bytes::new(),
                )
            }
        };
        dest.value = std::mem::take(&mut src.value);
        dest.block_height = ctx.block.number;
        dest.tx_hash = hash(&meta.tx_hash);
        src.key.clear();
        src.block_height = ctx.block.number;
        ctx.store.store(&dest).await?;
        ctx.store.store(&src).await?;
        moved += 1;
    }
    if moved == 0 && !ev.keys.is_empty() {
        return Ok(Outcome::Skipped("no compose key had a source record".into()));
    }
    Ok(Outcome::Applied)
}

/// Link a derived NFT to its underlying NFT, creating either lazily.
pub async fn handle_derive(
    ctx: &HandlerContext<'_>,
    ev: &IDataRegistry::Derive,
) -> Result<Outcome, HandlerError> {
    let underlying =
        get_or_create_nft(ctx, ev.underlyingCollection, ev.underlyingTokenId).await?;
    let mut derived = get_or_create_nft(ctx, ev.derivedCollection, ev.derivedTokenId).await?;
    derived.is_derived = true;
    match derived.underlying_nft_id.as_deref() {
        Some(existing) if existing != underlying.id => {
            tracing::warn!(
                nft = %derived.id,
                existing,
                requested = %underlying.id,
                "derived NFT already linked, keeping first underlying"
            );
        }
        Some(_) => {}
        None => derived.underlying_nft_id = Some(underlying.id),
    }
    ctx.store.store(&derived).await?;
    Ok(Outcome::Applied)
}

pub async fn handle_reclaim(
    ctx: &HandlerContext<'_>,
    ev: &IDataRegistry::Reclaim,
) -> Result<Outcome, HandlerError> {
    get_or_create_nft(ctx, ev.underlyingCollection, ev.underlyingTokenId).await?;
    let mut derived = get_or_create_nft(ctx, ev.derivedCollection, ev.derivedTokenId).await?;
    derived.is_burned = true;
    derived.block_height = ctx.block.number;
    tracing::debug!(nft = %derived.id, "reclaimed");
    ctx.store.store(&derived).await?;
    Ok(Outcome::Applied)
}

/// Transfer of a derived token; the registry itself is the derived collection.
pub async fn handle_derived_transfer(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    ev: &IERC721::Transfer,
) -> Result<Outcome, HandlerError> {
    let mut nft = get_or_create_nft(ctx, meta.address, ev.tokenId).await?;
    nft.owner = addr(&ev.to);
    nft.block_height = ctx.block.number;
    if ev.to == Address::ZERO {
        nft.is_burned = true;
    }
    ctx.store.store(&nft).await?;
    record_transfer(ctx, meta, meta.address, ev).await?;
    Ok(Outcome::Applied)
}

pub async fn handle_uri_updated(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    ev: &IDataRegistry::URIUpdated,
) -> Result<Outcome, HandlerError> {
    let id = contract_id(ctx.chain_id, &meta.address);
    let Some(mut registry) = ctx.store.load::<DataRegistry>(&id).await? else {
        tracing::error!(registry = %id, "data registry not found for URIUpdated");
        return Ok(Outcome::Skipped(format!("data registry {id} not found")));
    };
    registry.uri = ev.uri.clone();
    ctx.store.store(&registry).await?;
    Ok(Outcome::Applied)
}

/// `inscribe(collection, tokenId, metadata)` on a known registry.
pub async fn handle_inscribe_call(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    call: &IDataRegistry::inscribeCall,
) -> Result<Outcome, HandlerError> {
    let registry_id = contract_id(ctx.chain_id, &meta.address);
    if !ctx.store.exists::<DataRegistry>(&registry_id).await? {
        tracing::error!(registry = %registry_id, "data registry not found for inscribe");
        return Ok(Outcome::Skipped(format!(
            "data registry {registry_id} not found"
        )));
    }
    let inscription = DataRegistryNftInscription {
        id: inscription_id(ctx.chain_id, &meta.tx_hash, meta.tx_index),
        chain_id: ctx.chain_id,
        data_registry_id: registry_id,
        collection: addr(&call.collection),
        token_id: call.tokenId.to_string(),
        metadata: bytes_hex(&call.metadata),
        block_height: ctx.block.number,
        tx_hash: hash(&meta.tx_hash),
    };
    tracing::info!(inscription = %inscription.id, "inscription created");
    ctx.store.store(&inscription).await?;
    Ok(Outcome::Applied)
}
