//! Factory handlers: root entities for newly deployed contracts, plus datasource instantiation.

use super::nft::get_or_create_nft;
use super::{HandlerContext, Outcome};
use crate::abi::{Event, INft2Factory};
use crate::datasource::{COLLECTION, DATA_REGISTRY, DATA_REGISTRY_V2, DERIVED_ACCOUNT};
use crate::entities::{
    addr, bytes_hex, contract_id, hash, AddonsCollection, Collection, DataRegistry,
    DerivedAccount, Erc6551Account, RegistryVersion,
};
use crate::error::HandlerError;
use crate::store::EntityStoreExt;
use alloy::primitives::Address;

/// Template and address a factory event starts watching, if any.
///
/// Used both by the handlers and by the processor's discovery pass, which registers new
/// sources before the block is dispatched.
pub fn discovered_datasource(event: &Event) -> Option<(&'static str, Address)> {
    match event {
        Event::DataRegistryCreated(ev) => Some((DATA_REGISTRY, ev.registry)),
        Event::DataRegistryV2Created(ev) => Some((DATA_REGISTRY_V2, ev.registry)),
        Event::CollectionCreated(ev) => Some((COLLECTION, ev.collection)),
        Event::DerivedAccountCreated(ev) => Some((DERIVED_ACCOUNT, ev.derivedAccount)),
        _ => None,
    }
}

async fn create_registry(
    ctx: &HandlerContext<'_>,
    dapp: Address,
    registry: Address,
    uri: &str,
    version: RegistryVersion,
) -> Result<Outcome, HandlerError> {
    let id = contract_id(ctx.chain_id, &registry);
    tracing::info!(registry = %addr(&registry), ?version, "data registry created");
    if ctx.store.exists::<DataRegistry>(&id).await? {
        tracing::debug!(registry = %id, "data registry already indexed");
    } else {
        ctx.store
            .store(&DataRegistry {
                id,
                chain_id: ctx.chain_id,
                address: addr(&registry),
                dapp: addr(&dapp),
                uri: uri.to_string(),
                version,
                block_height: ctx.block.number,
                timestamp: ctx.block.timestamp,
            })
            .await?;
    }
    let template = match version {
        RegistryVersion::V1 => DATA_REGISTRY,
        RegistryVersion::V2 => DATA_REGISTRY_V2,
    };
    ctx.datasources
        .instantiate(template, registry, ctx.block.number)
        .await?;
    Ok(Outcome::Applied)
}

pub async fn handle_data_registry_created(
    ctx: &HandlerContext<'_>,
    ev: &INft2Factory::DataRegistryCreated,
) -> Result<Outcome, HandlerError> {
    create_registry(ctx, ev.dapp, ev.registry, &ev.dappURI, RegistryVersion::V1).await
}

pub async fn handle_data_registry_v2_created(
    ctx: &HandlerContext<'_>,
    ev: &INft2Factory::DataRegistryV2Created,
) -> Result<Outcome, HandlerError> {
    create_registry(ctx, ev.dapp, ev.registry, &ev.dappURI, RegistryVersion::V2).await
}

pub async fn handle_collection_created(
    ctx: &HandlerContext<'_>,
    ev: &INft2Factory::CollectionCreated,
) -> Result<Outcome, HandlerError> {
    let id = contract_id(ctx.chain_id, &ev.collection);
    tracing::info!(collection = %addr(&ev.collection), kind = ev.kind, "collection created");
    if ctx.store.exists::<Collection>(&id).await? {
        tracing::debug!(collection = %id, "collection already indexed");
    } else {
        ctx.store
            .store(&Collection {
                id,
                chain_id: ctx.chain_id,
                address: addr(&ev.collection),
                owner: addr(&ev.owner),
                kind: ev.kind,
                block_height: ctx.block.number,
                timestamp: ctx.block.timestamp,
            })
            .await?;
    }
    ctx.datasources
        .instantiate(COLLECTION, ev.collection, ctx.block.number)
        .await?;
    Ok(Outcome::Applied)
}

pub async fn handle_derived_account_created(
    ctx: &HandlerContext<'_>,
    ev: &INft2Factory::DerivedAccountCreated,
) -> Result<Outcome, HandlerError> {
    let id = contract_id(ctx.chain_id, &ev.derivedAccount);
    tracing::info!(account = %addr(&ev.derivedAccount), "derived account created");
    if ctx.store.exists::<DerivedAccount>(&id).await? {
        tracing::debug!(account = %id, "derived account already indexed");
    } else {
        let underlying =
            get_or_create_nft(ctx, ev.underlyingCollection, ev.underlyingTokenId).await?;
        ctx.store
            .store(&DerivedAccount {
                id,
                chain_id: ctx.chain_id,
                address: addr(&ev.derivedAccount),
                underlying_nft_id: underlying.id,
                block_height: ctx.block.number,
                timestamp: ctx.block.timestamp,
            })
            .await?;
    }
    ctx.datasources
        .instantiate(DERIVED_ACCOUNT, ev.derivedAccount, ctx.block.number)
        .await?;
    Ok(Outcome::Applied)
}

pub async fn handle_addons_created(
    ctx: &HandlerContext<'_>,
    ev: &INft2Factory::AddonsCreated,
) -> Result<Outcome, HandlerError> {
    let id = contract_id(ctx.chain_id, &ev.addons);
    tracing::info!(addons = %addr(&ev.addons), collection = %addr(&ev.collection), "addons created");
    if ctx.store.exists::<AddonsCollection>(&id).await? {
        tracing::debug!(addons = %id, "addons already indexed");
        return Ok(Outcome::Applied);
    }
    ctx.store
        .store(&AddonsCollection {
            id,
            chain_id: ctx.chain_id,
            contract: addr(&ev.addons),
            collection: addr(&ev.collection),
            kind: ev.kind,
            campaign_id: hash(&ev.campaignId),
            data: bytes_hex(&ev.data),
            block_height: ctx.block.number,
            timestamp: ctx.block.timestamp,
        })
        .await?;
    Ok(Outcome::Applied)
}

pub async fn handle_erc6551_account_created(
    ctx: &HandlerContext<'_>,
    ev: &INft2Factory::ERC6551AccountCreated,
) -> Result<Outcome, HandlerError> {
    let id = contract_id(ctx.chain_id, &ev.account);
    tracing::info!(account = %addr(&ev.account), "ERC-6551 account created");
    if ctx.store.exists::<Erc6551Account>(&id).await? {
        tracing::debug!(account = %id, "ERC-6551 account already indexed");
        return Ok(Outcome::Applied);
    }
    let underlying = get_or_create_nft(ctx, ev.tokenContract, ev.tokenId).await?;
    ctx.store
        .store(&Erc6551Account {
            id,
            chain_id: ctx.chain_id,
            account: addr(&ev.account),
            implementation: addr(&ev.implementation),
            salt: hash(&ev.salt),
            underlying_nft_id: underlying.id,
            block_height: ctx.block.number,
            timestamp: ctx.block.timestamp,
        })
        .await?;
    Ok(Outcome::Applied)
}
