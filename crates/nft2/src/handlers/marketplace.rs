//! Marketplace handlers. Every event is a pure append keyed by its natural id.

use super::{EntryMeta, HandlerContext, Outcome};
use crate::abi::INft2Marketplace;
use crate::entities::{
    addr, cancel_all_id, cancel_multiple_id, hash, order_id, royalty_payment_id,
    CancelAllOrders, CancelMultipleOrders, OrderFill, RoyaltyPayment, TakerAsk, TakerBid,
};
use crate::error::HandlerError;
use crate::store::EntityStoreExt;
use alloy::primitives::{Address, B256, U256};

#[allow(clippy::too_many_arguments)]
fn order_fill(
    ctx: &HandlerContext<'_>,
    order_hash: &B256,
    order_nonce: &U256,
    taker: &Address,
    maker: &Address,
    strategy: &Address,
    currency: &Address,
    collection: &Address,
    token_id: &U256,
    amount: &U256,
    price: &U256,
) -> OrderFill {
    OrderFill {
        id: order_id(ctx.chain_id, order_hash, order_nonce),
        chain_id: ctx.chain_id,
        taker: addr(taker),
        maker: addr(maker),
        strategy: addr(strategy),
        order_hash: hash(order_hash),
        order_nonce: order_nonce.to_string(),
        currency: addr(currency),
        collection: addr(collection),
        token_id: token_id.to_string(),
        amount: amount.to_string(),
        price: price.to_string(),
        block_height: ctx.block.number,
        timestamp: ctx.block.timestamp,
    }
}

pub async fn handle_taker_bid(
    ctx: &HandlerContext<'_>,
    ev: &INft2Marketplace::TakerBid,
) -> Result<Outcome, HandlerError> {
    let fill = order_fill(
        ctx,
        &ev.orderHash,
        &ev.orderNonce,
        &ev.taker,
        &ev.maker,
        &ev.strategy,
        &ev.currency,
        &ev.collection,
        &ev.tokenId,
        &ev.amount,
        &ev.price,
    );
    tracing::info!(order = %fill.id, "taker bid");
    ctx.store.store(&TakerBid(fill)).await?;
    Ok(Outcome::Applied)
}

pub async fn handle_taker_ask(
    ctx: &HandlerContext<'_>,
    ev: &INft2Marketplace::TakerAsk,
) -> Result<Outcome, HandlerError> {
    let fill = order_fill(
        ctx,
        &ev.orderHash,
        &ev.orderNonce,
        &ev.taker,
        &ev.maker,
        &ev.strategy,
        &ev.currency,
        &ev.collection,
        &ev.tokenId,
        &ev.amount,
        &ev.price,
    );
    tracing::info!(order = %fill.id, "taker ask");
    ctx.store.store(&TakerAsk(fill)).await?;
    Ok(Outcome::Applied)
}

pub async fn handle_cancel_all_orders(
    ctx: &HandlerContext<'_>,
    ev: &INft2Marketplace::CancelAllOrders,
) -> Result<Outcome, HandlerError> {
    ctx.store
        .store(&CancelAllOrders {
            id: cancel_all_id(ctx.chain_id, &ev.user, &ev.newMinNonce),
            chain_id: ctx.chain_id,
            user: addr(&ev.user),
            new_min_nonce: ev.newMinNonce.to_string(),
            block_height: ctx.block.number,
            timestamp: ctx.block.timestamp,
        })
        .await?;
    Ok(Outcome::Applied)
}

/// One record per cancellation batch holding every cancelled nonce.
pub async fn handle_cancel_multiple_orders(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    ev: &INft2Marketplace::CancelMultipleOrders,
) -> Result<Outcome, HandlerError> {
    ctx.store
        .store(&CancelMultipleOrders {
            id: cancel_multiple_id(ctx.chain_id, &ev.user, &meta.tx_hash),
            chain_id: ctx.chain_id,
            user: addr(&ev.user),
            order_nonces: ev.orderNonces.iter().map(U256::to_string).collect(),
            block_height: ctx.block.number,
            timestamp: ctx.block.timestamp,
        })
        .await?;
    Ok(Outcome::Applied)
}

pub async fn handle_royalty_payment(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    ev: &INft2Marketplace::RoyaltyPayment,
) -> Result<Outcome, HandlerError> {
    ctx.store
        .store(&RoyaltyPayment {
            id: royalty_payment_id(
                ctx.chain_id,
                &ev.collection,
                &ev.tokenId,
                &meta.tx_hash,
                meta.log_index_or_zero(),
            ),
            chain_id: ctx.chain_id,
            collection: addr(&ev.collection),
            token_id: ev.tokenId.to_string(),
            royalty_recipient: addr(&ev.royaltyRecipient),
            currency: addr(&ev.currency),
            amount: ev.amount.to_string(),
            block_height: ctx.block.number,
            timestamp: ctx.block.timestamp,
        })
        .await?;
    Ok(Outcome::Applied)
}
