//! Derived-account handler: royalty claims paid out of an account bound to an underlying NFT.

use super::{EntryMeta, HandlerContext, Outcome};
use crate::abi::IDerivedAccount;
use crate::entities::{
    addr, contract_id, hash, royalty_claimed_id, DerivedAccount, DerivedAccountRoyaltyClaimed,
};
use crate::error::HandlerError;
use crate::store::EntityStoreExt;

/// Record a royalty claim once per `(txHash, logIndex)`. The account must already be indexed.
pub async fn handle_royalty_claimed(
    ctx: &HandlerContext<'_>,
    meta: &EntryMeta,
    ev: &IDerivedAccount::RoyaltyClaimed,
) -> Result<Outcome, HandlerError> {
    let account_id = contract_id(ctx.chain_id, &meta.address);
    if !ctx.store.exists::<DerivedAccount>(&account_id).await? {
        tracing::error!(account = %account_id, "derived account not found for royalty claim");
        return Ok(Outcome::Skipped(format!(
            "derived account {account_id} not found"
        )));
    }
    let id = royalty_claimed_id(ctx.chain_id, &meta.tx_hash, meta.log_index_or_zero());
    if ctx.store.exists::<DerivedAccountRoyaltyClaimed>(&id).await? {
        tracing::debug!(claim = %id, "royalty claim already recorded");
        return Ok(Outcome::Applied);
    }
    ctx.store
        .store(&DerivedAccountRoyaltyClaimed {
            id,
            chain_id: ctx.chain_id,
            derived_account_id: account_id,
            token: addr(&ev.requestToken),
            amount: ev.amount.to_string(),
            receiver: addr(&ev.receiver),
            tx_hash: hash(&meta.tx_hash),
            block_height: ctx.block.number,
        })
        .await?;
    Ok(Outcome::Applied)
}
