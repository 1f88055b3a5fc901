use std::collections::HashSet;

use axum::{extract::State, Json};

use crate::chain::TxTree;
use crate::ops::{self, OpStatus};
use crate::rosetta::{
    self, BlockRequest, BlockResponse, BlockTransactionRequest, BlockTransactionResponse,
};
use crate::serve::error::ServeError;
use crate::serve::AppState;

pub async fn block(
    State(state): State<AppState>,
    Json(req): Json<BlockRequest>,
) -> Result<Json<BlockResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;
    state.check_upstream()?;

    let block = state.block_by_partial(Some(&req.block_identifier)).await?;
    let prev = state.parent_if_disapproved(&block).await?;

    let outpoints = ops::block_prev_outpoints(&block, prev.as_ref()).map_err(ServeError::from)?;
    let prev_inputs = state.resolver.resolve(&outpoints).await?;

    let rblock = ops::block_to_rosetta(&block, prev.as_ref(), &prev_inputs, &state.params)?;
    Ok(Json(BlockResponse { block: rblock }))
}

pub async fn transaction(
    State(state): State<AppState>,
    Json(req): Json<BlockTransactionRequest>,
) -> Result<Json<BlockTransactionResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;
    state.check_upstream()?;

    let hash = req
        .block_identifier
        .hash
        .parse()
        .map_err(|_| ServeError::malformed("invalid block hash"))?;
    let block = state.fetch_block(&hash).await?;

    // Locate the transaction in either tree.
    let want = &req.transaction_identifier.hash;
    let located = block
        .transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| (TxTree::Regular, i, tx))
        .chain(
            block
                .stake_transactions
                .iter()
                .enumerate()
                .map(|(i, tx)| (TxTree::Stake, i, tx)),
        )
        .find(|(_, _, tx)| tx.tx_hash().to_string() == *want);

    let (tree, tx_index, tx) = located.ok_or(ServeError::NotFound)?;

    let mut outpoints = HashSet::new();
    ops::tx_prev_outpoints(tx, tree, Some(tx_index), &mut outpoints);
    let prev_inputs = state.resolver.resolve(&outpoints).await?;

    let mut rtx = rosetta::Transaction {
        transaction_identifier: rosetta::TransactionIdentifier { hash: want.clone() },
        operations: Vec::new(),
        metadata: Some(serde_json::json!({
            "version": tx.version,
            "expiry": tx.expiry,
            "locktime": tx.lock_time,
        })),
    };

    ops::tx_ops(
        tx,
        tree,
        Some(tx_index),
        OpStatus::Success,
        &prev_inputs,
        &state.params,
        &mut |op| {
            rtx.operations.push(op.to_rosetta());
            Ok(())
        },
    )?;

    Ok(Json(BlockTransactionResponse { transaction: rtx }))
}
