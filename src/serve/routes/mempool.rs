use std::collections::HashSet;

use axum::{extract::State, Json};

use crate::chain::{stake, TxTree};
use crate::dcrd::Chain;
use crate::ops;
use crate::rosetta::{
    MempoolResponse, MempoolTransactionRequest, MempoolTransactionResponse, NetworkRequest,
    TransactionIdentifier,
};
use crate::serve::error::ServeError;
use crate::serve::AppState;

pub async fn mempool(
    State(state): State<AppState>,
    Json(req): Json<NetworkRequest>,
) -> Result<Json<MempoolResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;
    state.check_upstream()?;

    let hashes = state.chain.get_raw_mempool().await?;
    Ok(Json(MempoolResponse {
        transaction_identifiers: hashes
            .into_iter()
            .map(|hash| TransactionIdentifier {
                hash: hash.to_string(),
            })
            .collect(),
    }))
}

pub async fn transaction(
    State(state): State<AppState>,
    Json(req): Json<MempoolTransactionRequest>,
) -> Result<Json<MempoolTransactionResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;
    state.check_upstream()?;

    let hash = req
        .transaction_identifier
        .hash
        .parse()
        .map_err(|_| ServeError::malformed("invalid transaction hash"))?;
    let tx = state.chain.get_raw_transaction(&hash).await?;

    let tree = match stake::determine_tx_type(&tx) {
        stake::TxType::Regular => TxTree::Regular,
        _ => TxTree::Stake,
    };

    let mut outpoints = HashSet::new();
    ops::tx_prev_outpoints(&tx, tree, None, &mut outpoints);
    let prev_inputs = state.resolver.resolve(&outpoints).await?;

    let rtx = ops::mempool_tx_to_rosetta(&tx, &prev_inputs, &state.params)?;
    Ok(Json(MempoolTransactionResponse { transaction: rtx }))
}
