use axum::{extract::State, Json};
use serde_json::json;

use crate::chain::address::{hash160, Address};
use crate::chain::Transaction;
use crate::dcrd::Chain;
use crate::ops::construction as txbuild;
use crate::rosetta::{
    self, ConstructionCombineRequest, ConstructionCombineResponse, ConstructionDeriveRequest,
    ConstructionDeriveResponse, ConstructionHashRequest, ConstructionMetadataRequest,
    ConstructionMetadataResponse, ConstructionPayloadsRequest, ConstructionPayloadsResponse,
    ConstructionPreprocessRequest, ConstructionPreprocessResponse, ConstructionSubmitRequest,
    TransactionIdentifierResponse,
};
use crate::serve::error::ServeError;
use crate::serve::AppState;

fn decode_tx(hex_tx: &str) -> Result<Transaction, ServeError> {
    let bytes = hex::decode(hex_tx).map_err(|_| ServeError::malformed("invalid transaction hex"))?;
    Transaction::deserialize(&bytes).map_err(ServeError::from)
}

/// Derive the p2pkh address of a compressed secp256k1 public key.
pub async fn derive(
    State(state): State<AppState>,
    Json(req): Json<ConstructionDeriveRequest>,
) -> Result<Json<ConstructionDeriveResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;

    if req.public_key.curve_type != rosetta::CurveType::Secp256k1 {
        return Err(ServeError::UnsupportedCurveType);
    }

    let pubkey = hex::decode(&req.public_key.hex_bytes)
        .map_err(|_| ServeError::malformed("invalid public key hex"))?;
    if pubkey.len() != 33 {
        return Err(ServeError::malformed("public key must be 33 compressed bytes"));
    }

    let addr = Address::pubkey_hash(hash160(&pubkey), &state.params);
    Ok(Json(ConstructionDeriveResponse {
        account_identifier: rosetta::AccountIdentifier::new(addr.encode()),
    }))
}

pub async fn preprocess(
    State(state): State<AppState>,
    Json(req): Json<ConstructionPreprocessRequest>,
) -> Result<Json<ConstructionPreprocessResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;
    Ok(Json(ConstructionPreprocessResponse { options: json!({}) }))
}

pub async fn metadata(
    State(state): State<AppState>,
    Json(req): Json<ConstructionMetadataRequest>,
) -> Result<Json<ConstructionMetadataResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;
    state.check_upstream()?;
    Ok(Json(ConstructionMetadataResponse { metadata: json!({}) }))
}

pub async fn payloads(
    State(state): State<AppState>,
    Json(req): Json<ConstructionPayloadsRequest>,
) -> Result<Json<ConstructionPayloadsResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;

    let tx_meta = req.metadata.unwrap_or_else(|| json!({}));
    let tx = txbuild::rosetta_ops_to_tx(&tx_meta, &req.operations, &state.params)?;
    let payloads = txbuild::extract_sign_payloads(&req.operations, &tx, &state.params)?;

    Ok(Json(ConstructionPayloadsResponse {
        unsigned_transaction: hex::encode(tx.serialize()),
        payloads,
    }))
}

pub async fn combine(
    State(state): State<AppState>,
    Json(req): Json<ConstructionCombineRequest>,
) -> Result<Json<ConstructionCombineResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;

    let mut tx = decode_tx(&req.unsigned_transaction)?;
    txbuild::combine_tx_sigs(&req.signatures, &mut tx)?;

    Ok(Json(ConstructionCombineResponse {
        signed_transaction: hex::encode(tx.serialize()),
    }))
}

pub async fn hash(
    State(state): State<AppState>,
    Json(req): Json<ConstructionHashRequest>,
) -> Result<Json<TransactionIdentifierResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;

    let tx = decode_tx(&req.signed_transaction)?;
    Ok(Json(TransactionIdentifierResponse {
        transaction_identifier: rosetta::TransactionIdentifier {
            hash: tx.tx_hash().to_string(),
        },
    }))
}

pub async fn submit(
    State(state): State<AppState>,
    Json(req): Json<ConstructionSubmitRequest>,
) -> Result<Json<TransactionIdentifierResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;
    state.check_upstream()?;

    let tx = decode_tx(&req.signed_transaction)?;
    let hash = state.chain.send_raw_transaction(&tx).await?;

    Ok(Json(TransactionIdentifierResponse {
        transaction_identifier: rosetta::TransactionIdentifier {
            hash: hash.to_string(),
        },
    }))
}
