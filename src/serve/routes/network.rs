use axum::{extract::State, Json};

use crate::dcrd::Chain;
use crate::ops;
use crate::rosetta::{
    self, Allow, MetadataRequest, NetworkListResponse, NetworkOptionsResponse, NetworkRequest,
    NetworkStatusResponse, SyncStatus, Version, ROSETTA_VERSION,
};
use crate::serve::error::{all_errors, ServeError};
use crate::serve::AppState;

pub async fn list(
    State(state): State<AppState>,
    Json(_req): Json<MetadataRequest>,
) -> Result<Json<NetworkListResponse>, ServeError> {
    Ok(Json(NetworkListResponse {
        network_identifiers: vec![state.network.clone()],
    }))
}

pub async fn options(
    State(state): State<AppState>,
    Json(req): Json<NetworkRequest>,
) -> Result<Json<NetworkOptionsResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;

    Ok(Json(NetworkOptionsResponse {
        version: Version {
            rosetta_version: ROSETTA_VERSION.into(),
            node_version: state.gate.node_version(),
            middleware_version: env!("CARGO_PKG_VERSION").into(),
        },
        allow: Allow {
            operation_statuses: ops::all_op_statuses(),
            operation_types: ops::all_op_types(),
            errors: all_errors(),
            historical_balance_lookup: true,
        },
    }))
}

pub async fn status(
    State(state): State<AppState>,
    Json(req): Json<NetworkRequest>,
) -> Result<Json<NetworkStatusResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;
    state.check_upstream()?;

    let tip = state.tip()?;
    let tip_block = state.fetch_block(&tip.hash).await?;

    let genesis_hash = state.chain.get_block_hash(0).await?;
    let best = state.chain.get_best_block().await?;

    Ok(Json(NetworkStatusResponse {
        current_block_identifier: rosetta::BlockIdentifier {
            index: tip.height as i64,
            hash: tip.hash.to_string(),
        },
        current_block_timestamp: tip_block.header.timestamp as i64 * 1000,
        genesis_block_identifier: rosetta::BlockIdentifier {
            index: 0,
            hash: genesis_hash.to_string(),
        },
        sync_status: Some(SyncStatus {
            current_index: tip.height as i64,
            target_index: best.height as i64,
            synced: tip.height >= best.height,
        }),
        peers: Vec::new(),
    }))
}
