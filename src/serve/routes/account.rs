use axum::{extract::State, Json};

use crate::rosetta::{self, AccountBalanceRequest, AccountBalanceResponse, Amount};
use crate::serve::error::ServeError;
use crate::serve::AppState;
use crate::storage::Db;

/// Balance of an account at a height. With no block identifier the current
/// indexed tip is used; historical lookups are answered from the balance
/// records directly.
pub async fn balance(
    State(state): State<AppState>,
    Json(req): Json<AccountBalanceRequest>,
) -> Result<Json<AccountBalanceResponse>, ServeError> {
    state.check_network(&req.network_identifier)?;
    state.check_upstream()?;

    let tip = state.tip()?;

    let height = match req.block_identifier.as_ref().and_then(|b| b.index) {
        Some(index) => {
            let height =
                u64::try_from(index).map_err(|_| ServeError::malformed("negative height"))?;
            if height > tip.height {
                return Err(ServeError::NotFound);
            }
            height
        }
        None => tip.height,
    };

    // When a hash is also named it must match the indexed chain.
    if let Some(want) = req.block_identifier.as_ref().and_then(|b| b.hash.as_ref()) {
        let have = state
            .db
            .block_hash_at(height)
            .map_err(ServeError::from)?
            .ok_or(ServeError::NotFound)?;
        if have.to_string() != *want {
            return Err(ServeError::NotFound);
        }
    }

    let (balance, _) = state
        .db
        .balance(&req.account_identifier.address, height)
        .map_err(ServeError::from)?;

    let hash = state
        .db
        .block_hash_at(height)
        .map_err(ServeError::from)?
        .ok_or(ServeError::NotFound)?;

    Ok(Json(AccountBalanceResponse {
        block_identifier: rosetta::BlockIdentifier {
            index: height as i64,
            hash: hash.to_string(),
        },
        balances: vec![Amount::dcr(balance)],
    }))
}
