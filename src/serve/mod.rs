//! Rosetta HTTP API.

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::post, Router};
use axum_server::Server;
use serde::Deserialize;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::cache::LruCache;
use crate::chain::{Block, ChainParams, Hash};
use crate::dcrd::health::HealthGate;
use crate::dcrd::resolver::Resolver;
use crate::dcrd::Chain;
use crate::error::Error;
use crate::rosetta;
use crate::serve::error::ServeError;
use crate::storage::{Db, Tip};

pub mod error;
mod routes;

pub static DEFAULT_SERVE_ADDRESS: &str = "0.0.0.0:9128";

/// Per-request deadline; dropped requests cancel their in-flight store and
/// upstream calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub address: Option<String>,
}

pub struct AppInner {
    pub db: Arc<dyn Db>,
    pub chain: Arc<dyn Chain>,
    pub params: ChainParams,
    pub network: rosetta::NetworkIdentifier,
    pub resolver: Resolver,
    pub block_cache: Arc<LruCache<Block>>,
    pub gate: Arc<HealthGate>,
}

#[derive(Clone)]
pub struct AppState(Arc<AppInner>);

impl Deref for AppState {
    type Target = AppInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AppState {
    pub fn new(
        db: Arc<dyn Db>,
        chain: Arc<dyn Chain>,
        params: ChainParams,
        resolver: Resolver,
        block_cache: Arc<LruCache<Block>>,
        gate: Arc<HealthGate>,
    ) -> Self {
        let network = rosetta::NetworkIdentifier {
            blockchain: "decred".into(),
            network: params.name.into(),
        };
        AppState(Arc::new(AppInner {
            db,
            chain,
            params,
            network,
            resolver,
            block_cache,
            gate,
        }))
    }

    /// Every request names a network; anything but ours is rejected.
    pub fn check_network(&self, id: &rosetta::NetworkIdentifier) -> Result<(), ServeError> {
        if *id == self.network {
            Ok(())
        } else {
            Err(ServeError::WrongNetwork)
        }
    }

    /// Short-circuit while the upstream node is gated off.
    pub fn check_upstream(&self) -> Result<(), ServeError> {
        self.gate.check().map_err(ServeError::from)
    }

    pub fn tip(&self) -> Result<Tip, ServeError> {
        self.db
            .processed_tip()
            .map_err(ServeError::from)?
            .ok_or(ServeError::NotFound)
    }

    pub async fn fetch_block(&self, hash: &Hash) -> Result<Block, ServeError> {
        if let Some(block) = self.block_cache.get(hash) {
            return Ok(block);
        }
        let block = self.chain.get_block(hash).await?;
        self.block_cache.insert(*hash, block.clone());
        Ok(block)
    }

    /// Resolve a partial block identifier: by hash, by height, or the
    /// current indexed tip when neither is given.
    pub async fn block_by_partial(
        &self,
        partial: Option<&rosetta::PartialBlockIdentifier>,
    ) -> Result<Block, ServeError> {
        let hash = match partial {
            Some(rosetta::PartialBlockIdentifier {
                hash: Some(hash), ..
            }) => hash
                .parse::<Hash>()
                .map_err(|_| ServeError::malformed("invalid block hash"))?,
            Some(rosetta::PartialBlockIdentifier {
                index: Some(height),
                ..
            }) => {
                let height =
                    u64::try_from(*height).map_err(|_| ServeError::malformed("negative height"))?;
                self.chain.get_block_hash(height).await?
            }
            _ => self.tip()?.hash,
        };

        Ok(self.fetch_block(&hash).await?)
    }

    /// The parent block, fetched only when `block` disapproves it.
    pub async fn parent_if_disapproved(&self, block: &Block) -> Result<Option<Block>, ServeError> {
        if crate::ops::block_approves_parent(block) {
            Ok(None)
        } else {
            Ok(Some(self.fetch_block(&block.header.prev_block).await?))
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/network/list", post(routes::network::list))
        .route("/network/options", post(routes::network::options))
        .route("/network/status", post(routes::network::status))
        .route("/block", post(routes::block::block))
        .route("/block/transaction", post(routes::block::transaction))
        .route("/mempool", post(routes::mempool::mempool))
        .route("/mempool/transaction", post(routes::mempool::transaction))
        .route("/account/balance", post(routes::account::balance))
        .route("/construction/derive", post(routes::construction::derive))
        .route(
            "/construction/preprocess",
            post(routes::construction::preprocess),
        )
        .route(
            "/construction/metadata",
            post(routes::construction::metadata),
        )
        .route(
            "/construction/payloads",
            post(routes::construction::payloads),
        )
        .route("/construction/combine", post(routes::construction::combine))
        .route("/construction/hash", post(routes::construction::hash))
        .route("/construction/submit", post(routes::construction::submit))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

pub async fn run(state: AppState, address: &str) -> Result<(), Error> {
    let app = router(state);

    let addr = address
        .parse::<SocketAddr>()
        .map_err(|e| Error::Config(format!("bad serve address '{address}': {e}")))?;

    info!("rosetta api listening on {addr}...");

    Server::bind(addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::Config(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::params::Network;
    use crate::chain::Transaction;
    use crate::storage::memory::MemDb;
    use crate::testutil::{coinbase_tx, spend_tx, test_block, MockChain, TestAccounts};
    use axum::extract::State;
    use axum::Json;
    use serde_json::json;

    struct TestServer {
        state: AppState,
        chain: Arc<MockChain>,
        db: Arc<MemDb>,
        accts: TestAccounts,
    }

    fn test_server() -> TestServer {
        let params = Network::Regnet.params();
        let accts = TestAccounts::new(&params);
        let db = Arc::new(MemDb::new());
        let chain = Arc::new(MockChain::new(params.name));
        let gate = Arc::new(HealthGate::new());
        gate.set_ok("6.2".into());

        let tx_cache = Arc::new(LruCache::new(64));
        let state = AppState::new(
            db.clone(),
            chain.clone(),
            params,
            Resolver::new(chain.clone(), tx_cache),
            Arc::new(LruCache::new(64)),
            gate,
        );

        TestServer {
            state,
            chain,
            db,
            accts,
        }
    }

    fn network_id(state: &AppState) -> rosetta::NetworkIdentifier {
        state.network.clone()
    }

    /// Index a two-block chain: a genesis coinbase of 100 to account 0 and
    /// a transfer of 60 to account 1 at height 1.
    fn seed_chain(ts: &TestServer) -> (Block, Block) {
        let b0 = test_block(0, Hash::ZERO, vec![coinbase_tx(100, &ts.accts.script(0))], vec![]);
        let (transfer, prev_inputs) = spend_tx(&ts.accts, 0, 1, 60, 100);
        ts.chain.register_prev_inputs(&prev_inputs);
        let b1 = test_block(
            1,
            b0.block_hash(),
            vec![coinbase_tx(5, &ts.accts.script(2)), transfer],
            vec![],
        );
        ts.chain.extend_main(vec![b0.clone(), b1.clone()]);

        ts.db
            .process_block(0, &b0.block_hash(), &[(ts.accts.account(0), 100)].into())
            .unwrap();
        let deltas = [
            (ts.accts.account(0), -100i64),
            (ts.accts.account(1), 60),
            (ts.accts.account(2), 5),
        ]
        .into();
        ts.db.process_block(1, &b1.block_hash(), &deltas).unwrap();

        (b0, b1)
    }

    #[tokio::test]
    async fn wrong_network_rejected() {
        let ts = test_server();
        let req = rosetta::NetworkRequest {
            network_identifier: rosetta::NetworkIdentifier {
                blockchain: "decred".into(),
                network: "mainnet".into(),
            },
            metadata: None,
        };

        let res = routes::network::options(State(ts.state.clone()), Json(req)).await;
        assert!(matches!(res, Err(ServeError::WrongNetwork)));
    }

    #[tokio::test]
    async fn gated_upstream_rejects_serving() {
        let ts = test_server();
        seed_chain(&ts);
        ts.state.gate.set_unconnected();

        let req = rosetta::NetworkRequest {
            network_identifier: network_id(&ts.state),
            metadata: None,
        };
        let res = routes::network::status(State(ts.state.clone()), Json(req)).await;
        assert!(matches!(res, Err(ServeError::Unavailable(_))));
    }

    #[tokio::test]
    async fn network_status_reports_tip_and_genesis() {
        let ts = test_server();
        let (b0, b1) = seed_chain(&ts);

        let req = rosetta::NetworkRequest {
            network_identifier: network_id(&ts.state),
            metadata: None,
        };
        let res = routes::network::status(State(ts.state.clone()), Json(req))
            .await
            .unwrap();

        assert_eq!(res.0.current_block_identifier.index, 1);
        assert_eq!(
            res.0.current_block_identifier.hash,
            b1.block_hash().to_string()
        );
        assert_eq!(
            res.0.genesis_block_identifier.hash,
            b0.block_hash().to_string()
        );
        assert!(res.0.sync_status.unwrap().synced);
    }

    #[tokio::test]
    async fn block_endpoint_projects_operations() {
        let ts = test_server();
        let (_, b1) = seed_chain(&ts);

        let req = rosetta::BlockRequest {
            network_identifier: network_id(&ts.state),
            block_identifier: rosetta::PartialBlockIdentifier {
                index: Some(1),
                hash: None,
            },
        };
        let res = routes::block::block(State(ts.state.clone()), Json(req))
            .await
            .unwrap();

        let block = res.0.block;
        assert_eq!(block.block_identifier.hash, b1.block_hash().to_string());
        assert_eq!(block.transactions.len(), 2);

        // the transfer: one debit, one credit
        let transfer_ops = &block.transactions[1].operations;
        assert_eq!(transfer_ops.len(), 2);
        assert_eq!(transfer_ops[0].op_type, "debit");
        assert_eq!(transfer_ops[0].amount.value, "-100");
        assert_eq!(transfer_ops[1].op_type, "credit");
        assert_eq!(transfer_ops[1].amount.value, "60");
    }

    #[tokio::test]
    async fn block_transaction_endpoint_finds_tx() {
        let ts = test_server();
        let (_, b1) = seed_chain(&ts);
        let tx_hash = b1.transactions[1].tx_hash().to_string();

        let req = rosetta::BlockTransactionRequest {
            network_identifier: network_id(&ts.state),
            block_identifier: rosetta::BlockIdentifier {
                index: 1,
                hash: b1.block_hash().to_string(),
            },
            transaction_identifier: rosetta::TransactionIdentifier {
                hash: tx_hash.clone(),
            },
        };
        let res = routes::block::transaction(State(ts.state.clone()), Json(req))
            .await
            .unwrap();

        assert_eq!(res.0.transaction.transaction_identifier.hash, tx_hash);
        assert_eq!(res.0.transaction.operations.len(), 2);
    }

    #[tokio::test]
    async fn account_balance_historical_lookup() {
        let ts = test_server();
        let (b0, _) = seed_chain(&ts);

        // at height 0 account 0 still holds the full coinbase
        let req = rosetta::AccountBalanceRequest {
            network_identifier: network_id(&ts.state),
            account_identifier: rosetta::AccountIdentifier::new(ts.accts.account(0)),
            block_identifier: Some(rosetta::PartialBlockIdentifier {
                index: Some(0),
                hash: None,
            }),
        };
        let res = routes::account::balance(State(ts.state.clone()), Json(req))
            .await
            .unwrap();
        assert_eq!(res.0.balances[0].value, "100");
        assert_eq!(res.0.block_identifier.hash, b0.block_hash().to_string());

        // at the tip it is spent
        let req = rosetta::AccountBalanceRequest {
            network_identifier: network_id(&ts.state),
            account_identifier: rosetta::AccountIdentifier::new(ts.accts.account(0)),
            block_identifier: None,
        };
        let res = routes::account::balance(State(ts.state.clone()), Json(req))
            .await
            .unwrap();
        assert_eq!(res.0.balances[0].value, "0");
        assert_eq!(res.0.block_identifier.index, 1);
    }

    #[tokio::test]
    async fn mempool_transaction_projection() {
        let ts = test_server();
        seed_chain(&ts);

        let (tx, prev_inputs) = spend_tx(&ts.accts, 1, 2, 40, 60);
        ts.chain.register_prev_inputs(&prev_inputs);
        ts.chain.register_tx(tx.clone());
        ts.chain.set_mempool(vec![tx.tx_hash()]);

        let req = rosetta::NetworkRequest {
            network_identifier: network_id(&ts.state),
            metadata: None,
        };
        let res = routes::mempool::mempool(State(ts.state.clone()), Json(req))
            .await
            .unwrap();
        assert_eq!(res.0.transaction_identifiers.len(), 1);

        let req = rosetta::MempoolTransactionRequest {
            network_identifier: network_id(&ts.state),
            transaction_identifier: rosetta::TransactionIdentifier {
                hash: tx.tx_hash().to_string(),
            },
        };
        let res = routes::mempool::transaction(State(ts.state.clone()), Json(req))
            .await
            .unwrap();
        assert_eq!(res.0.transaction.operations.len(), 2);
        assert_eq!(res.0.transaction.operations[0].op_type, "debit");
    }

    #[tokio::test]
    async fn construction_flow_payloads_combine_hash_submit() {
        let ts = test_server();
        let pkh = ts.accts.address(0);

        let prev_hash = crate::chain::digest(b"coin");
        let ops = vec![
            rosetta::Operation {
                operation_identifier: rosetta::OperationIdentifier { index: 0 },
                op_type: "debit".into(),
                status: None,
                account: rosetta::AccountIdentifier {
                    address: pkh.encode(),
                    metadata: Some(json!({ "script_version": 0 })),
                },
                amount: rosetta::Amount::dcr(100),
                coin_change: Some(rosetta::CoinChange {
                    coin_identifier: rosetta::CoinIdentifier {
                        identifier: format!("{prev_hash}:0"),
                    },
                    coin_action: rosetta::CoinAction::Spent,
                }),
                metadata: Some(json!({ "prev_tree": 0, "sequence": 0 })),
            },
            rosetta::Operation {
                operation_identifier: rosetta::OperationIdentifier { index: 1 },
                op_type: "credit".into(),
                status: None,
                account: rosetta::AccountIdentifier::new(ts.accts.account(1)),
                amount: rosetta::Amount::dcr(95),
                coin_change: None,
                metadata: None,
            },
        ];

        let req = rosetta::ConstructionPayloadsRequest {
            network_identifier: network_id(&ts.state),
            operations: ops,
            metadata: Some(json!({ "version": 1, "expiry": 0, "locktime": 0 })),
        };
        let payloads = routes::construction::payloads(State(ts.state.clone()), Json(req))
            .await
            .unwrap();
        assert_eq!(payloads.0.payloads.len(), 1);
        assert_eq!(payloads.0.payloads[0].account_identifier.address, pkh.encode());

        let req = rosetta::ConstructionCombineRequest {
            network_identifier: network_id(&ts.state),
            unsigned_transaction: payloads.0.unsigned_transaction.clone(),
            signatures: vec![rosetta::Signature {
                public_key: rosetta::PublicKey {
                    hex_bytes: hex::encode([0x02u8; 33]),
                    curve_type: rosetta::CurveType::Secp256k1,
                },
                signature_type: rosetta::SignatureType::Ecdsa,
                hex_bytes: hex::encode([0xabu8; 64]),
            }],
        };
        let combined = routes::construction::combine(State(ts.state.clone()), Json(req))
            .await
            .unwrap();

        // signing must not change the transaction hash
        let req = rosetta::ConstructionHashRequest {
            network_identifier: network_id(&ts.state),
            signed_transaction: combined.0.signed_transaction.clone(),
        };
        let hashed = routes::construction::hash(State(ts.state.clone()), Json(req))
            .await
            .unwrap();
        let unsigned_tx =
            Transaction::deserialize(&hex::decode(&payloads.0.unsigned_transaction).unwrap())
                .unwrap();
        assert_eq!(
            hashed.0.transaction_identifier.hash,
            unsigned_tx.tx_hash().to_string()
        );

        let req = rosetta::ConstructionSubmitRequest {
            network_identifier: network_id(&ts.state),
            signed_transaction: combined.0.signed_transaction.clone(),
        };
        let submitted = routes::construction::submit(State(ts.state.clone()), Json(req))
            .await
            .unwrap();
        assert_eq!(
            submitted.0.transaction_identifier.hash,
            hashed.0.transaction_identifier.hash
        );
        assert_eq!(ts.chain.submitted().len(), 1);
    }

    #[tokio::test]
    async fn construction_derive_builds_p2pkh_account() {
        let ts = test_server();
        let pubkey = [0x03u8; 33];

        let req = rosetta::ConstructionDeriveRequest {
            network_identifier: network_id(&ts.state),
            public_key: rosetta::PublicKey {
                hex_bytes: hex::encode(pubkey),
                curve_type: rosetta::CurveType::Secp256k1,
            },
        };
        let res = routes::construction::derive(State(ts.state.clone()), Json(req))
            .await
            .unwrap();

        let want = crate::chain::address::Address::pubkey_hash(
            crate::chain::address::hash160(&pubkey),
            &ts.state.params,
        );
        assert_eq!(res.0.account_identifier.address, want.encode());
    }
}
