use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::chain::{Block, BlockHeader, ChainParams, Hash, Transaction};
use crate::dcrd::health::HealthGate;
use crate::dcrd::{check_dcrd, BestBlock, BlockchainInfo, Chain};
use crate::error::Error;
use crate::index::notifications::{BlockNtfn, NotificationQueue};

#[derive(Deserialize, Debug, Clone)]
pub struct DcrdConfig {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_pass: String,
    /// Seconds between best-block polls.
    pub poll_secs: Option<u64>,
}

const DEFAULT_POLL_SECS: u64 = 5;

/// JSON-RPC client for a dcrd node over HTTP POST.
pub struct DcrdClient {
    http: HttpClient,
    config: DcrdConfig,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl DcrdClient {
    pub fn new(config: DcrdConfig) -> Self {
        DcrdClient {
            http: HttpClient::new(),
            config,
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, Error> {
        debug!(method, "dcrd rpc call");

        let body = json!({
            "jsonrpc": "1.0",
            "id": 0,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.config.rpc_url)
            .basic_auth(&self.config.rpc_user, Some(&self.config.rpc_pass))
            .json(&body)
            .send()
            .await?
            .json::<RpcResponse>()
            .await?;

        if let Some(err) = response.error {
            return Err(Error::Rpc(format!("{method}: {} ({})", err.message, err.code)));
        }

        let result = response
            .result
            .ok_or_else(|| Error::Rpc(format!("{method}: empty result")))?;
        serde_json::from_value(result).map_err(|e| Error::Rpc(format!("{method}: {e}")))
    }

    async fn call_hex(&self, method: &str, params: Vec<Value>) -> Result<Vec<u8>, Error> {
        let hex_str: String = self.call(method, params).await?;
        hex::decode(&hex_str).map_err(|e| Error::Rpc(format!("{method}: bad hex: {e}")))
    }
}

#[async_trait]
impl Chain for DcrdClient {
    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error> {
        self.call("getblockchaininfo", vec![]).await
    }

    async fn version(&self) -> Result<(u32, u32), Error> {
        #[derive(Deserialize)]
        struct VersionEntry {
            major: u32,
            minor: u32,
        }

        let versions: std::collections::HashMap<String, VersionEntry> =
            self.call("version", vec![]).await?;
        let api = versions
            .get("dcrdjsonrpcapi")
            .ok_or_else(|| Error::Rpc("version: missing dcrdjsonrpcapi entry".into()))?;
        Ok((api.major, api.minor))
    }

    async fn get_best_block(&self) -> Result<BestBlock, Error> {
        #[derive(Deserialize)]
        struct Best {
            hash: Hash,
            height: u64,
        }

        let best: Best = self.call("getbestblock", vec![]).await?;
        Ok(BestBlock {
            hash: best.hash,
            height: best.height,
        })
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash, Error> {
        let hash: String = self.call("getblockhash", vec![json!(height)]).await?;
        hash.parse()
    }

    async fn get_block_header(&self, hash: &Hash) -> Result<BlockHeader, Error> {
        let bytes = self
            .call_hex("getblockheader", vec![json!(hash.to_string()), json!(false)])
            .await?;
        BlockHeader::deserialize(&bytes)
    }

    async fn get_block(&self, hash: &Hash) -> Result<Block, Error> {
        let bytes = self
            .call_hex("getblock", vec![json!(hash.to_string()), json!(false)])
            .await?;
        Block::deserialize(&bytes)
    }

    async fn get_raw_transaction(&self, hash: &Hash) -> Result<Transaction, Error> {
        let bytes = self
            .call_hex(
                "getrawtransaction",
                vec![json!(hash.to_string()), json!(0)],
            )
            .await?;
        Transaction::deserialize(&bytes)
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>, Error> {
        let hashes: Vec<String> = self.call("getrawmempool", vec![json!(false)]).await?;
        hashes.into_iter().map(|h| h.parse()).collect()
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Hash, Error> {
        let hex_tx = hex::encode(tx.serialize());
        let hash: String = self
            .call("sendrawtransaction", vec![json!(hex_tx)])
            .await?;
        hash.parse()
    }
}

/// Watch the upstream node and feed the notification queue.
///
/// The node is probed for suitability whenever a connection is
/// (re)established; while unsuitable no block events are produced. New best
/// blocks become connect notifications; the indexer reconciles reorgs from
/// those alone.
pub async fn poll_notifications(
    chain: Arc<dyn Chain>,
    params: ChainParams,
    queue: Arc<NotificationQueue>,
    gate: Arc<HealthGate>,
    poll_secs: Option<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(poll_secs.unwrap_or(DEFAULT_POLL_SECS)));
    let mut connected = false;
    let mut last_best: Option<BestBlock> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("upstream poller shutting down");
                    return;
                }
            }
            _ = ticker.tick() => {}
        }

        let best = match chain.get_best_block().await {
            Ok(best) => best,
            Err(err) => {
                if connected {
                    warn!("lost connection to dcrd: {err}");
                }
                connected = false;
                gate.set_unconnected();
                continue;
            }
        };

        if !connected {
            let outcome = check_dcrd(chain.as_ref(), &params).await;
            gate.set_from_check(&outcome);
            match outcome {
                Ok(version) => {
                    info!(version = %version, "connected to dcrd");
                    connected = true;
                }
                Err(err) => {
                    warn!("connected dcrd node rejected: {err}");
                    continue;
                }
            }
        }

        if last_best.map(|b| b.hash) != Some(best.hash) {
            // A best height below the previous one means blocks were
            // disconnected upstream with no replacement yet; surface the
            // old tip so the indexer unwinds it. The connect that follows
            // reconciles any deeper regression.
            if let Some(old) = last_best {
                if best.height < old.height {
                    match chain.get_block_header(&old.hash).await {
                        Ok(header) => queue.push(BlockNtfn::Disconnected(header)),
                        Err(err) => warn!("unable to fetch disconnected tip header: {err}"),
                    }
                }
            }

            match chain.get_block_header(&best.hash).await {
                Ok(header) => {
                    queue.push(BlockNtfn::Connected(header));
                    last_best = Some(best);
                }
                Err(err) => warn!("unable to fetch best block header: {err}"),
            }
        }
    }
}
