//! Upstream dcrd node access: the RPC surface the service consumes, the
//! suitability probe, the health gate and the previous-input resolver.

use async_trait::async_trait;
use serde::Deserialize;

use crate::chain::{Block, BlockHeader, ChainParams, Hash, Transaction};
use crate::error::Error;

pub mod client;
pub mod health;
pub mod resolver;

/// Lowest dcrd JSON-RPC server version this service understands.
pub const MIN_NODE_VERSION: (u32, u32) = (6, 1);

#[derive(Deserialize, Clone, Debug)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "syncheight", default)]
    pub sync_height: u64,
    #[serde(rename = "initialblockdownload", default)]
    pub initial_block_download: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BestBlock {
    pub hash: Hash,
    pub height: u64,
}

/// The calls consumed from the upstream node. Production uses the JSON-RPC
/// client; tests inject an in-memory chain.
#[async_trait]
pub trait Chain: Send + Sync {
    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error>;

    /// Version of the node's JSON-RPC server as `(major, minor)`.
    async fn version(&self) -> Result<(u32, u32), Error>;

    async fn get_best_block(&self) -> Result<BestBlock, Error>;

    async fn get_block_hash(&self, height: u64) -> Result<Hash, Error>;

    async fn get_block_header(&self, hash: &Hash) -> Result<BlockHeader, Error>;

    async fn get_block(&self, hash: &Hash) -> Result<Block, Error>;

    async fn get_raw_transaction(&self, hash: &Hash) -> Result<Transaction, Error>;

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>, Error>;

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Hash, Error>;
}

/// Probe whether the connected node can back this service: its RPC version
/// must be understood and it must be on the configured network. Returns the
/// node version string used in `/network/options`.
pub async fn check_dcrd(chain: &dyn Chain, params: &ChainParams) -> Result<String, Error> {
    let (major, minor) = chain.version().await?;
    if (major, minor) < MIN_NODE_VERSION {
        return Err(Error::DcrdUnsuitable(format!(
            "node rpc version {major}.{minor} older than required {}.{}",
            MIN_NODE_VERSION.0, MIN_NODE_VERSION.1
        )));
    }

    let info = chain.get_blockchain_info().await?;
    if info.chain != params.name {
        return Err(Error::DcrdUnsuitable(format!(
            "node is on network {} but this service is configured for {}",
            info.chain, params.name
        )));
    }

    Ok(format!("{major}.{minor}"))
}
