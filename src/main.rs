use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::cache::LruCache;
use crate::chain::params::Network;
use crate::dcrd::client::{poll_notifications, DcrdClient, DcrdConfig};
use crate::dcrd::health::HealthGate;
use crate::dcrd::resolver::Resolver;
use crate::dcrd::Chain;
use crate::index::notifications::NotificationQueue;
use crate::index::Indexer;
use crate::serve::{AppState, ServerConfig, DEFAULT_SERVE_ADDRESS};
use crate::storage::{open_db, DbType};

mod cache;
mod chain;
mod dcrd;
mod error;
mod index;
mod ops;
mod rosetta;
mod serve;
mod shutdown;
mod storage;
#[cfg(test)]
mod testutil;

const DEFAULT_CACHE_BLOCKS: usize = 128;
const DEFAULT_CACHE_RAW_TXS: usize = 1024;

#[derive(Debug, Parser)]
#[clap(name = "dcr-rosetta")]
#[clap(bin_name = "dcr-rosetta")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    config: Option<std::path::PathBuf>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub network: Option<Network>,
    pub db_type: Option<DbType>,
    pub db_path: Option<String>,
    pub dcrd: DcrdConfig,
    pub server: Option<ServerConfig>,
    pub cache_blocks: Option<usize>,
    pub cache_raw_txs: Option<usize>,
    /// Parallel block fetches during catch-up.
    pub concurrency: Option<usize>,
}

impl Config {
    pub fn new(config_path: &Option<std::path::PathBuf>) -> Result<Self, config::ConfigError> {
        let mut s = config::Config::builder();

        s = s.add_source(config::File::with_name("dcr-rosetta.toml").required(false));

        if let Some(explicit) = config_path.as_ref().and_then(|x| x.to_str()) {
            s = s.add_source(config::File::with_name(explicit).required(true));
        }

        s = s.add_source(config::Environment::with_prefix("DCRROS").separator("_"));

        s.build()?.try_deserialize()
    }
}

#[tokio::main]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt::init();

    let args = Cli::parse();
    let config = Config::new(&args.config).unwrap();

    let network = config.network.unwrap_or(Network::Mainnet);
    let params = network.params();

    let db_type = config.db_type.unwrap_or(DbType::Disk);
    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(|| "./tmp/dcr-rosetta".into());

    info!(network = params.name, ?db_type, db_path, "starting dcr-rosetta");

    let db = open_db(db_type, Path::new(&db_path)).unwrap();

    let chain: Arc<dyn Chain> = Arc::new(DcrdClient::new(config.dcrd.clone()));
    let tx_cache = Arc::new(LruCache::new(
        config.cache_raw_txs.unwrap_or(DEFAULT_CACHE_RAW_TXS),
    ));
    let block_cache = Arc::new(LruCache::new(
        config.cache_blocks.unwrap_or(DEFAULT_CACHE_BLOCKS),
    ));
    let gate = Arc::new(HealthGate::new());
    let (queue, wake) = NotificationQueue::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let concurrency = config.concurrency.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    tokio::spawn(poll_notifications(
        chain.clone(),
        params.clone(),
        queue.clone(),
        gate.clone(),
        config.dcrd.poll_secs,
        shutdown_rx.clone(),
    ));

    let indexer = Arc::new(Indexer::new(
        db.clone(),
        chain.clone(),
        Resolver::new(chain.clone(), tx_cache.clone()),
        params.clone(),
        block_cache.clone(),
        queue.clone(),
        gate.clone(),
        concurrency,
    ));

    let indexer_shutdown = shutdown_rx.clone();
    let mut indexer_handle =
        tokio::spawn(async move { indexer.run(wake, indexer_shutdown).await });

    let state = AppState::new(
        db,
        chain.clone(),
        params,
        Resolver::new(chain, tx_cache),
        block_cache,
        gate,
    );

    let serve_address = config
        .server
        .as_ref()
        .and_then(|s| s.address.clone())
        .unwrap_or_else(|| DEFAULT_SERVE_ADDRESS.to_string());

    tokio::select! {
        _ = shutdown::wait_for_signal() => {}
        served = serve::run(state, &serve_address) => {
            error!("serve stage ended: {served:?}");
        }
        joined = &mut indexer_handle => {
            error!("indexer ended: {joined:?}");
        }
    }

    // Let the indexer finish its in-flight block and exit cleanly.
    let _ = shutdown_tx.send(true);
    if !indexer_handle.is_finished() {
        match indexer_handle.await {
            Ok(Ok(())) => info!("indexer stopped"),
            Ok(Err(err)) => error!("indexer failed during shutdown: {err}"),
            Err(err) => error!("indexer task panicked: {err}"),
        }
    }

    Ok(())
}
