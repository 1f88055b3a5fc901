//! Live account indexer.
//!
//! Single writer to the index store. Consumes block notifications, catches
//! up from the persisted tip on startup, and reconciles reorgs by rolling
//! back to the common ancestor before applying the new chain. Every block
//! commit is atomic in the store, including the reversal deltas of a
//! disapproved parent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::cache::LruCache;
use crate::chain::{Block, BlockHeader, ChainParams, Hash};
use crate::dcrd::health::HealthGate;
use crate::dcrd::resolver::Resolver;
use crate::dcrd::Chain;
use crate::error::Error;
use crate::ops::{block_approves_parent, block_deltas};
use crate::storage::Db;

pub mod notifications;

use notifications::{BlockNtfn, NotificationQueue};

const MAX_RPC_ATTEMPTS: u32 = 5;
const CATCHUP_LOG_INTERVAL: Duration = Duration::from_secs(10);

fn backoff(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.min(5);
    Duration::from_secs(secs.min(30))
}

pub struct Indexer {
    db: Arc<dyn Db>,
    chain: Arc<dyn Chain>,
    resolver: Resolver,
    params: ChainParams,
    block_cache: Arc<LruCache<Block>>,
    queue: Arc<NotificationQueue>,
    gate: Arc<HealthGate>,
    concurrency: usize,
    /// One-slot parent cache so the disapproval path does not re-fetch the
    /// block just processed. Purged on rollback.
    prev_block: Mutex<Option<Block>>,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<dyn Db>,
        chain: Arc<dyn Chain>,
        resolver: Resolver,
        params: ChainParams,
        block_cache: Arc<LruCache<Block>>,
        queue: Arc<NotificationQueue>,
        gate: Arc<HealthGate>,
        concurrency: usize,
    ) -> Self {
        Indexer {
            db,
            chain,
            resolver,
            params,
            block_cache,
            queue,
            gate,
            concurrency: concurrency.max(1),
            prev_block: Mutex::new(None),
        }
    }

    /// Drive the indexer until shutdown. Cancellation is a clean exit at
    /// the current block boundary.
    pub async fn run(
        &self,
        wake: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Error> {
        match self.run_inner(wake, &mut shutdown).await {
            Err(Error::Cancelled) => Ok(()),
            other => other,
        }
    }

    async fn run_inner(
        &self,
        mut wake: mpsc::Receiver<()>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), Error> {
        self.wait_for_upstream(shutdown).await?;
        self.catch_up(shutdown).await?;

        info!("waiting for block notifications");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
                received = wake.recv() => {
                    if received.is_none() {
                        return Ok(());
                    }
                    for ntfn in self.queue.drain() {
                        if let Err(err) = self.gate.check() {
                            debug!("dropping notification while upstream gated: {err}");
                            continue;
                        }
                        match ntfn {
                            BlockNtfn::Connected(header) => {
                                self.handle_block_connected(&header, shutdown).await?
                            }
                            BlockNtfn::Disconnected(header) => {
                                self.handle_block_disconnected(&header, shutdown).await?
                            }
                        }
                    }
                }
            }
        }
    }

    async fn wait_for_upstream(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), Error> {
        while !self.gate.is_ok() {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Err(Error::Cancelled);
                    }
                }
                _ = sleep(Duration::from_millis(500)) => {}
            }
        }
        Ok(())
    }

    /// Process blocks from the persisted tip to the upstream tip. Fetching
    /// is parallelized up to the configured concurrency; commits stay
    /// single-threaded in height order.
    pub async fn catch_up(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), Error> {
        let best = self.best_block_retry(shutdown).await?;
        let next = match self.db.processed_tip()? {
            Some(tip) => tip.height + 1,
            None => 0,
        };

        if next > best.height {
            return Ok(());
        }

        info!(
            from = next,
            to = best.height,
            "catching up with upstream chain"
        );

        let mut blocks = futures::stream::iter((next..=best.height).map(|height| {
            let chain = self.chain.clone();
            async move { fetch_block_at_height(chain, height).await }
        }))
        .buffered(self.concurrency);

        let mut last_log = Instant::now();

        while let Some(block) = blocks.next().await {
            if *shutdown.borrow() {
                return Err(Error::Cancelled);
            }

            let block = block?;
            let height = block.header.height;
            self.process_block(&block, shutdown).await?;

            if last_log.elapsed() >= CATCHUP_LOG_INTERVAL {
                info!(height, target = best.height, "catch-up progress");
                last_log = Instant::now();
            }
        }

        info!(height = best.height, "caught up with upstream chain");
        Ok(())
    }

    pub async fn handle_block_connected(
        &self,
        header: &BlockHeader,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), Error> {
        let hash = header.block_hash();

        let tip = match self.db.processed_tip()? {
            Some(tip) => tip,
            None => {
                // Nothing indexed yet; only the genesis block can connect.
                let block = self.fetch_block(&hash, shutdown).await?;
                return self.process_block(&block, shutdown).await;
            }
        };

        if hash == tip.hash {
            return Ok(());
        }

        if header.prev_block == tip.hash && header.height as u64 == tip.height + 1 {
            let block = self.fetch_block(&hash, shutdown).await?;
            return self.process_block(&block, shutdown).await;
        }

        // Anything else reconciles through the ancestor search, including a
        // best chain that regressed to an already-indexed ancestor: the
        // search matches it immediately and the dangling blocks above it
        // are rolled back with nothing to apply forward.
        self.reorg_to(header, shutdown).await
    }

    /// A disconnect only acts when it names the current tip; anything else
    /// is reconciled by a later connect.
    pub async fn handle_block_disconnected(
        &self,
        header: &BlockHeader,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), Error> {
        let hash = header.block_hash();
        match self.db.processed_tip()? {
            Some(tip) if tip.hash == hash => {
                info!(height = tip.height, %hash, "rolling back disconnected tip");
                self.rollback_tip(shutdown).await
            }
            _ => {
                debug!(%hash, "ignoring disconnect of non-tip block");
                Ok(())
            }
        }
    }

    /// Walk the new chain back to the common ancestor with the indexed
    /// chain, unwind to it one block at a time, then apply the new blocks
    /// forward. Ancestor search uses upstream headers, never the caches.
    async fn reorg_to(
        &self,
        header: &BlockHeader,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), Error> {
        let tip = self
            .db
            .processed_tip()?
            .ok_or_else(|| Error::custom("reorg with empty store"))?;

        info!(
            old_tip = tip.height,
            new_tip = header.height,
            "chain reorganization detected"
        );

        // Hashes of the new chain, newest first, down to the ancestor.
        let mut side_chain: Vec<(u64, Hash)> = Vec::new();
        let mut cursor = header.clone();
        let ancestor_height = loop {
            let cursor_hash = cursor.block_hash();
            if self.db.block_hash_at(cursor.height as u64)? == Some(cursor_hash) {
                break cursor.height as u64;
            }

            side_chain.push((cursor.height as u64, cursor_hash));
            if cursor.height == 0 {
                return Err(Error::custom("no common ancestor with upstream chain"));
            }
            cursor = self.fetch_header(&cursor.prev_block, shutdown).await?;
        };

        while let Some(tip) = self.db.processed_tip()? {
            if tip.height <= ancestor_height {
                break;
            }
            if *shutdown.borrow() {
                return Err(Error::Cancelled);
            }
            self.rollback_tip(shutdown).await?;
        }

        for (height, hash) in side_chain.iter().rev() {
            if *shutdown.borrow() {
                return Err(Error::Cancelled);
            }
            let block = self.fetch_block(hash, shutdown).await?;
            debug!(height, %hash, "applying reorged block");
            self.process_block(&block, shutdown).await?;
        }

        info!(tip = header.height, "reorg complete");
        Ok(())
    }

    /// Project and atomically commit one block on top of the current tip.
    async fn process_block(
        &self,
        block: &Block,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), Error> {
        let prev = self.parent_for(block, shutdown).await?;
        let prev_inputs = self.resolver.resolve_for_block(block, prev.as_ref()).await?;
        let deltas = block_deltas(block, prev.as_ref(), &prev_inputs, &self.params)?;

        let hash = block.block_hash();
        self.db
            .process_block(block.header.height as u64, &hash, &deltas)?;

        debug!(
            height = block.header.height,
            accounts = deltas.len(),
            "block committed"
        );

        *self.prev_block.lock().expect("prev slot") = Some(block.clone());
        Ok(())
    }

    /// Roll the current tip block out of the store, re-deriving its deltas
    /// with negated signs. The disapproval reversal reverses with it, which
    /// restores the parent's regular-tree contributions.
    async fn rollback_tip(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), Error> {
        let tip = self
            .db
            .processed_tip()?
            .ok_or_else(|| Error::custom("rollback with empty store"))?;

        let block = self.fetch_block(&tip.hash, shutdown).await?;
        let prev = self.parent_for(&block, shutdown).await?;
        let prev_inputs = self.resolver.resolve_for_block(&block, prev.as_ref()).await?;

        let mut deltas = block_deltas(&block, prev.as_ref(), &prev_inputs, &self.params)?;
        for delta in deltas.values_mut() {
            *delta = -*delta;
        }

        self.db.rollback_block(tip.height, &tip.hash, &deltas)?;
        *self.prev_block.lock().expect("prev slot") = None;

        debug!(height = tip.height, "block rolled back");
        Ok(())
    }

    /// The parent block, when the projection will need it (disapproval).
    async fn parent_for(
        &self,
        block: &Block,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Block>, Error> {
        if block_approves_parent(block) {
            return Ok(None);
        }

        let parent_hash = block.header.prev_block;
        if let Some(prev) = self.prev_block.lock().expect("prev slot").clone() {
            if prev.block_hash() == parent_hash {
                return Ok(Some(prev));
            }
        }

        Ok(Some(self.fetch_block(&parent_hash, shutdown).await?))
    }

    async fn fetch_block(
        &self,
        hash: &Hash,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Block, Error> {
        if let Some(block) = self.block_cache.get(hash) {
            return Ok(block);
        }

        let mut attempt = 0;
        loop {
            match self.chain.get_block(hash).await {
                Ok(block) => {
                    self.block_cache.insert(*hash, block.clone());
                    return Ok(block);
                }
                Err(err) if err.is_transient() && attempt < MAX_RPC_ATTEMPTS => {
                    attempt += 1;
                    warn!(%hash, attempt, "block fetch failed, retrying: {err}");
                    sleep_or_cancel(backoff(attempt), shutdown).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_header(
        &self,
        hash: &Hash,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<BlockHeader, Error> {
        let mut attempt = 0;
        loop {
            match self.chain.get_block_header(hash).await {
                Ok(header) => return Ok(header),
                Err(err) if err.is_transient() && attempt < MAX_RPC_ATTEMPTS => {
                    attempt += 1;
                    warn!(%hash, attempt, "header fetch failed, retrying: {err}");
                    sleep_or_cancel(backoff(attempt), shutdown).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn best_block_retry(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<crate::dcrd::BestBlock, Error> {
        let mut attempt = 0;
        loop {
            match self.chain.get_best_block().await {
                Ok(best) => return Ok(best),
                Err(err) if err.is_transient() && attempt < MAX_RPC_ATTEMPTS => {
                    attempt += 1;
                    warn!(attempt, "best block fetch failed, retrying: {err}");
                    sleep_or_cancel(backoff(attempt), shutdown).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

async fn fetch_block_at_height(chain: Arc<dyn Chain>, height: u64) -> Result<Block, Error> {
    let mut attempt = 0;
    loop {
        let result = async {
            let hash = chain.get_block_hash(height).await?;
            chain.get_block(&hash).await
        }
        .await;

        match result {
            Ok(block) => return Ok(block),
            Err(err) if err.is_transient() && attempt < MAX_RPC_ATTEMPTS => {
                attempt += 1;
                warn!(height, attempt, "catch-up fetch failed, retrying: {err}");
                sleep(backoff(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn sleep_or_cancel(
    delay: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), Error> {
    tokio::select! {
        _ = sleep(delay) => Ok(()),
        _ = shutdown.changed() => {
            if *shutdown.borrow() {
                Err(Error::Cancelled)
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::params::Network;
    use crate::storage::memory::MemDb;
    use crate::testutil::{coinbase_tx, spend_tx, test_block, MockChain, TestAccounts};

    struct Harness {
        indexer: Indexer,
        db: Arc<dyn Db>,
        chain: Arc<MockChain>,
        queue: Arc<NotificationQueue>,
        _wake: mpsc::Receiver<()>,
        shutdown: watch::Receiver<bool>,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        let params = Network::Regnet.params();
        let db: Arc<dyn Db> = Arc::new(MemDb::new());
        let chain = Arc::new(MockChain::new(params.name));
        let tx_cache = Arc::new(LruCache::new(100));
        let block_cache = Arc::new(LruCache::new(100));
        let (queue, wake) = NotificationQueue::new();
        let gate = Arc::new(HealthGate::new());
        gate.set_ok("6.2".into());

        let indexer = Indexer::new(
            db.clone(),
            chain.clone(),
            Resolver::new(chain.clone(), tx_cache),
            params,
            block_cache,
            queue.clone(),
            gate,
            2,
        );

        let (shutdown_tx, shutdown) = watch::channel(false);
        Harness {
            indexer,
            db,
            chain,
            queue,
            _wake: wake,
            shutdown,
            _shutdown_tx: shutdown_tx,
        }
    }

    #[tokio::test]
    async fn catch_up_indexes_whole_chain() {
        let mut h = harness();
        let params = Network::Regnet.params();
        let accts = TestAccounts::new(&params);

        let b0 = test_block(0, Hash::ZERO, vec![coinbase_tx(100, &accts.script(0))], vec![]);
        let b1 = test_block(
            1,
            b0.block_hash(),
            vec![coinbase_tx(20, &accts.script(1))],
            vec![],
        );
        h.chain.extend_main(vec![b0, b1.clone()]);

        h.indexer.catch_up(&mut h.shutdown).await.unwrap();

        let tip = h.db.processed_tip().unwrap().unwrap();
        assert_eq!(tip.height, 1);
        assert_eq!(tip.hash, b1.block_hash());
        assert_eq!(h.db.balance(&accts.account(0), 1).unwrap().0, 100);
        assert_eq!(h.db.balance(&accts.account(1), 1).unwrap().0, 20);
    }

    #[tokio::test]
    async fn connect_extends_tip_and_tracks_spends() {
        let mut h = harness();
        let params = Network::Regnet.params();
        let accts = TestAccounts::new(&params);

        let b0 = test_block(0, Hash::ZERO, vec![coinbase_tx(100, &accts.script(0))], vec![]);
        h.chain.extend_main(vec![b0.clone()]);
        h.indexer.catch_up(&mut h.shutdown).await.unwrap();

        // account 0 sends 60 to account 1 (40 in fees)
        let (transfer, prev_inputs) = spend_tx(&accts, 0, 1, 60, 100);
        h.chain.register_prev_inputs(&prev_inputs);
        let b1 = test_block(
            1,
            b0.block_hash(),
            vec![coinbase_tx(5, &accts.script(2)), transfer],
            vec![],
        );
        h.chain.extend_main(vec![b1.clone()]);

        h.indexer
            .handle_block_connected(&b1.header, &mut h.shutdown)
            .await
            .unwrap();

        assert_eq!(h.db.processed_tip().unwrap().unwrap().height, 1);
        assert_eq!(h.db.balance(&accts.account(0), 1).unwrap().0, -100 + 100);
        assert_eq!(h.db.balance(&accts.account(1), 1).unwrap().0, 60);
        assert_eq!(h.db.balance(&accts.account(2), 1).unwrap().0, 5);
    }

    #[tokio::test]
    async fn duplicate_connect_is_ignored() {
        let mut h = harness();
        let params = Network::Regnet.params();
        let accts = TestAccounts::new(&params);

        let b0 = test_block(0, Hash::ZERO, vec![coinbase_tx(100, &accts.script(0))], vec![]);
        h.chain.extend_main(vec![b0.clone()]);
        h.indexer.catch_up(&mut h.shutdown).await.unwrap();

        h.indexer
            .handle_block_connected(&b0.header, &mut h.shutdown)
            .await
            .unwrap();
        assert_eq!(h.db.balance(&accts.account(0), 0).unwrap().0, 100);
    }

    #[tokio::test]
    async fn connect_of_ancestor_unwinds_regressed_tip() {
        let mut h = harness();
        let params = Network::Regnet.params();
        let accts = TestAccounts::new(&params);

        let b0 = test_block(0, Hash::ZERO, vec![coinbase_tx(100, &accts.script(0))], vec![]);
        let b1 = test_block(
            1,
            b0.block_hash(),
            vec![coinbase_tx(10, &accts.script(0))],
            vec![],
        );
        let b2 = test_block(
            2,
            b1.block_hash(),
            vec![coinbase_tx(7, &accts.script(1))],
            vec![],
        );
        h.chain
            .extend_main(vec![b0.clone(), b1.clone(), b2.clone()]);
        h.indexer.catch_up(&mut h.shutdown).await.unwrap();
        assert_eq!(h.db.balance(&accts.account(1), 2).unwrap().0, 7);

        // Upstream's best chain regresses to b1: b2 was disconnected with
        // no replacement, and the poller only ever reports the new best as
        // a connect. The stale tip must still be unwound.
        h.chain.reorg_main(2, vec![]);
        h.indexer
            .handle_block_connected(&b1.header, &mut h.shutdown)
            .await
            .unwrap();

        let tip = h.db.processed_tip().unwrap().unwrap();
        assert_eq!(tip.height, 1);
        assert_eq!(tip.hash, b1.block_hash());
        assert_eq!(h.db.balance(&accts.account(1), 5).unwrap().0, 0);
        assert_eq!(h.db.balance(&accts.account(0), 5).unwrap().0, 110);
        assert_eq!(h.db.block_hash_at(2).unwrap(), None);
    }

    #[tokio::test]
    async fn reorg_rolls_back_to_ancestor_and_applies_new_chain() {
        let mut h = harness();
        let params = Network::Regnet.params();
        let accts = TestAccounts::new(&params);

        // Indexed chain: b0 <- b1 <- b2, paying account 0.
        let b0 = test_block(0, Hash::ZERO, vec![coinbase_tx(100, &accts.script(0))], vec![]);
        let b1 = test_block(
            1,
            b0.block_hash(),
            vec![coinbase_tx(10, &accts.script(0))],
            vec![],
        );
        let b2 = test_block(
            2,
            b1.block_hash(),
            vec![coinbase_tx(10, &accts.script(0))],
            vec![],
        );
        h.chain
            .extend_main(vec![b0.clone(), b1.clone(), b2.clone()]);
        h.indexer.catch_up(&mut h.shutdown).await.unwrap();
        assert_eq!(h.db.balance(&accts.account(0), 2).unwrap().0, 120);

        // Competing chain from b0: b1' <- b2' <- b3', paying account 1.
        let b1p = test_block(
            1,
            b0.block_hash(),
            vec![coinbase_tx(7, &accts.script(1))],
            vec![],
        );
        let b2p = test_block(
            2,
            b1p.block_hash(),
            vec![coinbase_tx(7, &accts.script(1))],
            vec![],
        );
        let b3p = test_block(
            3,
            b2p.block_hash(),
            vec![coinbase_tx(7, &accts.script(1))],
            vec![],
        );
        h.chain
            .reorg_main(1, vec![b1p.clone(), b2p.clone(), b3p.clone()]);

        h.indexer
            .handle_block_connected(&b3p.header, &mut h.shutdown)
            .await
            .unwrap();

        let tip = h.db.processed_tip().unwrap().unwrap();
        assert_eq!(tip.height, 3);
        assert_eq!(tip.hash, b3p.block_hash());

        // Old chain's rewards are gone, new chain's in place.
        assert_eq!(h.db.balance(&accts.account(0), 3).unwrap().0, 100);
        assert_eq!(h.db.balance(&accts.account(1), 3).unwrap().0, 21);
        assert_eq!(h.db.block_hash_at(1).unwrap(), Some(b1p.block_hash()));
    }

    #[tokio::test]
    async fn disconnect_of_tip_rolls_back() {
        let mut h = harness();
        let params = Network::Regnet.params();
        let accts = TestAccounts::new(&params);

        let b0 = test_block(0, Hash::ZERO, vec![coinbase_tx(100, &accts.script(0))], vec![]);
        let b1 = test_block(
            1,
            b0.block_hash(),
            vec![coinbase_tx(10, &accts.script(0))],
            vec![],
        );
        h.chain.extend_main(vec![b0.clone(), b1.clone()]);
        h.indexer.catch_up(&mut h.shutdown).await.unwrap();

        h.indexer
            .handle_block_disconnected(&b1.header, &mut h.shutdown)
            .await
            .unwrap();
        let tip = h.db.processed_tip().unwrap().unwrap();
        assert_eq!(tip.height, 0);
        assert_eq!(h.db.balance(&accts.account(0), 5).unwrap().0, 100);

        // Disconnect of a non-tip block is a no-op.
        h.indexer
            .handle_block_disconnected(&b1.header, &mut h.shutdown)
            .await
            .unwrap();
        assert_eq!(h.db.processed_tip().unwrap().unwrap().height, 0);
    }

    #[tokio::test]
    async fn disapproved_parent_reversal_applies_and_unwinds() {
        let mut h = harness();
        let params = Network::Regnet.params();
        let accts = TestAccounts::new(&params);

        // b1 carries a transfer of 50 from account 0 to account 1.
        let b0 = test_block(0, Hash::ZERO, vec![coinbase_tx(100, &accts.script(0))], vec![]);
        let (transfer, prev_inputs) = spend_tx(&accts, 0, 1, 50, 50);
        h.chain.register_prev_inputs(&prev_inputs);
        let b1 = test_block(
            1,
            b0.block_hash(),
            vec![coinbase_tx(10, &accts.script(2)), transfer],
            vec![],
        );

        // b2 disapproves b1.
        let mut b2 = test_block(
            2,
            b1.block_hash(),
            vec![coinbase_tx(10, &accts.script(2))],
            vec![],
        );
        b2.header.vote_bits = 0;

        h.chain
            .extend_main(vec![b0.clone(), b1.clone(), b2.clone()]);
        h.indexer.catch_up(&mut h.shutdown).await.unwrap();

        // The transfer was reversed by b2: account 1 holds nothing, account
        // 0 got its 50 back, and b1's coinbase was also reversed.
        assert_eq!(h.db.balance(&accts.account(1), 2).unwrap().0, 0);
        assert_eq!(h.db.balance(&accts.account(0), 2).unwrap().0, 100);
        assert_eq!(h.db.balance(&accts.account(2), 2).unwrap().0, 10);

        // Rolling b2 back restores b1's effects.
        h.indexer
            .handle_block_disconnected(&b2.header, &mut h.shutdown)
            .await
            .unwrap();
        assert_eq!(h.db.balance(&accts.account(1), 2).unwrap().0, 50);
        assert_eq!(h.db.balance(&accts.account(0), 2).unwrap().0, 50);
        assert_eq!(h.db.balance(&accts.account(2), 2).unwrap().0, 10);
    }

    #[tokio::test]
    async fn missing_prev_input_is_fatal() {
        let mut h = harness();
        let params = Network::Regnet.params();
        let accts = TestAccounts::new(&params);

        let b0 = test_block(0, Hash::ZERO, vec![coinbase_tx(100, &accts.script(0))], vec![]);
        h.chain.extend_main(vec![b0.clone()]);
        h.indexer.catch_up(&mut h.shutdown).await.unwrap();

        // A transfer whose funding tx the upstream node does not know.
        let (transfer, _) = spend_tx(&accts, 0, 1, 50, 50);
        let b1 = test_block(
            1,
            b0.block_hash(),
            vec![coinbase_tx(5, &accts.script(2)), transfer],
            vec![],
        );
        h.chain.extend_main(vec![b1.clone()]);

        let err = h
            .indexer
            .handle_block_connected(&b1.header, &mut h.shutdown)
            .await;
        assert!(err.is_err());
        assert_eq!(h.db.processed_tip().unwrap().unwrap().height, 0);
        let _ = h.queue.drain();
    }
}
