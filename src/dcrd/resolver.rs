use std::collections::HashSet;
use std::sync::Arc;

use itertools::Itertools;

use crate::cache::LruCache;
use crate::chain::{Block, OutPoint, Transaction};
use crate::dcrd::Chain;
use crate::error::Error;
use crate::ops::{block_prev_outpoints, PrevInput, PrevInputs};

/// Resolves referenced outpoints to their `(pk_script, version, amount)`
/// triples. Consults the shared raw transaction cache first and falls
/// through to upstream `getrawtransaction`, refilling the cache.
pub struct Resolver {
    chain: Arc<dyn Chain>,
    tx_cache: Arc<LruCache<Transaction>>,
}

impl Resolver {
    pub fn new(chain: Arc<dyn Chain>, tx_cache: Arc<LruCache<Transaction>>) -> Self {
        Resolver { chain, tx_cache }
    }

    /// Resolve every requested outpoint or fail. A missing output index in
    /// an otherwise known transaction is a `MissingPrevInput` as well.
    pub async fn resolve(&self, outpoints: &HashSet<OutPoint>) -> Result<PrevInputs, Error> {
        let by_tx = outpoints
            .iter()
            .map(|outpoint| (outpoint.hash, *outpoint))
            .into_group_map();

        let mut resolved = PrevInputs::with_capacity(outpoints.len());

        for (tx_hash, points) in by_tx {
            let tx = match self.tx_cache.get(&tx_hash) {
                Some(tx) => tx,
                None => {
                    let tx = self.chain.get_raw_transaction(&tx_hash).await?;
                    self.tx_cache.insert(tx_hash, tx.clone());
                    tx
                }
            };

            for point in points {
                let output = tx
                    .outputs
                    .get(point.index as usize)
                    .ok_or(Error::MissingPrevInput(point))?;
                resolved.insert(
                    point,
                    PrevInput {
                        pk_script: output.pk_script.clone(),
                        version: output.version,
                        amount: output.value,
                    },
                );
            }
        }

        Ok(resolved)
    }

    /// Prefetch everything a projection of `block` needs.
    pub async fn resolve_for_block(
        &self,
        block: &Block,
        prev: Option<&Block>,
    ) -> Result<PrevInputs, Error> {
        self.resolve(&block_prev_outpoints(block, prev)?).await
    }
}
