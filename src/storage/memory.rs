use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::chain::Hash;
use crate::error::Error;
use crate::storage::{check_extends, check_is_tip, AccountDeltas, Db, Tip};

#[derive(Default)]
struct Inner {
    /// `(account, height) -> cumulative balance`, height-ordered per account.
    balances: BTreeMap<(String, u64), i64>,
    blocks: BTreeMap<u64, Hash>,
    tip: Option<Tip>,
}

/// Index store held entirely in memory. Fastest backend, but the chain is
/// reprocessed on every startup.
#[derive(Default)]
pub struct MemDb {
    inner: RwLock<Inner>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }
}

fn balance_before(inner: &Inner, account: &str, height: u64) -> (i64, u64) {
    inner
        .balances
        .range((account.to_string(), 0)..=(account.to_string(), height))
        .next_back()
        .map(|((_, h), bal)| (*bal, *h))
        .unwrap_or((0, 0))
}

impl Db for MemDb {
    fn balance(&self, account: &str, height: u64) -> Result<(i64, u64), Error> {
        let inner = self.inner.read().expect("memdb lock");
        Ok(balance_before(&inner, account, height))
    }

    fn processed_tip(&self) -> Result<Option<Tip>, Error> {
        Ok(self.inner.read().expect("memdb lock").tip)
    }

    fn block_hash_at(&self, height: u64) -> Result<Option<Hash>, Error> {
        Ok(self
            .inner
            .read()
            .expect("memdb lock")
            .blocks
            .get(&height)
            .copied())
    }

    fn process_block(
        &self,
        height: u64,
        hash: &Hash,
        deltas: &AccountDeltas,
    ) -> Result<(), Error> {
        let mut inner = self.inner.write().expect("memdb lock");
        check_extends(inner.tip, height, hash)?;

        for (account, delta) in deltas {
            let (prev, _) = balance_before(&inner, account, height.saturating_sub(1));
            inner
                .balances
                .insert((account.clone(), height), prev + delta);
        }

        inner.blocks.insert(height, *hash);
        inner.tip = Some(Tip {
            height,
            hash: *hash,
        });
        Ok(())
    }

    fn rollback_block(
        &self,
        height: u64,
        hash: &Hash,
        deltas: &AccountDeltas,
    ) -> Result<(), Error> {
        let mut inner = self.inner.write().expect("memdb lock");
        check_is_tip(inner.tip, height, hash)?;

        for account in deltas.keys() {
            inner.balances.remove(&(account.clone(), height));
        }

        inner.blocks.remove(&height);
        inner.tip = if height == 0 {
            None
        } else {
            let parent = inner
                .blocks
                .get(&(height - 1))
                .copied()
                .ok_or_else(|| Error::custom("missing parent block record"))?;
            Some(Tip {
                height: height - 1,
                hash: parent,
            })
        };
        Ok(())
    }
}
