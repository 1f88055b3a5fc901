//! Persistent per-account balance history.
//!
//! Two backends share one narrow interface: an in-memory store for tests and
//! ephemeral runs, and a rocksdb store for everything else. All writes of a
//! block commit atomically; a crash can never split the balance records of a
//! block from the tip record.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use crate::chain::Hash;
use crate::error::Error;

pub mod disk;
pub mod keys;
pub mod memory;

/// Last processed block of the index.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Tip {
    pub height: u64,
    pub hash: Hash,
}

/// Balance deltas of one block, keyed by account.
pub type AccountDeltas = HashMap<String, i64>;

pub trait Db: Send + Sync {
    /// Cumulative balance of `account` at the greatest recorded height not
    /// above `height`, along with that height. `(0, 0)` when the account has
    /// no history in range.
    fn balance(&self, account: &str, height: u64) -> Result<(i64, u64), Error>;

    fn processed_tip(&self) -> Result<Option<Tip>, Error>;

    /// Hash of the block processed at `height`, when still part of the
    /// indexed chain.
    fn block_hash_at(&self, height: u64) -> Result<Option<Hash>, Error>;

    /// Atomically record one block: a new cumulative balance per touched
    /// account, the processed hash for the height, and the tip. Fails with
    /// `StoreConflict` unless the block extends the current tip.
    fn process_block(&self, height: u64, hash: &Hash, deltas: &AccountDeltas)
        -> Result<(), Error>;

    /// Inverse of `process_block` for the current tip block. The delta map
    /// names the accounts whose records at `height` are discarded; after
    /// success the tip is the block's parent.
    fn rollback_block(
        &self,
        height: u64,
        hash: &Hash,
        deltas: &AccountDeltas,
    ) -> Result<(), Error>;
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Mem,
    Disk,
}

impl FromStr for DbType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mem" => Ok(DbType::Mem),
            "disk" => Ok(DbType::Disk),
            other => Err(Error::UnknownDbType(other.to_string())),
        }
    }
}

pub fn open_db(db_type: DbType, path: &Path) -> Result<Arc<dyn Db>, Error> {
    match db_type {
        DbType::Mem => Ok(Arc::new(memory::MemDb::new())),
        DbType::Disk => Ok(Arc::new(disk::DiskDb::open(path)?)),
    }
}

/// Verify a block may be applied on top of `tip`.
pub(crate) fn check_extends(
    tip: Option<Tip>,
    height: u64,
    hash: &Hash,
) -> Result<(), Error> {
    let ok = match tip {
        None => height == 0,
        Some(tip) => tip.height + 1 == height,
    };

    if ok {
        Ok(())
    } else {
        Err(Error::StoreConflict {
            expected: tip.map(|t| (t.height, t.hash.to_string())),
            got: (height, hash.to_string()),
        })
    }
}

/// Verify a rollback names the current tip block.
pub(crate) fn check_is_tip(tip: Option<Tip>, height: u64, hash: &Hash) -> Result<(), Error> {
    match tip {
        Some(tip) if tip.height == height && tip.hash == *hash => Ok(()),
        _ => Err(Error::StoreConflict {
            expected: tip.map(|t| (t.height, t.hash.to_string())),
            got: (height, hash.to_string()),
        }),
    }
}
