use std::path::Path;

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::info;

use crate::chain::Hash;
use crate::error::Error;
use crate::storage::keys::{
    balance_key, balance_key_height, balance_prefix, block_key, decode_balance, decode_tip,
    encode_balance, encode_tip, TIP_KEY,
};
use crate::storage::{check_extends, check_is_tip, AccountDeltas, Db, Tip};

/// Index store backed by rocksdb. Survives restarts so the chain only has
/// to be caught up from the persisted tip.
pub struct DiskDb {
    db: DB,
}

impl DiskDb {
    pub fn open(path: &Path) -> Result<Self, Error> {
        info!(path = %path.display(), "opening index db");

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path)?;
        Ok(DiskDb { db })
    }

    fn read_tip(&self) -> Result<Option<Tip>, Error> {
        self.db
            .get(TIP_KEY)?
            .map(|bytes| decode_tip(&bytes))
            .transpose()
    }
}

impl Db for DiskDb {
    fn balance(&self, account: &str, height: u64) -> Result<(i64, u64), Error> {
        let prefix = balance_prefix(account);
        let upper = balance_key(account, height);

        // Seek to the last record at or below the requested height.
        let mut iter = self
            .db
            .iterator(IteratorMode::From(&upper, Direction::Reverse));

        match iter.next() {
            Some(entry) => {
                let (key, value) = entry?;
                if !key.starts_with(&prefix) {
                    return Ok((0, 0));
                }
                let at_height = balance_key_height(&key, prefix.len())?;
                Ok((decode_balance(&value)?, at_height))
            }
            None => Ok((0, 0)),
        }
    }

    fn processed_tip(&self) -> Result<Option<Tip>, Error> {
        self.read_tip()
    }

    fn block_hash_at(&self, height: u64) -> Result<Option<Hash>, Error> {
        match self.db.get(block_key(height))? {
            Some(bytes) => {
                let arr: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::custom("malformed block hash record"))?;
                Ok(Some(Hash(arr)))
            }
            None => Ok(None),
        }
    }

    fn process_block(
        &self,
        height: u64,
        hash: &Hash,
        deltas: &AccountDeltas,
    ) -> Result<(), Error> {
        check_extends(self.read_tip()?, height, hash)?;

        let mut batch = WriteBatch::new();

        for (account, delta) in deltas {
            let (prev, _) = self.balance(account, height.saturating_sub(1))?;
            batch.put(balance_key(account, height), encode_balance(prev + delta));
        }

        batch.put(block_key(height), hash.as_bytes());
        batch.put(
            TIP_KEY,
            encode_tip(&Tip {
                height,
                hash: *hash,
            }),
        );

        self.db.write(batch)?;
        Ok(())
    }

    fn rollback_block(
        &self,
        height: u64,
        hash: &Hash,
        deltas: &AccountDeltas,
    ) -> Result<(), Error> {
        check_is_tip(self.read_tip()?, height, hash)?;

        let mut batch = WriteBatch::new();

        for account in deltas.keys() {
            batch.delete(balance_key(account, height));
        }
        batch.delete(block_key(height));

        if height == 0 {
            batch.delete(TIP_KEY);
        } else {
            let parent = self
                .block_hash_at(height - 1)?
                .ok_or_else(|| Error::custom("missing parent block record"))?;
            batch.put(
                TIP_KEY,
                encode_tip(&Tip {
                    height: height - 1,
                    hash: parent,
                }),
            );
        }

        self.db.write(batch)?;
        Ok(())
    }
}
