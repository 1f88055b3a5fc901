//! KV key layout shared by the disk backend.
//!
//! Heights are big-endian so range scans over one account's balance records
//! come back height-ascending.

use crate::chain::Hash;
use crate::error::Error;
use crate::storage::Tip;

pub const TIP_KEY: &[u8] = b"tip";

pub fn balance_prefix(account: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + account.len() + 1);
    key.extend_from_slice(b"bal/");
    key.extend_from_slice(account.as_bytes());
    key.push(b'/');
    key
}

pub fn balance_key(account: &str, height: u64) -> Vec<u8> {
    let mut key = balance_prefix(account);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

pub fn block_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 8);
    key.extend_from_slice(b"blk/");
    key.extend_from_slice(&height.to_be_bytes());
    key
}

/// Height of a balance key known to carry the given account prefix.
pub fn balance_key_height(key: &[u8], prefix_len: usize) -> Result<u64, Error> {
    let bytes: [u8; 8] = key
        .get(prefix_len..)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::custom("malformed balance key"))?;
    Ok(u64::from_be_bytes(bytes))
}

pub fn encode_balance(balance: i64) -> [u8; 8] {
    balance.to_be_bytes()
}

pub fn decode_balance(bytes: &[u8]) -> Result<i64, Error> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::custom("malformed balance value"))?;
    Ok(i64::from_be_bytes(arr))
}

pub fn encode_tip(tip: &Tip) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 32);
    out.extend_from_slice(&tip.height.to_be_bytes());
    out.extend_from_slice(tip.hash.as_bytes());
    out
}

pub fn decode_tip(bytes: &[u8]) -> Result<Tip, Error> {
    if bytes.len() != 8 + 32 {
        return Err(Error::custom("malformed tip record"));
    }
    let height = u64::from_be_bytes(bytes[..8].try_into().expect("length checked"));
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes[8..]);
    Ok(Tip {
        height,
        hash: Hash(hash),
    })
}
