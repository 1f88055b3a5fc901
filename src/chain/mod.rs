use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub mod address;
pub mod params;
pub mod stake;

pub use params::ChainParams;

/// 32-byte chain digest used for block hashes, transaction hashes and
/// signature hashes. Displayed in reversed hex like the upstream node
/// renders hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// Digest arbitrary bytes into a [`Hash`].
pub fn digest(data: &[u8]) -> Hash {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rev = self.0;
        rev.reverse();
        write!(f, "{}", hex::encode(rev))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(Error::wire)?;
        let mut arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::wire("hash must be 32 bytes"))?;
        arr.reverse();
        Ok(Hash(arr))
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The two transaction trees of every block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TxTree {
    Regular,
    Stake,
}

impl TxTree {
    pub fn to_i8(self) -> i8 {
        match self {
            TxTree::Regular => 0,
            TxTree::Stake => 1,
        }
    }

    pub fn from_i8(v: i8) -> Result<Self, Error> {
        match v {
            0 => Ok(TxTree::Regular),
            1 => Ok(TxTree::Stake),
            other => Err(Error::wire(format!("invalid tx tree {other}"))),
        }
    }
}

/// Reference to a previous transaction output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
    pub tree: TxTree,
}

impl OutPoint {
    /// The synthetic outpoint carried by coinbase and stakebase inputs.
    pub fn null() -> Self {
        OutPoint {
            hash: Hash::ZERO,
            index: u32::MAX,
            tree: TxTree::Regular,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.index == u32::MAX
    }
}

impl Default for OutPoint {
    fn default() -> Self {
        OutPoint {
            hash: Hash::ZERO,
            index: 0,
            tree: TxTree::Regular,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TxIn {
    pub previous_outpoint: OutPoint,
    pub sequence: u32,
    // witness data
    pub value_in: i64,
    pub block_height: u32,
    pub block_index: u32,
    pub signature_script: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TxOut {
    pub value: i64,
    pub version: u16,
    pub pk_script: Vec<u8>,
}

// Serialization halves of a transaction. The prefix identifies the
// transaction; the witness carries input resolution data and scripts.
const SER_TYPE_FULL: u16 = 0;
const SER_TYPE_NO_WITNESS: u16 = 1;
const SER_TYPE_ONLY_WITNESS: u16 = 2;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
    pub version: u16,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            expiry: 0,
        }
    }
}

impl Transaction {
    /// Transaction hash: digest of the prefix serialization, so witness
    /// data (signatures) never malleates the id.
    pub fn tx_hash(&self) -> Hash {
        digest(&self.serialize_prefix())
    }

    fn write_prefix(&self, out: &mut Vec<u8>, ser_type: u16) {
        write_u32(out, (self.version as u32) | ((ser_type as u32) << 16));
        write_varint(out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(input.previous_outpoint.hash.as_bytes());
            write_u32(out, input.previous_outpoint.index);
            out.push(input.previous_outpoint.tree.to_i8() as u8);
            write_u32(out, input.sequence);
        }
        write_varint(out, self.outputs.len() as u64);
        for output in &self.outputs {
            write_u64(out, output.value as u64);
            write_u16(out, output.version);
            write_varint(out, output.pk_script.len() as u64);
            out.extend_from_slice(&output.pk_script);
        }
        write_u32(out, self.lock_time);
        write_u32(out, self.expiry);
    }

    fn write_witness(&self, out: &mut Vec<u8>) {
        write_varint(out, self.inputs.len() as u64);
        for input in &self.inputs {
            write_u64(out, input.value_in as u64);
            write_u32(out, input.block_height);
            write_u32(out, input.block_index);
            write_varint(out, input.signature_script.len() as u64);
            out.extend_from_slice(&input.signature_script);
        }
    }

    pub fn serialize_prefix(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_prefix(&mut out, SER_TYPE_NO_WITNESS);
        out
    }

    /// Witness serialization with all signature scripts replaced except the
    /// one at `sign_idx`, which is set to `script`. Used by signature hashing.
    pub fn serialize_witness_signing(&self, sign_idx: usize, script: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_u32(
            &mut out,
            (self.version as u32) | ((SER_TYPE_ONLY_WITNESS as u32) << 16),
        );
        write_varint(&mut out, self.inputs.len() as u64);
        for (i, _) in self.inputs.iter().enumerate() {
            let sig: &[u8] = if i == sign_idx { script } else { &[] };
            write_varint(&mut out, sig.len() as u64);
            out.extend_from_slice(sig);
        }
        out
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_prefix(&mut out, SER_TYPE_FULL);
        self.write_witness(&mut out);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cur = Cursor::new(bytes);
        let tx = Self::read(&mut cur)?;
        Ok(tx)
    }

    fn read(cur: &mut Cursor<'_>) -> Result<Self, Error> {
        let version_field = cur.read_u32()?;
        let version = (version_field & 0xffff) as u16;
        let ser_type = (version_field >> 16) as u16;
        if ser_type != SER_TYPE_FULL {
            return Err(Error::wire(format!(
                "unsupported tx serialization type {ser_type}"
            )));
        }

        let n_inputs = cur.read_varint()? as usize;
        let mut inputs = Vec::with_capacity(n_inputs);
        for _ in 0..n_inputs {
            let hash = Hash(cur.read_array::<32>()?);
            let index = cur.read_u32()?;
            let tree = TxTree::from_i8(cur.read_u8()? as i8)?;
            let sequence = cur.read_u32()?;
            inputs.push(TxIn {
                previous_outpoint: OutPoint { hash, index, tree },
                sequence,
                ..Default::default()
            });
        }

        let n_outputs = cur.read_varint()? as usize;
        let mut outputs = Vec::with_capacity(n_outputs);
        for _ in 0..n_outputs {
            let value = cur.read_u64()? as i64;
            let version = cur.read_u16()?;
            let script_len = cur.read_varint()? as usize;
            let pk_script = cur.read_bytes(script_len)?;
            outputs.push(TxOut {
                value,
                version,
                pk_script,
            });
        }

        let lock_time = cur.read_u32()?;
        let expiry = cur.read_u32()?;

        let n_witnesses = cur.read_varint()? as usize;
        if n_witnesses != n_inputs {
            return Err(Error::wire("witness count does not match input count"));
        }
        for input in inputs.iter_mut() {
            input.value_in = cur.read_u64()? as i64;
            input.block_height = cur.read_u32()?;
            input.block_index = cur.read_u32()?;
            let sig_len = cur.read_varint()? as usize;
            input.signature_script = cur.read_bytes(sig_len)?;
        }

        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            expiry,
        })
    }
}

/// Block header. Fixed 180-byte encoding.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub stake_root: Hash,
    pub vote_bits: u16,
    pub final_state: [u8; 6],
    pub voters: u16,
    pub fresh_stake: u8,
    pub revocations: u8,
    pub pool_size: u32,
    pub bits: u32,
    pub sbits: i64,
    pub height: u32,
    pub size: u32,
    pub timestamp: u32,
    pub nonce: u32,
    pub extra_data: [u8; 32],
    pub stake_version: u32,
}

impl Default for BlockHeader {
    fn default() -> Self {
        BlockHeader {
            version: 1,
            prev_block: Hash::ZERO,
            merkle_root: Hash::ZERO,
            stake_root: Hash::ZERO,
            vote_bits: 0x0001,
            final_state: [0u8; 6],
            voters: 0,
            fresh_stake: 0,
            revocations: 0,
            pool_size: 0,
            bits: 0,
            sbits: 0,
            height: 0,
            size: 0,
            timestamp: 0,
            nonce: 0,
            extra_data: [0u8; 32],
            stake_version: 0,
        }
    }
}

impl BlockHeader {
    pub fn block_hash(&self) -> Hash {
        digest(&self.serialize())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(180);
        write_u32(&mut out, self.version as u32);
        out.extend_from_slice(self.prev_block.as_bytes());
        out.extend_from_slice(self.merkle_root.as_bytes());
        out.extend_from_slice(self.stake_root.as_bytes());
        write_u16(&mut out, self.vote_bits);
        out.extend_from_slice(&self.final_state);
        write_u16(&mut out, self.voters);
        out.push(self.fresh_stake);
        out.push(self.revocations);
        write_u32(&mut out, self.pool_size);
        write_u32(&mut out, self.bits);
        write_u64(&mut out, self.sbits as u64);
        write_u32(&mut out, self.height);
        write_u32(&mut out, self.size);
        write_u32(&mut out, self.timestamp);
        write_u32(&mut out, self.nonce);
        out.extend_from_slice(&self.extra_data);
        write_u32(&mut out, self.stake_version);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cur = Cursor::new(bytes);
        let header = Self::read(&mut cur)?;
        Ok(header)
    }

    fn read(cur: &mut Cursor<'_>) -> Result<Self, Error> {
        Ok(BlockHeader {
            version: cur.read_u32()? as i32,
            prev_block: Hash(cur.read_array::<32>()?),
            merkle_root: Hash(cur.read_array::<32>()?),
            stake_root: Hash(cur.read_array::<32>()?),
            vote_bits: cur.read_u16()?,
            final_state: cur.read_array::<6>()?,
            voters: cur.read_u16()?,
            fresh_stake: cur.read_u8()?,
            revocations: cur.read_u8()?,
            pool_size: cur.read_u32()?,
            bits: cur.read_u32()?,
            sbits: cur.read_u64()? as i64,
            height: cur.read_u32()?,
            size: cur.read_u32()?,
            timestamp: cur.read_u32()?,
            nonce: cur.read_u32()?,
            extra_data: cur.read_array::<32>()?,
            stake_version: cur.read_u32()?,
        })
    }
}

/// A block: header plus the regular and stake transaction trees.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub stake_transactions: Vec<Transaction>,
}

impl Block {
    pub fn block_hash(&self) -> Hash {
        self.header.block_hash()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.header.serialize();
        write_varint(&mut out, self.transactions.len() as u64);
        for tx in &self.transactions {
            out.extend_from_slice(&tx.serialize());
        }
        write_varint(&mut out, self.stake_transactions.len() as u64);
        for tx in &self.stake_transactions {
            out.extend_from_slice(&tx.serialize());
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cur = Cursor::new(bytes);
        let header = BlockHeader::read(&mut cur)?;

        let n_txs = cur.read_varint()? as usize;
        let mut transactions = Vec::with_capacity(n_txs);
        for _ in 0..n_txs {
            transactions.push(Transaction::read(&mut cur)?);
        }

        let n_stxs = cur.read_varint()? as usize;
        let mut stake_transactions = Vec::with_capacity(n_stxs);
        for _ in 0..n_stxs {
            stake_transactions.push(Transaction::read(&mut cur)?);
        }

        Ok(Block {
            header,
            transactions,
            stake_transactions,
        })
    }
}

/// True when the low bit of the vote bits flags the parent block's regular
/// transactions as approved.
pub fn vote_bits_approve_parent(vote_bits: u16) -> bool {
    vote_bits & 0x01 == 0x01
}

/// Signature hash over the transaction for the input at `idx`, committing
/// to `pk_script` as the script being satisfied. Digest of
/// `hash_type || prefix_hash || witness_hash`.
pub fn calc_signature_hash(
    tx: &Transaction,
    idx: usize,
    pk_script: &[u8],
    hash_type: u8,
) -> Result<Hash, Error> {
    if idx >= tx.inputs.len() {
        return Err(Error::custom(format!(
            "signature hash input index {idx} out of range"
        )));
    }

    let prefix_hash = digest(&tx.serialize_prefix());
    let witness_hash = digest(&tx.serialize_witness_signing(idx, pk_script));

    let mut msg = Vec::with_capacity(4 + 32 + 32);
    write_u32(&mut msg, hash_type as u32);
    msg.extend_from_slice(prefix_hash.as_bytes());
    msg.extend_from_slice(witness_hash.as_bytes());
    Ok(digest(&msg))
}

// --- little-endian wire primitives

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_varint(out: &mut Vec<u8>, v: u64) {
    match v {
        0..=0xfc => out.push(v as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(v as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(v as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes }
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let (head, rest) = self
            .bytes
            .split_at_checked(n)
            .ok_or_else(|| Error::wire("unexpected end of input"))?;
        self.bytes = rest;
        Ok(head.to_vec())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let (head, rest) = self
            .bytes
            .split_at_checked(N)
            .ok_or_else(|| Error::wire("unexpected end of input"))?;
        self.bytes = rest;
        Ok(head.try_into().expect("split length"))
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.read_array::<2>()?))
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_varint(&mut self) -> Result<u64, Error> {
        let disc = self.read_u8()?;
        match disc {
            0xfd => Ok(self.read_u16()? as u64),
            0xfe => Ok(self.read_u32()? as u64),
            0xff => self.read_u64(),
            v => Ok(v as u64),
        }
    }
}
