//! Script to account mapping.
//!
//! Every `(script_version, pk_script)` pair maps to exactly one account
//! string. Version-0 scripts with a single recognizable address render as
//! that address; everything else renders as the raw hex form, which embeds
//! the version so no two distinct scripts can collide.

use crate::chain::{digest, ChainParams};
use crate::error::Error;

// Script opcodes this module cares about.
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_SSTX: u8 = 0xba;
pub const OP_SSGEN: u8 = 0xbb;
pub const OP_SSRTX: u8 = 0xbc;
pub const OP_SSTXCHANGE: u8 = 0xbd;
pub const OP_DATA_1: u8 = 0x01;
pub const OP_DATA_20: u8 = 0x14;
pub const OP_DATA_33: u8 = 0x21;

/// SigHashAll is the only hash type the construction path produces.
pub const SIG_HASH_ALL: u8 = 0x01;

/// 20-byte script/pubkey hash. Truncated chain digest.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let h = digest(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&h.as_bytes()[..20]);
    out
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddressKind {
    PubKeyHash,
    ScriptHash,
}

/// A decoded single-address script target.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Address {
    pub kind: AddressKind,
    pub hash: [u8; 20],
    net_id: [u8; 2],
}

impl Address {
    pub fn pubkey_hash(hash: [u8; 20], params: &ChainParams) -> Self {
        Address {
            kind: AddressKind::PubKeyHash,
            hash,
            net_id: params.pubkey_hash_addr_id,
        }
    }

    pub fn script_hash(hash: [u8; 20], params: &ChainParams) -> Self {
        Address {
            kind: AddressKind::ScriptHash,
            hash,
            net_id: params.script_hash_addr_id,
        }
    }

    pub fn is_pubkey_hash(&self) -> bool {
        self.kind == AddressKind::PubKeyHash
    }

    /// Textual form: base58check over `net_id || hash` with a four-byte
    /// double-digest checksum.
    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(2 + 20 + 4);
        payload.extend_from_slice(&self.net_id);
        payload.extend_from_slice(&self.hash);
        let checksum = checksum4(&payload);
        payload.extend_from_slice(&checksum);
        bitcoin::base58::encode(&payload)
    }

    pub fn decode(addr: &str, params: &ChainParams) -> Result<Self, Error> {
        let bytes = bitcoin::base58::decode(addr)
            .map_err(|e| Error::ScriptDecodeError(format!("bad base58 address: {e}")))?;
        if bytes.len() != 2 + 20 + 4 {
            return Err(Error::ScriptDecodeError("bad address length".into()));
        }

        let (payload, checksum) = bytes.split_at(bytes.len() - 4);
        if checksum4(payload) != checksum {
            return Err(Error::ScriptDecodeError("bad address checksum".into()));
        }

        let net_id = [payload[0], payload[1]];
        let kind = if net_id == params.pubkey_hash_addr_id {
            AddressKind::PubKeyHash
        } else if net_id == params.script_hash_addr_id {
            AddressKind::ScriptHash
        } else {
            return Err(Error::ScriptDecodeError(format!(
                "address prefix {} not valid for {}",
                hex::encode(net_id),
                params.name
            )));
        };

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[2..22]);
        Ok(Address { kind, hash, net_id })
    }

    /// Standard output script paying to this address.
    pub fn pay_to_addr_script(&self) -> Vec<u8> {
        match self.kind {
            AddressKind::PubKeyHash => {
                let mut script = Vec::with_capacity(25);
                script.extend_from_slice(&[OP_DUP, OP_HASH160, OP_DATA_20]);
                script.extend_from_slice(&self.hash);
                script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
                script
            }
            AddressKind::ScriptHash => {
                let mut script = Vec::with_capacity(23);
                script.extend_from_slice(&[OP_HASH160, OP_DATA_20]);
                script.extend_from_slice(&self.hash);
                script.push(OP_EQUAL);
                script
            }
        }
    }
}

fn checksum4(payload: &[u8]) -> [u8; 4] {
    let h = digest(digest(payload).as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&h.as_bytes()[..4]);
    out
}

/// Raw fallback account form: `"0x" || hex(version_be16) || hex(pk_script)`.
fn raw_account(version: u16, pk_script: &[u8]) -> String {
    format!(
        "0x{}{}",
        hex::encode(version.to_be_bytes()),
        hex::encode(pk_script)
    )
}

/// Extract the single address a version-0 script pays to, if it has one.
///
/// Stake-tagged scripts (ticket purchase, vote and revocation payouts,
/// ticket change) are ordinary p2pkh/p2sh scripts behind a one-byte tag.
fn single_address(pk_script: &[u8], params: &ChainParams) -> Option<Address> {
    let script = match pk_script.first() {
        Some(&op) if matches!(op, OP_SSTX | OP_SSGEN | OP_SSRTX | OP_SSTXCHANGE) => &pk_script[1..],
        _ => pk_script,
    };

    match script {
        // OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
        [OP_DUP, OP_HASH160, OP_DATA_20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG]
            if hash.len() == 20 =>
        {
            Some(Address::pubkey_hash(hash.try_into().ok()?, params))
        }
        // OP_HASH160 <20 bytes> OP_EQUAL
        [OP_HASH160, OP_DATA_20, hash @ .., OP_EQUAL] if hash.len() == 20 => {
            Some(Address::script_hash(hash.try_into().ok()?, params))
        }
        // <33-byte pubkey> OP_CHECKSIG
        [OP_DATA_33, pubkey @ .., OP_CHECKSIG] if pubkey.len() == 33 => {
            Some(Address::pubkey_hash(hash160(pubkey), params))
        }
        _ => None,
    }
}

/// Map a `(script_version, pk_script)` pair to its account string.
///
/// Non-zero versions aren't standardized, so they always take the raw form.
/// Zero, or several, extracted addresses (bare multisig is unsupported) also
/// fall back to the raw form.
pub fn pk_script_to_account(
    version: u16,
    pk_script: &[u8],
    params: &ChainParams,
) -> Result<String, Error> {
    if version != 0 {
        return Ok(raw_account(version, pk_script));
    }

    match single_address(pk_script, params) {
        Some(addr) => Ok(addr.encode()),
        None => Ok(raw_account(version, pk_script)),
    }
}
