//! Rosetta Construction API helpers: rebuilding a native transaction from
//! operation lists, extracting signers and signing payloads, and combining
//! externally produced signatures.

use serde_json::Value;

use crate::chain::address::{Address, OP_DATA_33, SIG_HASH_ALL};
use crate::chain::{calc_signature_hash, ChainParams, Hash, OutPoint, Transaction, TxIn, TxOut, TxTree};
use crate::error::Error;
use crate::rosetta;

fn meta_u64(meta: Option<&Value>, key: &str) -> u64 {
    meta.and_then(|m| m.get(key)).and_then(Value::as_u64).unwrap_or(0)
}

fn meta_i64(meta: Option<&Value>, key: &str) -> i64 {
    meta.and_then(|m| m.get(key)).and_then(Value::as_i64).unwrap_or(0)
}

fn meta_hex(meta: Option<&Value>, key: &str) -> Result<Option<Vec<u8>>, Error> {
    match meta.and_then(|m| m.get(key)).and_then(Value::as_str) {
        Some(s) => hex::decode(s)
            .map(Some)
            .map_err(|e| Error::custom(format!("bad {key} hex: {e}"))),
        None => Ok(None),
    }
}

fn account_script_version(account: &rosetta::AccountIdentifier) -> u16 {
    meta_u64(account.metadata.as_ref(), "script_version") as u16
}

fn parse_coin_outpoint(op: &rosetta::Operation, tree: TxTree) -> Result<OutPoint, Error> {
    let coin = op
        .coin_change
        .as_ref()
        .ok_or_else(|| Error::custom("debit operation without coin change"))?;

    let (hash, index) = coin
        .coin_identifier
        .identifier
        .split_once(':')
        .ok_or_else(|| Error::custom("malformed coin identifier"))?;

    Ok(OutPoint {
        hash: hash.parse::<Hash>()?,
        index: index
            .parse()
            .map_err(|_| Error::custom("malformed coin identifier index"))?,
        tree,
    })
}

fn op_amount(op: &rosetta::Operation) -> Result<i64, Error> {
    op.amount
        .value
        .parse::<i64>()
        .map_err(|_| Error::custom("malformed operation amount"))
}

/// Build an unsigned transaction from a Rosetta operation list. Inputs come
/// from the debit operations in order, outputs from the credit operations in
/// order.
pub fn rosetta_ops_to_tx(
    tx_metadata: &Value,
    ops: &[rosetta::Operation],
    params: &ChainParams,
) -> Result<Transaction, Error> {
    let mut tx = Transaction {
        version: tx_metadata.get("version").and_then(Value::as_u64).unwrap_or(1) as u16,
        lock_time: tx_metadata.get("locktime").and_then(Value::as_u64).unwrap_or(0) as u32,
        expiry: tx_metadata.get("expiry").and_then(Value::as_u64).unwrap_or(0) as u32,
        ..Default::default()
    };

    for op in ops {
        let meta = op.metadata.as_ref();
        match op.op_type.as_str() {
            "debit" => {
                let tree = TxTree::from_i8(meta_i64(meta, "prev_tree") as i8)?;
                tx.inputs.push(TxIn {
                    previous_outpoint: parse_coin_outpoint(op, tree)?,
                    sequence: meta_u64(meta, "sequence") as u32,
                    value_in: op_amount(op)?.abs(),
                    block_height: meta_u64(meta, "block_height") as u32,
                    block_index: meta_u64(meta, "block_index") as u32,
                    signature_script: meta_hex(meta, "signature_script")?.unwrap_or_default(),
                });
            }
            "credit" => {
                let version = account_script_version(&op.account);
                let pk_script = match meta_hex(meta, "pk_script")? {
                    Some(script) => script,
                    None => Address::decode(&op.account.address, params)?.pay_to_addr_script(),
                };
                tx.outputs.push(TxOut {
                    value: op_amount(op)?,
                    version,
                    pk_script,
                });
            }
            other => return Err(Error::custom(format!("unknown operation type {other}"))),
        }
    }

    Ok(tx)
}

/// The account of a debit op, when it is a version-0 pay-to-pubkey-hash
/// this service knows how to sign for. Anything else contributes nothing.
fn signing_address(
    op: &rosetta::Operation,
    params: &ChainParams,
) -> Option<(Address, rosetta::AccountIdentifier)> {
    if account_script_version(&op.account) != 0 {
        return None;
    }
    let addr = Address::decode(&op.account.address, params).ok()?;
    if !addr.is_pubkey_hash() {
        return None;
    }
    Some((addr, rosetta::AccountIdentifier::new(op.account.address.clone())))
}

/// Accounts expected to sign the transaction, in input order.
pub fn extract_tx_signers(
    ops: &[rosetta::Operation],
    _tx: &Transaction,
    params: &ChainParams,
) -> Result<Vec<rosetta::AccountIdentifier>, Error> {
    Ok(ops
        .iter()
        .filter(|op| op.op_type == "debit")
        .filter_map(|op| signing_address(op, params).map(|(_, account)| account))
        .collect())
}

/// Signing payloads for every signable input, with the signature hash
/// computed over the standard p2pkh script under SigHashAll.
pub fn extract_sign_payloads(
    ops: &[rosetta::Operation],
    tx: &Transaction,
    params: &ChainParams,
) -> Result<Vec<rosetta::SigningPayload>, Error> {
    let mut payloads = Vec::new();
    let mut input_idx = 0usize;

    for op in ops.iter().filter(|op| op.op_type == "debit") {
        if let Some((addr, account)) = signing_address(op, params) {
            let pk_script = addr.pay_to_addr_script();
            let sighash = calc_signature_hash(tx, input_idx, &pk_script, SIG_HASH_ALL)?;
            payloads.push(rosetta::SigningPayload {
                account_identifier: account,
                hex_bytes: hex::encode(sighash.as_bytes()),
                signature_type: rosetta::SignatureType::Ecdsa,
            });
        }
        input_idx += 1;
    }

    Ok(payloads)
}

/// Minimal DER encoding of a 32-byte big-endian scalar: leading zeros
/// stripped, a zero byte prepended when the high bit is set.
fn der_scalar(scalar: &[u8]) -> Vec<u8> {
    let start = scalar.iter().position(|&b| b != 0).unwrap_or(scalar.len() - 1);
    let trimmed = &scalar[start..];

    let mut out = Vec::with_capacity(trimmed.len() + 1);
    if trimmed[0] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(trimmed);
    out
}

/// DER-serialize a raw 64-byte `r || s` signature.
fn der_signature(raw: &[u8]) -> Result<Vec<u8>, Error> {
    if raw.len() != 64 {
        return Err(Error::custom("raw signature must be 64 bytes"));
    }

    let r = der_scalar(&raw[..32]);
    let s = der_scalar(&raw[32..]);

    let mut out = Vec::with_capacity(6 + r.len() + s.len());
    out.push(0x30);
    out.push((4 + r.len() + s.len()) as u8);
    out.push(0x02);
    out.push(r.len() as u8);
    out.extend_from_slice(&r);
    out.push(0x02);
    out.push(s.len() as u8);
    out.extend_from_slice(&s);
    Ok(out)
}

/// Fill the signature scripts of an unsigned transaction from Rosetta
/// signatures. Only ECDSA over secp256k1 with compressed public keys is
/// accepted, and the signature count must match the input count.
pub fn combine_tx_sigs(sigs: &[rosetta::Signature], tx: &mut Transaction) -> Result<(), Error> {
    if sigs.len() != tx.inputs.len() {
        return Err(Error::IncorrectSigCount);
    }

    for (input, sig) in tx.inputs.iter_mut().zip(sigs) {
        if sig.signature_type != rosetta::SignatureType::Ecdsa {
            return Err(Error::UnsupportedSignatureType(format!(
                "{:?}",
                sig.signature_type
            )));
        }
        if sig.public_key.curve_type != rosetta::CurveType::Secp256k1 {
            return Err(Error::UnsupportedCurveType(format!(
                "{:?}",
                sig.public_key.curve_type
            )));
        }

        let raw = hex::decode(&sig.hex_bytes).map_err(|e| Error::custom(format!("bad signature hex: {e}")))?;
        let pubkey = hex::decode(&sig.public_key.hex_bytes)
            .map_err(|e| Error::custom(format!("bad public key hex: {e}")))?;
        if pubkey.len() != 33 {
            return Err(Error::custom("public key must be 33 compressed bytes"));
        }

        let der = der_signature(&raw)?;

        let mut script = Vec::with_capacity(der.len() + pubkey.len() + 3);
        script.push((der.len() + 1) as u8);
        script.extend_from_slice(&der);
        script.push(SIG_HASH_ALL);
        script.push(OP_DATA_33);
        script.extend_from_slice(&pubkey);

        input.signature_script = script;
    }

    Ok(())
}
