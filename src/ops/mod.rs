//! Projection of native blocks and transactions into ordered streams of
//! double-entry ledger operations.
//!
//! Debits carry the negated previous-output amount, credits the output
//! value; reversing a transaction flips both signs and the emission order,
//! so an account never observes an impossible intermediate balance while a
//! disapproved parent is being unwound.

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::chain::{
    address, stake, vote_bits_approve_parent, Block, ChainParams, Hash, OutPoint, Transaction,
    TxIn, TxTree,
};
use crate::error::Error;
use crate::rosetta;

pub mod construction;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpType {
    Debit,
    Credit,
}

impl OpType {
    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Debit => "debit",
            OpType::Credit => "credit",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpStatus {
    Success,
    Reversed,
}

impl OpStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OpStatus::Success => "success",
            OpStatus::Reversed => "reversed",
        }
    }
}

pub fn all_op_types() -> Vec<String> {
    vec![OpType::Debit.as_str().into(), OpType::Credit.as_str().into()]
}

pub fn all_op_statuses() -> Vec<rosetta::OperationStatus> {
    vec![
        rosetta::OperationStatus {
            status: OpStatus::Success.as_str().into(),
            successful: true,
        },
        rosetta::OperationStatus {
            status: OpStatus::Reversed.as_str().into(),
            successful: true,
        },
    ]
}

/// Resolved data of a spent output.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PrevInput {
    pub pk_script: Vec<u8>,
    pub version: u16,
    pub amount: i64,
}

/// Prefetched previous outputs, keyed by outpoint.
pub type PrevInputs = HashMap<OutPoint, PrevInput>;

/// One emitted ledger operation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Op {
    pub tx_hash: Hash,
    pub op_index: i64,
    pub io_index: usize,
    pub op_type: OpType,
    pub status: OpStatus,
    pub account: String,
    pub amount: i64,
    pub detail: OpDetail,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OpDetail {
    Debit {
        input: TxIn,
        script_version: u16,
    },
    Credit {
        output_version: u16,
    },
}

impl Op {
    pub fn to_rosetta(&self) -> rosetta::Operation {
        let (coin_change, metadata) = match &self.detail {
            OpDetail::Debit {
                input,
                script_version,
            } => {
                let prev = &input.previous_outpoint;
                let coin = rosetta::CoinChange {
                    coin_identifier: rosetta::CoinIdentifier {
                        identifier: format!("{}:{}", prev.hash, prev.index),
                    },
                    coin_action: rosetta::CoinAction::Spent,
                };
                let meta = json!({
                    "input_index": self.io_index,
                    "prev_hash": prev.hash.to_string(),
                    "prev_index": prev.index,
                    "prev_tree": prev.tree.to_i8(),
                    "sequence": input.sequence,
                    "block_height": input.block_height,
                    "block_index": input.block_index,
                    "signature_script": hex::encode(&input.signature_script),
                    "script_version": script_version,
                });
                (coin, meta)
            }
            OpDetail::Credit { output_version } => {
                let coin = rosetta::CoinChange {
                    coin_identifier: rosetta::CoinIdentifier {
                        identifier: format!("{}:{}", self.tx_hash, self.io_index),
                    },
                    coin_action: rosetta::CoinAction::Created,
                };
                let meta = json!({
                    "output_index": self.io_index,
                    "script_version": output_version,
                });
                (coin, meta)
            }
        };

        rosetta::Operation {
            operation_identifier: rosetta::OperationIdentifier {
                index: self.op_index,
            },
            op_type: self.op_type.as_str().into(),
            status: Some(self.status.as_str().into()),
            account: rosetta::AccountIdentifier::new(self.account.clone()),
            amount: rosetta::Amount::dcr(self.amount),
            coin_change: Some(coin_change),
            metadata: Some(metadata),
        }
    }
}

/// The coinbase predicate: first transaction of the regular tree of a block.
/// Mempool transactions carry no index and are never coinbases.
fn is_coinbase(tree: TxTree, tx_index: Option<usize>) -> bool {
    tree == TxTree::Regular && tx_index == Some(0)
}

fn skips_first_input(tx: &Transaction, tree: TxTree, tx_index: Option<usize>) -> bool {
    is_coinbase(tree, tx_index) || (tree == TxTree::Stake && stake::is_vote(tx))
}

/// Outpoints a projection of `tx` will need resolved. Honors the same
/// first-input skip rule as the emitter.
pub fn tx_prev_outpoints(
    tx: &Transaction,
    tree: TxTree,
    tx_index: Option<usize>,
    out: &mut HashSet<OutPoint>,
) {
    let skip_first = skips_first_input(tx, tree, tx_index);
    for (i, input) in tx.inputs.iter().enumerate() {
        if i == 0 && skip_first {
            continue;
        }
        out.insert(input.previous_outpoint);
    }
}

/// All outpoints needed to project `block` (including the reversal of the
/// parent's regular tree when the parent is disapproved).
pub fn block_prev_outpoints(
    block: &Block,
    prev: Option<&Block>,
) -> Result<HashSet<OutPoint>, Error> {
    let mut out = HashSet::new();

    if !block_approves_parent(block) {
        let prev = prev.ok_or(Error::NeedsPreviousBlock)?;
        for (i, tx) in prev.transactions.iter().enumerate() {
            tx_prev_outpoints(tx, TxTree::Regular, Some(i), &mut out);
        }
    }
    for (i, tx) in block.transactions.iter().enumerate() {
        tx_prev_outpoints(tx, TxTree::Regular, Some(i), &mut out);
    }
    for (i, tx) in block.stake_transactions.iter().enumerate() {
        tx_prev_outpoints(tx, TxTree::Stake, Some(i), &mut out);
    }

    Ok(out)
}

pub fn block_approves_parent(block: &Block) -> bool {
    vote_bits_approve_parent(block.header.vote_bits) || block.header.height == 0
}

/// Project one transaction, feeding each operation to `apply`.
///
/// Success order is inputs then outputs; reversed order is outputs then
/// inputs. The first input of a coinbase or vote has no real previous
/// output and is suppressed. Zero-valued outputs and empty accounts emit
/// nothing.
pub fn tx_ops(
    tx: &Transaction,
    tree: TxTree,
    tx_index: Option<usize>,
    status: OpStatus,
    prev_inputs: &PrevInputs,
    params: &ChainParams,
    apply: &mut dyn FnMut(Op) -> Result<(), Error>,
) -> Result<(), Error> {
    let skip_first = skips_first_input(tx, tree, tx_index);
    let tx_hash = tx.tx_hash();
    let sign = match status {
        OpStatus::Success => 1i64,
        OpStatus::Reversed => -1,
    };

    type Apply<'a> = &'a mut dyn FnMut(Op) -> Result<(), Error>;

    let add_inputs = |op_index: &mut i64, apply: Apply| -> Result<(), Error> {
        for (i, input) in tx.inputs.iter().enumerate() {
            if i == 0 && skip_first {
                continue;
            }

            let prev = prev_inputs
                .get(&input.previous_outpoint)
                .ok_or(Error::MissingPrevInput(input.previous_outpoint))?;

            let account = address::pk_script_to_account(prev.version, &prev.pk_script, params)?;
            if account.is_empty() {
                continue;
            }

            apply(Op {
                tx_hash,
                op_index: *op_index,
                io_index: i,
                op_type: OpType::Debit,
                status,
                account,
                amount: sign * -prev.amount,
                detail: OpDetail::Debit {
                    input: input.clone(),
                    script_version: prev.version,
                },
            })?;
            *op_index += 1;
        }
        Ok(())
    };

    let add_outputs = |op_index: &mut i64, apply: Apply| -> Result<(), Error> {
        for (i, output) in tx.outputs.iter().enumerate() {
            if output.value == 0 {
                // OP_RETURNs, vote metadata, ticket commitments.
                continue;
            }

            let account = address::pk_script_to_account(output.version, &output.pk_script, params)?;
            if account.is_empty() {
                continue;
            }

            apply(Op {
                tx_hash,
                op_index: *op_index,
                io_index: i,
                op_type: OpType::Credit,
                status,
                account,
                amount: sign * output.value,
                detail: OpDetail::Credit {
                    output_version: output.version,
                },
            })?;
            *op_index += 1;
        }
        Ok(())
    };

    let mut op_index = 0i64;

    match status {
        OpStatus::Success => {
            add_inputs(&mut op_index, &mut *apply)?;
            add_outputs(&mut op_index, &mut *apply)?;
        }
        OpStatus::Reversed => {
            add_outputs(&mut op_index, &mut *apply)?;
            add_inputs(&mut op_index, &mut *apply)?;
        }
    }

    Ok(())
}

/// Project a whole block: the reversal of the parent's regular tree first
/// when disapproved, then the block's regular tree, then its stake tree.
pub fn block_ops(
    block: &Block,
    prev: Option<&Block>,
    prev_inputs: &PrevInputs,
    params: &ChainParams,
    apply: &mut dyn FnMut(Op) -> Result<(), Error>,
) -> Result<(), Error> {
    if !block_approves_parent(block) {
        let prev = prev.ok_or(Error::NeedsPreviousBlock)?;
        for (i, tx) in prev.transactions.iter().enumerate() {
            tx_ops(
                tx,
                TxTree::Regular,
                Some(i),
                OpStatus::Reversed,
                prev_inputs,
                params,
                &mut *apply,
            )?;
        }
    }

    for (i, tx) in block.transactions.iter().enumerate() {
        tx_ops(
            tx,
            TxTree::Regular,
            Some(i),
            OpStatus::Success,
            prev_inputs,
            params,
            &mut *apply,
        )?;
    }
    for (i, tx) in block.stake_transactions.iter().enumerate() {
        tx_ops(
            tx,
            TxTree::Stake,
            Some(i),
            OpStatus::Success,
            prev_inputs,
            params,
            &mut *apply,
        )?;
    }

    Ok(())
}

fn tx_to_rosetta_shell(tx: &Transaction) -> rosetta::Transaction {
    rosetta::Transaction {
        transaction_identifier: rosetta::TransactionIdentifier {
            hash: tx.tx_hash().to_string(),
        },
        operations: Vec::new(),
        metadata: Some(json!({
            "version": tx.version,
            "expiry": tx.expiry,
            "locktime": tx.lock_time,
        })),
    }
}

/// Full Rosetta block projection.
pub fn block_to_rosetta(
    block: &Block,
    prev: Option<&Block>,
    prev_inputs: &PrevInputs,
    params: &ChainParams,
) -> Result<rosetta::Block, Error> {
    let mut txs: Vec<rosetta::Transaction> = Vec::new();

    block_ops(block, prev, prev_inputs, params, &mut |op| {
        if op.op_index == 0 {
            // First op of a new transaction; locate its shell by hash to
            // stay robust when a tx emits no earlier ops.
            let needs_shell = txs
                .last()
                .map(|t| t.transaction_identifier.hash != op.tx_hash.to_string())
                .unwrap_or(true);
            if needs_shell {
                let shell = rosetta::Transaction {
                    transaction_identifier: rosetta::TransactionIdentifier {
                        hash: op.tx_hash.to_string(),
                    },
                    operations: Vec::new(),
                    metadata: None,
                };
                txs.push(shell);
            }
        }
        txs.last_mut()
            .expect("shell pushed above")
            .operations
            .push(op.to_rosetta());
        Ok(())
    })?;

    // Fill transaction metadata for the shells that got ops.
    let mut meta_by_hash: HashMap<String, rosetta::Transaction> = HashMap::new();
    let all_txs = block
        .transactions
        .iter()
        .chain(block.stake_transactions.iter())
        .chain(prev.map(|p| p.transactions.iter()).into_iter().flatten());
    for tx in all_txs {
        let shell = tx_to_rosetta_shell(tx);
        meta_by_hash.insert(shell.transaction_identifier.hash.clone(), shell);
    }
    for tx in txs.iter_mut() {
        if let Some(shell) = meta_by_hash.get(&tx.transaction_identifier.hash) {
            tx.metadata = shell.metadata.clone();
        }
    }

    let block_hash = block.block_hash();
    let approves_parent = block_approves_parent(block);

    // The genesis block points at itself per the Rosetta recommendation for
    // well-formed genesis identifiers.
    let (parent_height, parent_hash) = if block.header.height == 0 {
        (0, block_hash)
    } else {
        (block.header.height - 1, block.header.prev_block)
    };

    Ok(rosetta::Block {
        block_identifier: rosetta::BlockIdentifier {
            index: block.header.height as i64,
            hash: block_hash.to_string(),
        },
        parent_block_identifier: rosetta::BlockIdentifier {
            index: parent_height as i64,
            hash: parent_hash.to_string(),
        },
        timestamp: block.header.timestamp as i64 * 1000,
        transactions: txs,
        metadata: Some(json!({
            "block_version": block.header.version,
            "merkle_root": block.header.merkle_root.to_string(),
            "stake_root": block.header.stake_root.to_string(),
            "approves_parent": approves_parent,
            "vote_bits": block.header.vote_bits,
            "bits": block.header.bits,
            "sbits": block.header.sbits,
        })),
    })
}

/// Project a mempool transaction in isolation.
pub fn mempool_tx_to_rosetta(
    tx: &Transaction,
    prev_inputs: &PrevInputs,
    params: &ChainParams,
) -> Result<rosetta::Transaction, Error> {
    let tree = match stake::determine_tx_type(tx) {
        stake::TxType::Regular => TxTree::Regular,
        _ => TxTree::Stake,
    };

    let mut rtx = tx_to_rosetta_shell(tx);
    tx_ops(
        tx,
        tree,
        None,
        OpStatus::Success,
        prev_inputs,
        params,
        &mut |op| {
            rtx.operations.push(op.to_rosetta());
            Ok(())
        },
    )?;

    Ok(rtx)
}

/// Per-account balance deltas of a block, as committed to the index store.
/// Accounts whose operations cancel out exactly are omitted.
pub fn block_deltas(
    block: &Block,
    prev: Option<&Block>,
    prev_inputs: &PrevInputs,
    params: &ChainParams,
) -> Result<HashMap<String, i64>, Error> {
    let mut deltas: HashMap<String, i64> = HashMap::new();

    block_ops(block, prev, prev_inputs, params, &mut |op| {
        *deltas.entry(op.account).or_insert(0) += op.amount;
        Ok(())
    })?;

    deltas.retain(|_, delta| *delta != 0);
    Ok(deltas)
}
