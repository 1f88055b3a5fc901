//! Structural classification of stake-tree transactions.

use crate::chain::address::{OP_RETURN, OP_SSGEN, OP_SSRTX, OP_SSTX};
use crate::chain::Transaction;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TxType {
    Regular,
    Ticket,
    Vote,
    Revocation,
}

fn first_output_tagged(tx: &Transaction, tag: u8) -> bool {
    tx.outputs
        .first()
        .and_then(|out| out.pk_script.first())
        .is_some_and(|&op| op == tag)
}

/// A vote spends a synthetic stakebase input plus the ticket, publishes the
/// voted-on block and the vote bits in two data pushes, and pays out through
/// tagged outputs.
pub fn is_vote(tx: &Transaction) -> bool {
    if tx.inputs.len() != 2 || !tx.inputs[0].previous_outpoint.is_null() {
        return false;
    }
    if tx.outputs.len() < 3 {
        return false;
    }

    let block_ref = &tx.outputs[0].pk_script;
    let vote_bits = &tx.outputs[1].pk_script;
    if block_ref.first() != Some(&OP_RETURN) || vote_bits.first() != Some(&OP_RETURN) {
        return false;
    }

    tx.outputs[2..]
        .iter()
        .all(|out| out.pk_script.first() == Some(&OP_SSGEN))
}

pub fn is_ticket(tx: &Transaction) -> bool {
    first_output_tagged(tx, OP_SSTX)
}

pub fn is_revocation(tx: &Transaction) -> bool {
    first_output_tagged(tx, OP_SSRTX)
}

pub fn determine_tx_type(tx: &Transaction) -> TxType {
    if is_vote(tx) {
        TxType::Vote
    } else if is_ticket(tx) {
        TxType::Ticket
    } else if is_revocation(tx) {
        TxType::Revocation
    } else {
        TxType::Regular
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::address::{OP_DATA_1, OP_SSTXCHANGE};
    use crate::chain::{digest, OutPoint, TxIn, TxOut, TxTree};

    pub fn vote_tx() -> Transaction {
        Transaction {
            inputs: vec![
                TxIn {
                    previous_outpoint: OutPoint::null(),
                    value_in: 100,
                    ..Default::default()
                },
                TxIn {
                    previous_outpoint: OutPoint {
                        hash: digest(b"ticket"),
                        index: 0,
                        tree: TxTree::Stake,
                    },
                    value_in: 2000,
                    ..Default::default()
                },
            ],
            outputs: vec![
                TxOut {
                    value: 0,
                    version: 0,
                    pk_script: vec![OP_RETURN, OP_DATA_1, 0x00],
                },
                TxOut {
                    value: 0,
                    version: 0,
                    pk_script: vec![OP_RETURN, OP_DATA_1, 0x01],
                },
                TxOut {
                    value: 2100,
                    version: 0,
                    pk_script: vec![OP_SSGEN, 0x76],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn classifies_vote() {
        assert!(is_vote(&vote_tx()));
        assert_eq!(determine_tx_type(&vote_tx()), TxType::Vote);
    }

    #[test]
    fn vote_requires_stakebase() {
        let mut tx = vote_tx();
        tx.inputs[0].previous_outpoint = OutPoint {
            hash: digest(b"real"),
            index: 1,
            tree: TxTree::Regular,
        };
        assert!(!is_vote(&tx));
    }

    #[test]
    fn classifies_ticket_and_revocation() {
        let mut tx = Transaction::default();
        tx.outputs.push(TxOut {
            value: 2000,
            version: 0,
            pk_script: vec![OP_SSTX, 0x76],
        });
        assert_eq!(determine_tx_type(&tx), TxType::Ticket);

        tx.outputs[0].pk_script[0] = OP_SSRTX;
        assert_eq!(determine_tx_type(&tx), TxType::Revocation);

        tx.outputs[0].pk_script[0] = OP_SSTXCHANGE;
        assert_eq!(determine_tx_type(&tx), TxType::Regular);
    }
}
