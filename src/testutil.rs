//! Shared helpers for unit tests: deterministic accounts, block builders
//! and an in-memory upstream chain.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chain::address::{Address, OP_DATA_1, OP_RETURN, OP_SSGEN, OP_SSTX};
use crate::chain::{
    digest, Block, BlockHeader, ChainParams, Hash, OutPoint, Transaction, TxIn, TxOut, TxTree,
};
use crate::dcrd::{BestBlock, BlockchainInfo, Chain};
use crate::error::Error;
use crate::ops::{PrevInput, PrevInputs};

pub struct TestAccounts {
    addrs: Vec<Address>,
}

impl TestAccounts {
    pub fn new(params: &ChainParams) -> Self {
        let addrs = (0..6)
            .map(|i| {
                let seed = format!("test account {i}");
                Address::pubkey_hash(crate::chain::address::hash160(seed.as_bytes()), params)
            })
            .collect();
        TestAccounts { addrs }
    }

    pub fn address(&self, i: usize) -> Address {
        self.addrs[i]
    }

    pub fn account(&self, i: usize) -> String {
        self.addrs[i].encode()
    }

    pub fn script(&self, i: usize) -> Vec<u8> {
        self.addrs[i].pay_to_addr_script()
    }
}

pub fn coinbase_tx(value: i64, pk_script: &[u8]) -> Transaction {
    Transaction {
        inputs: vec![TxIn {
            previous_outpoint: OutPoint::null(),
            value_in: value,
            ..Default::default()
        }],
        outputs: vec![TxOut {
            value,
            version: 0,
            pk_script: pk_script.to_vec(),
        }],
        ..Default::default()
    }
}

/// A transfer from account `from` to account `to`. Returns the transaction
/// plus the resolved previous input backing it.
pub fn spend_tx(
    accts: &TestAccounts,
    from: usize,
    to: usize,
    out_amount: i64,
    in_amount: i64,
) -> (Transaction, PrevInputs) {
    let funding = OutPoint {
        hash: digest(format!("funding-{from}-{in_amount}").as_bytes()),
        index: 0,
        tree: TxTree::Regular,
    };

    let tx = Transaction {
        inputs: vec![TxIn {
            previous_outpoint: funding,
            sequence: 0xffff_ffff,
            value_in: in_amount,
            signature_script: vec![0x51],
            ..Default::default()
        }],
        outputs: vec![TxOut {
            value: out_amount,
            version: 0,
            pk_script: accts.script(to),
        }],
        ..Default::default()
    };

    let mut prev_inputs = PrevInputs::new();
    prev_inputs.insert(
        funding,
        PrevInput {
            pk_script: accts.script(from),
            version: 0,
            amount: in_amount,
        },
    );

    (tx, prev_inputs)
}

/// A structurally valid vote spending a ticket of `ticket_value` and paying
/// out `ticket_value + reward` to account 0.
pub fn vote_for(accts: &TestAccounts, ticket_value: i64, reward: i64) -> (Transaction, PrevInputs) {
    let ticket = OutPoint {
        hash: digest(b"ticket-funding"),
        index: 0,
        tree: TxTree::Stake,
    };

    let mut payout = vec![OP_SSGEN];
    payout.extend_from_slice(&accts.script(0));

    let tx = Transaction {
        inputs: vec![
            TxIn {
                previous_outpoint: OutPoint::null(),
                value_in: reward,
                ..Default::default()
            },
            TxIn {
                previous_outpoint: ticket,
                value_in: ticket_value,
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
                value: ticket_value + reward,
                version: 0,
                pk_script: payout,
            },
        ],
        ..Default::default()
    };

    let mut ticket_script = vec![OP_SSTX];
    ticket_script.extend_from_slice(&accts.script(0));

    let mut prev_inputs = PrevInputs::new();
    prev_inputs.insert(
        ticket,
        PrevInput {
            pk_script: ticket_script,
            version: 0,
            amount: ticket_value,
        },
    );

    (tx, prev_inputs)
}

pub fn test_block(
    height: u32,
    prev_hash: Hash,
    transactions: Vec<Transaction>,
    stake_transactions: Vec<Transaction>,
) -> Block {
    let mut tx_hashes = Vec::new();
    for tx in transactions.iter().chain(stake_transactions.iter()) {
        tx_hashes.extend_from_slice(tx.tx_hash().as_bytes());
    }

    Block {
        header: BlockHeader {
            height,
            prev_block: prev_hash,
            merkle_root: digest(&tx_hashes),
            vote_bits: 0x0001,
            timestamp: 1_600_000_000 + height,
            ..Default::default()
        },
        transactions,
        stake_transactions,
    }
}

#[derive(Default)]
struct MockState {
    blocks_by_hash: HashMap<Hash, Block>,
    main_chain: BTreeMap<u64, Hash>,
    txs: HashMap<Hash, Transaction>,
    mempool: Vec<Hash>,
    submitted: Vec<Transaction>,
}

/// In-memory stand-in for a dcrd node. Blocks stay fetchable by hash after
/// being reorged off the main chain, like a real node keeps stale blocks.
pub struct MockChain {
    chain_name: &'static str,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_name: &'static str) -> Self {
        MockChain {
            chain_name,
            state: Mutex::new(MockState::default()),
        }
    }

    fn register_block(state: &mut MockState, block: &Block) {
        for tx in block
            .transactions
            .iter()
            .chain(block.stake_transactions.iter())
        {
            state.txs.insert(tx.tx_hash(), tx.clone());
        }
        state.blocks_by_hash.insert(block.block_hash(), block.clone());
    }

    /// Append blocks to the main chain.
    pub fn extend_main(&self, blocks: Vec<Block>) {
        let mut state = self.state.lock().expect("mock lock");
        for block in blocks {
            Self::register_block(&mut state, &block);
            state
                .main_chain
                .insert(block.header.height as u64, block.block_hash());
        }
    }

    /// Replace the main chain from `from_height` upward with `blocks`.
    pub fn reorg_main(&self, from_height: u64, blocks: Vec<Block>) {
        {
            let mut state = self.state.lock().expect("mock lock");
            state.main_chain.split_off(&from_height);
        }
        self.extend_main(blocks);
    }

    /// Make the outpoints of a resolved input map fetchable through
    /// `getrawtransaction`, as if their funding transactions were known to
    /// the node.
    pub fn register_prev_inputs(&self, prev_inputs: &PrevInputs) {
        let mut state = self.state.lock().expect("mock lock");
        for (outpoint, prev) in prev_inputs {
            let tx = state.txs.entry(outpoint.hash).or_default();
            while tx.outputs.len() <= outpoint.index as usize {
                tx.outputs.push(TxOut::default());
            }
            tx.outputs[outpoint.index as usize] = TxOut {
                value: prev.amount,
                version: prev.version,
                pk_script: prev.pk_script.clone(),
            };
        }
    }

    pub fn set_mempool(&self, hashes: Vec<Hash>) {
        self.state.lock().expect("mock lock").mempool = hashes;
    }

    pub fn register_tx(&self, tx: Transaction) {
        let mut state = self.state.lock().expect("mock lock");
        state.txs.insert(tx.tx_hash(), tx);
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.state.lock().expect("mock lock").submitted.clone()
    }
}

fn not_found(what: &str) -> Error {
    Error::Rpc(format!("{what}: not found (-5)"))
}

#[async_trait]
impl Chain for MockChain {
    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, Error> {
        let state = self.state.lock().expect("mock lock");
        let blocks = state.main_chain.keys().next_back().copied().unwrap_or(0);
        Ok(BlockchainInfo {
            chain: self.chain_name.to_string(),
            blocks,
            sync_height: blocks,
            initial_block_download: false,
        })
    }

    async fn version(&self) -> Result<(u32, u32), Error> {
        Ok((6, 2))
    }

    async fn get_best_block(&self) -> Result<BestBlock, Error> {
        let state = self.state.lock().expect("mock lock");
        let (height, hash) = state
            .main_chain
            .iter()
            .next_back()
            .ok_or_else(|| not_found("best block"))?;
        Ok(BestBlock {
            hash: *hash,
            height: *height,
        })
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash, Error> {
        let state = self.state.lock().expect("mock lock");
        state
            .main_chain
            .get(&height)
            .copied()
            .ok_or_else(|| not_found("block hash"))
    }

    async fn get_block_header(&self, hash: &Hash) -> Result<BlockHeader, Error> {
        let state = self.state.lock().expect("mock lock");
        state
            .blocks_by_hash
            .get(hash)
            .map(|b| b.header.clone())
            .ok_or_else(|| not_found("block header"))
    }

    async fn get_block(&self, hash: &Hash) -> Result<Block, Error> {
        let state = self.state.lock().expect("mock lock");
        state
            .blocks_by_hash
            .get(hash)
            .cloned()
            .ok_or_else(|| not_found("block"))
    }

    async fn get_raw_transaction(&self, hash: &Hash) -> Result<Transaction, Error> {
        let state = self.state.lock().expect("mock lock");
        state
            .txs
            .get(hash)
            .cloned()
            .ok_or_else(|| not_found("transaction"))
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>, Error> {
        Ok(self.state.lock().expect("mock lock").mempool.clone())
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Hash, Error> {
        let mut state = self.state.lock().expect("mock lock");
        let hash = tx.tx_hash();
        state.submitted.push(tx.clone());
        state.txs.insert(hash, tx.clone());
        Ok(hash)
    }
}
