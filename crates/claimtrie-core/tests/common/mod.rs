//! Chain-building helpers for scenario tests.
#![allow(dead_code)]

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Txid};

use claimtrie_core::{
    Block, BlockProcessor, ChangeSet, ClaimHash, ClaimScript, ExpirationParams, NetworkParams,
    OutputPayload, Transaction, TxOutput,
};

pub fn params() -> NetworkParams {
    NetworkParams::new(
        4032,
        32,
        ExpirationParams {
            original_window: 262_974,
            extended_window: 2_102_400,
            extended_fork_height: 400_155,
        },
    )
}

pub fn txid(n: u32) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&n.to_le_bytes());
    bytes[31] = 0xc1;
    Txid::from_byte_array(bytes)
}

/// Builds blocks on one branch and feeds them to a processor.
pub struct Harness {
    pub processor: BlockProcessor,
    /// Height of the next block to mine.
    pub next_height: u32,
    pub branch: String,
    pub blocks: Vec<Block>,
    pub change_sets: Vec<ChangeSet>,
    last_hash: String,
    pending: Vec<Transaction>,
    tx_counter: u32,
}

impl Harness {
    pub fn new(start_height: u32) -> Self {
        Self::with_params(start_height, params())
    }

    pub fn with_params(start_height: u32, params: NetworkParams) -> Self {
        Self {
            processor: BlockProcessor::in_memory(params).unwrap(),
            next_height: start_height,
            branch: "main".into(),
            blocks: vec![],
            change_sets: vec![],
            last_hash: "genesis".into(),
            pending: vec![],
            tx_counter: 0,
        }
    }

    pub fn tip(&self) -> u32 {
        self.next_height - 1
    }

    fn push_tx(&mut self, inputs: Vec<OutPoint>, outputs: Vec<TxOutput>) -> Txid {
        self.tx_counter += 1;
        let txid = txid(self.tx_counter);
        self.pending.push(Transaction { txid, inputs, outputs });
        txid
    }

    fn classified(value: u64, op: ClaimScript) -> TxOutput {
        TxOutput { value, payload: OutputPayload::Classified(op) }
    }

    /// Queue a new claim; returns its hash and output.
    pub fn claim(&mut self, name: &str, amount: u64) -> (ClaimHash, OutPoint) {
        let op = ClaimScript::ClaimName { name: name.into(), value: b"{}".to_vec() };
        let txid = self.push_tx(vec![], vec![Self::classified(amount, op)]);
        let txo = OutPoint { txid, vout: 0 };
        (ClaimHash::from_outpoint(&txo), txo)
    }

    pub fn support(&mut self, name: &str, claim_hash: ClaimHash, amount: u64) -> OutPoint {
        let op = ClaimScript::SupportClaim { name: name.into(), claim_hash };
        let txid = self.push_tx(vec![], vec![Self::classified(amount, op)]);
        OutPoint { txid, vout: 0 }
    }

    pub fn update(&mut self, name: &str, claim_hash: ClaimHash, prev: OutPoint, amount: u64) -> OutPoint {
        let op = ClaimScript::UpdateClaim { name: name.into(), claim_hash, value: b"{}".to_vec() };
        let txid = self.push_tx(vec![prev], vec![Self::classified(amount, op)]);
        OutPoint { txid, vout: 0 }
    }

    pub fn spend(&mut self, txo: OutPoint) {
        self.push_tx(vec![txo], vec![]);
    }

    /// Queue an arbitrary transaction.
    pub fn raw_tx(&mut self, inputs: Vec<OutPoint>, outputs: Vec<TxOutput>) -> Txid {
        self.push_tx(inputs, outputs)
    }

    /// Build the next block from the queued transactions without processing it.
    pub fn next_block(&mut self) -> Block {
        let height = self.next_height;
        let hash = format!("{}-{height}", self.branch);
        let block = Block {
            height,
            hash: hash.clone(),
            prev_hash: std::mem::replace(&mut self.last_hash, hash),
            transactions: std::mem::take(&mut self.pending),
        };
        self.next_height += 1;
        block
    }

    /// Process one block with everything queued so far.
    pub fn mine(&mut self) -> ChangeSet {
        let block = self.next_block();
        let change_set = self.processor.process_block(&block).unwrap();
        self.blocks.push(block);
        self.change_sets.push(change_set.clone());
        change_set
    }

    /// Mine empty blocks until the tip is `height`.
    pub fn mine_to(&mut self, height: u32) {
        while self.next_height <= height {
            self.mine();
        }
    }

    /// Forget everything above `height` on the harness side and switch to a
    /// new branch name for subsequent blocks.
    pub fn fork_at(&mut self, height: u32, branch: &str) {
        self.blocks.retain(|b| b.height <= height);
        self.change_sets.retain(|c| c.height <= height);
        self.last_hash = self
            .blocks
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| "genesis".into());
        self.next_height = height + 1;
        self.branch = branch.into();
    }

    pub fn controller(&self, name: &str) -> Option<String> {
        self.processor.resolve(&name.into())
    }

    pub fn activation_height(&self, claim_hash: &ClaimHash) -> u32 {
        self.processor
            .get_claim(claim_hash)
            .map(|c| c.activation_height)
            .unwrap()
    }
}
