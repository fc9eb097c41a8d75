#![allow(dead_code)]
//! Shared fixtures: a synthetic header chain with real block bodies and
//! in-memory stand-ins for the network collaborators.

use async_trait::async_trait;
use bitcoin::block::{Header, Version};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{consensus, CompactTarget};
use chainfacade::blockchain::{
    merkle_root, transaction_id, BlockHash, BlockRecord, MerkleProof, Txid,
};
use chainfacade::error::{FacadeError, Result};
use chainfacade::persistence::InMemoryRepository;
use chainfacade::sources::{IndexingClient, PeerNetwork, TransactionSource, UnspentOutput};
use chainfacade::transaction::TransactionRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub struct SyntheticChain {
    pub headers: Vec<Vec<u8>>,
    pub hashes: Vec<BlockHash>,
    pub blocks: Vec<Vec<u8>>,
    pub txids: Vec<Vec<Txid>>,
    pub raw_txs: Vec<Vec<Vec<u8>>>,
}

impl SyntheticChain {
    pub fn tip(&self) -> u32 {
        (self.hashes.len() - 1) as u32
    }

    /// Repository holding every header and the bodies for heights `0..=bodies_up_to`.
    pub fn repository(&self, bodies_up_to: Option<u32>) -> Arc<InMemoryRepository> {
        let repository = InMemoryRepository::new();
        for (height, header) in self.headers.iter().enumerate() {
            repository.insert_header(height as u32, header.clone()).unwrap();
        }
        if let Some(last) = bodies_up_to {
            for block in &self.blocks[..=last as usize] {
                repository.insert_block(block.clone()).unwrap();
            }
        }
        Arc::new(repository)
    }

    pub fn proof(&self, height: u32, pos: usize) -> MerkleProof {
        MerkleProof::build(&self.txids[height as usize], pos, height).unwrap()
    }
}

fn coinbase_tx(height: u32) -> Vec<u8> {
    let mut tx = Vec::new();
    tx.extend_from_slice(&1u32.to_le_bytes());
    tx.push(1);
    tx.extend_from_slice(&[0u8; 32]);
    tx.extend_from_slice(&u32::MAX.to_le_bytes());
    tx.push(5);
    tx.push(4);
    tx.extend_from_slice(&height.to_le_bytes());
    tx.extend_from_slice(&u32::MAX.to_le_bytes());
    tx.push(1);
    tx.extend_from_slice(&5_000_000_000u64.to_le_bytes());
    tx.extend_from_slice(&[1, 0x51]);
    tx.extend_from_slice(&0u32.to_le_bytes());
    tx
}

fn segwit_tx(height: u32) -> Vec<u8> {
    let mut tx = Vec::new();
    tx.extend_from_slice(&2u32.to_le_bytes());
    tx.extend_from_slice(&[0x00, 0x01]);
    tx.push(1);
    tx.extend_from_slice(sha256d::Hash::hash(&height.to_le_bytes()).as_byte_array());
    tx.extend_from_slice(&0u32.to_le_bytes());
    tx.push(0);
    tx.extend_from_slice(&0xffff_fffdu32.to_le_bytes());
    tx.push(1);
    tx.extend_from_slice(&(1_000 + u64::from(height)).to_le_bytes());
    tx.extend_from_slice(&[22, 0x00, 0x14]);
    tx.extend_from_slice(&[height as u8; 20]);
    tx.push(2);
    tx.push(71);
    tx.extend_from_slice(&[0x30; 71]);
    tx.push(33);
    tx.extend_from_slice(&[0x02; 33]);
    tx.extend_from_slice(&0u32.to_le_bytes());
    tx
}

/// Builds heights `0..=tip`, each block holding a coinbase and one segwit spend.
pub fn build_chain(tip: u32) -> SyntheticChain {
    let mut chain = SyntheticChain {
        headers: Vec::new(),
        hashes: Vec::new(),
        blocks: Vec::new(),
        txids: Vec::new(),
        raw_txs: Vec::new(),
    };

    let mut prev = BlockHash::all_zeros();
    for height in 0..=tip {
        let raw = vec![coinbase_tx(height), segwit_tx(height)];
        let txids: Vec<Txid> = raw.iter().map(|tx| transaction_id(tx).unwrap()).collect();
        let header = Header {
            version: Version::from_consensus(0x2000_0000),
            prev_blockhash: prev,
            merkle_root: merkle_root(&txids).unwrap(),
            time: 1_600_000_000 + 600 * height,
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce: height,
        };
        let header_bytes = consensus::serialize(&header);

        let mut block = header_bytes.clone();
        block.push(raw.len() as u8);
        for tx in &raw {
            block.extend_from_slice(tx);
        }

        prev = header.block_hash();
        chain.hashes.push(prev);
        chain.headers.push(header_bytes);
        chain.blocks.push(block);
        chain.txids.push(txids);
        chain.raw_txs.push(raw);
    }
    chain
}

/// Peer network serving a fixed set of bodies.
pub struct MockPeers {
    blocks: HashMap<BlockHash, Vec<u8>>,
    calls: AtomicU32,
    answer_from_call: u32,
    failing: bool,
}

impl MockPeers {
    pub fn serving(chain: &SyntheticChain, heights: std::ops::RangeInclusive<u32>) -> Self {
        let blocks = heights
            .map(|h| (chain.hashes[h as usize], chain.blocks[h as usize].clone()))
            .collect();
        Self {
            blocks,
            calls: AtomicU32::new(0),
            answer_from_call: 1,
            failing: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            blocks: HashMap::new(),
            calls: AtomicU32::new(0),
            answer_from_call: 1,
            failing: false,
        }
    }

    /// Misses every call before the `n`th.
    pub fn answering_from_call(mut self, n: u32) -> Self {
        self.answer_from_call = n;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerNetwork for MockPeers {
    async fn get_block(&self, hash: &BlockHash) -> Result<Option<BlockRecord>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing {
            return Err(FacadeError::Transport("peer unreachable".into()));
        }
        if call < self.answer_from_call {
            return Ok(None);
        }
        self.blocks
            .get(hash)
            .cloned()
            .map(BlockRecord::from_bytes)
            .transpose()
    }
}

/// Registry source answering from a fixed map.
pub struct MockSource {
    name: String,
    records: HashMap<Txid, TransactionRecord>,
    failing: bool,
    calls: AtomicU32,
}

impl MockSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: HashMap::new(),
            failing: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_record(mut self, record: TransactionRecord) -> Self {
        self.records.insert(record.txid, record);
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_raw_transaction(
        &self,
        txid: &Txid,
        _verbose: bool,
    ) -> Result<Option<TransactionRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(FacadeError::Transport(format!("{} is down", self.name)));
        }
        Ok(self.records.get(txid).cloned())
    }
}

#[derive(Default)]
pub struct MockIndexer {
    raw: HashMap<Txid, Vec<u8>>,
    proofs: HashMap<Txid, MerkleProof>,
    fee: f64,
}

impl MockIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(mut self, txid: Txid, raw: Vec<u8>) -> Self {
        self.raw.insert(txid, raw);
        self
    }

    pub fn with_proof(mut self, txid: Txid, proof: MerkleProof) -> Self {
        self.proofs.insert(txid, proof);
        self
    }

    pub fn with_fee(mut self, fee: f64) -> Self {
        self.fee = fee;
        self
    }
}

#[async_trait]
impl IndexingClient for MockIndexer {
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Option<Vec<u8>>> {
        Ok(self.raw.get(txid).cloned())
    }

    // Answers with whatever proof it holds, whatever height was asked for.
    async fn get_merkle_proof(&self, txid: &Txid, _height: u32) -> Result<Option<MerkleProof>> {
        Ok(self.proofs.get(txid).cloned())
    }

    async fn estimate_fee(&self, _blocks: u32) -> Result<f64> {
        Ok(self.fee)
    }

    async fn list_unspent(&self, _script_hash: &str) -> Result<Vec<UnspentOutput>> {
        Ok(Vec::new())
    }
}
