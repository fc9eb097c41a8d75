//! Collaborator contracts and the transaction source registry.

use crate::blockchain::{BlockHash, BlockRecord, MerkleProof, Txid};
use crate::error::Result;
use crate::transaction::TransactionRecord;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A registry member able to look a transaction up by id.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Provenance label recorded on records this source produces.
    fn name(&self) -> &str;

    async fn get_raw_transaction(
        &self,
        txid: &Txid,
        verbose: bool,
    ) -> Result<Option<TransactionRecord>>;
}

/// Block relay over the peer-to-peer network.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    async fn get_block(&self, hash: &BlockHash) -> Result<Option<BlockRecord>>;
}

/// Indexing-protocol server used for enrichment and fee estimates.
#[async_trait]
pub trait IndexingClient: Send + Sync {
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Option<Vec<u8>>>;
    async fn get_merkle_proof(&self, txid: &Txid, height: u32) -> Result<Option<MerkleProof>>;
    async fn estimate_fee(&self, blocks: u32) -> Result<f64>;
    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<UnspentOutput>>;
}

/// One entry of a `listunspent` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub tx_hash: Txid,
    pub tx_pos: u32,
    pub height: i64,
    pub value: u64,
}

/// Shared, append-only list of transaction sources.
///
/// Readers never hold the lock across an await: each lookup works on a
/// snapshot of the handles taken at call time.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Arc<RwLock<Vec<Arc<dyn TransactionSource>>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&self, source: Arc<dyn TransactionSource>) {
        self.sources.write().push(source);
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn TransactionSource>> {
        self.sources.read().clone()
    }

    /// Snapshot in uniformly random order.
    pub fn shuffled(&self) -> Vec<Arc<dyn TransactionSource>> {
        let mut sources = self.snapshot();
        sources.shuffle(&mut rand::thread_rng());
        sources
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }
}
