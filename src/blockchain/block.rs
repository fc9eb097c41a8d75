use bitcoin::block::Header;
use bitcoin::consensus;
use bitcoin::{Block, Transaction};

use crate::blockchain::{BlockHash, Txid};
use crate::error::{FacadeError, Result};

/// A full block body together with its decoded transaction list.
///
/// Built by whichever collaborator produced the bytes (cache, repository or
/// peer network); the facade only reshapes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub block_hash: BlockHash,
    pub block_bytes: Vec<u8>,
    pub header: Header,
    pub txids: Vec<Txid>,
}

impl BlockRecord {
    pub fn from_bytes(block_bytes: Vec<u8>) -> Result<Self> {
        let block: Block = consensus::deserialize(&block_bytes)
            .map_err(|e| FacadeError::MalformedBlock(e.to_string()))?;
        Ok(Self::with_bytes(&block, block_bytes))
    }

    /// Wraps a block that was already decoded off the wire.
    pub fn from_block(block: &Block) -> Self {
        Self::with_bytes(block, consensus::serialize(block))
    }

    fn with_bytes(block: &Block, block_bytes: Vec<u8>) -> Self {
        Self {
            block_hash: block.block_hash(),
            block_bytes,
            header: block.header,
            txids: block.txdata.iter().map(Transaction::compute_txid).collect(),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.block_bytes)
    }
}

/// Computes the txid of a single serialized transaction, legacy or segwit.
pub fn transaction_id(raw: &[u8]) -> Result<Txid> {
    let tx: Transaction = consensus::deserialize(raw)
        .map_err(|e| FacadeError::MalformedBlock(format!("transaction: {}", e)))?;
    Ok(tx.compute_txid())
}
