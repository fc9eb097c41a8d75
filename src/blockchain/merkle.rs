//! Merkle roots and inclusion proofs over transaction ids.

use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::merkle_tree;
use serde::{Deserialize, Serialize};

use crate::blockchain::{TxMerkleNode, Txid};

fn hash_pair(left: &TxMerkleNode, right: &TxMerkleNode) -> TxMerkleNode {
    let mut engine = TxMerkleNode::engine();
    engine.input(left.as_byte_array());
    engine.input(right.as_byte_array());
    TxMerkleNode::from_engine(engine)
}

fn leaves(txids: &[Txid]) -> Vec<TxMerkleNode> {
    txids
        .iter()
        .map(|txid| TxMerkleNode::from_raw_hash(txid.to_raw_hash()))
        .collect()
}

// An odd node at any level is paired with itself.
fn next_level(level: &[TxMerkleNode]) -> Vec<TxMerkleNode> {
    level
        .chunks(2)
        .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

/// Merkle root of a block's transaction list, `None` for an empty list.
pub fn merkle_root(txids: &[Txid]) -> Option<TxMerkleNode> {
    merkle_tree::calculate_root(leaves(txids).into_iter())
}

/// An inclusion proof in the shape indexing servers return it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub block_height: u32,
    pub merkle: Vec<TxMerkleNode>,
    pub pos: u32,
}

impl MerkleProof {
    /// Builds the proof for the transaction at `pos`.
    pub fn build(txids: &[Txid], pos: usize, block_height: u32) -> Option<Self> {
        if pos >= txids.len() {
            return None;
        }
        let mut level = leaves(txids);
        let mut index = pos;
        let mut branch = Vec::new();
        while level.len() > 1 {
            branch.push(*level.get(index ^ 1).unwrap_or(&level[index]));
            level = next_level(&level);
            index >>= 1;
        }
        Some(Self {
            block_height,
            merkle: branch,
            pos: pos as u32,
        })
    }

    /// Folds the branch starting from `txid`.
    pub fn root_for(&self, txid: &Txid) -> TxMerkleNode {
        let mut acc = TxMerkleNode::from_raw_hash(txid.to_raw_hash());
        let mut index = self.pos;
        for node in &self.merkle {
            acc = if index & 1 == 1 {
                hash_pair(node, &acc)
            } else {
                hash_pair(&acc, node)
            };
            index >>= 1;
        }
        acc
    }

    /// True when the proof is labelled with `height` and folds to `expected_root`.
    pub fn verify(&self, txid: &Txid, height: u32, expected_root: &TxMerkleNode) -> bool {
        self.block_height == height && self.root_for(txid) == *expected_root
    }
}
