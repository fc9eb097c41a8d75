// Consensus types and codecs come from the `bitcoin` crate; the submodules
// hold the record shapes the facade passes around.

pub mod block;
pub mod header;
pub mod merkle;

pub use bitcoin::{BlockHash, TxMerkleNode, Txid};
pub use block::*;
pub use header::*;
pub use merkle::*;
