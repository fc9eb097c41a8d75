use bitcoin::block::Header;
use bitcoin::consensus;

use crate::blockchain::BlockHash;
use crate::error::{FacadeError, Result};

/// Serialized size of a block header.
pub const HEADER_SIZE: usize = 80;

/// Decodes exactly one 80-byte header.
pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() != HEADER_SIZE {
        return Err(FacadeError::MalformedHeader(format!(
            "expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }
    consensus::deserialize(bytes).map_err(|e| FacadeError::MalformedHeader(e.to_string()))
}

/// A header as the chain state stores it.
///
/// `next_block_hash` is filled in by the store once a successor on the best
/// chain is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub block_hash: BlockHash,
    pub block_height: u32,
    pub header_bytes: Vec<u8>,
    pub next_block_hash: Option<BlockHash>,
}

impl HeaderRecord {
    pub fn decode(&self) -> Result<Header> {
        decode_header(&self.header_bytes)
    }

    pub fn header_hex(&self) -> String {
        hex::encode(&self.header_bytes)
    }
}
