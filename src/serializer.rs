//! Daemon-shaped header replies.

use crate::blockchain::{BlockHash, HeaderRecord, TxMerkleNode, Txid};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Value reported for daemon fields this service does not compute.
pub const NOT_IMPLEMENTED_YET: &str = "Not Implemented Yet";

/// Verbose header as `getblockheader` and `getblock` (verbosity 1) return it.
///
/// Field order follows the daemon's reply. `nextblockhash` is always present
/// and `null` at the tip; `confirmations` and `tx` are filled in by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerboseHeader {
    pub hash: BlockHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<i64>,
    pub height: u32,
    pub version: i32,
    #[serde(rename = "versionHex")]
    pub version_hex: String,
    pub merkleroot: TxMerkleNode,
    pub time: u32,
    pub mediantime: u32,
    pub nonce: u32,
    pub bits: u32,
    pub difficulty: String,
    pub chainwork: String,
    pub previousblockhash: BlockHash,
    pub nextblockhash: Option<BlockHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<Vec<Txid>>,
}

/// Shapes a stored header record. Fails only when the stored bytes are not a
/// valid header.
pub fn serialize_header(record: &HeaderRecord) -> Result<VerboseHeader> {
    let header = record.decode()?;
    Ok(VerboseHeader {
        hash: header.block_hash(),
        confirmations: None,
        height: record.block_height,
        version: header.version.to_consensus(),
        version_hex: NOT_IMPLEMENTED_YET.to_string(),
        merkleroot: header.merkle_root,
        time: header.time,
        // No median-time-past window is kept; the header time stands in.
        mediantime: header.time,
        nonce: header.nonce,
        bits: header.bits.to_consensus(),
        difficulty: NOT_IMPLEMENTED_YET.to_string(),
        chainwork: NOT_IMPLEMENTED_YET.to_string(),
        previousblockhash: header.prev_blockhash,
        nextblockhash: record.next_block_hash,
        tx: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FacadeError;
    use bitcoin::hashes::Hash;
    use serde_json::json;

    const GENESIS_HEADER: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

    fn genesis_record(next: Option<BlockHash>) -> HeaderRecord {
        let header_bytes = hex::decode(GENESIS_HEADER).unwrap();
        HeaderRecord {
            block_hash: crate::blockchain::decode_header(&header_bytes)
                .unwrap()
                .block_hash(),
            block_height: 0,
            header_bytes,
            next_block_hash: next,
        }
    }

    #[test]
    fn test_serialize_genesis() {
        let value = serde_json::to_value(serialize_header(&genesis_record(None)).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "hash": "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
                "height": 0,
                "version": 1,
                "versionHex": "Not Implemented Yet",
                "merkleroot": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
                "time": 1231006505,
                "mediantime": 1231006505,
                "nonce": 2083236893,
                "bits": 486604799,
                "difficulty": "Not Implemented Yet",
                "chainwork": "Not Implemented Yet",
                "previousblockhash": "0000000000000000000000000000000000000000000000000000000000000000",
                "nextblockhash": null
            })
        );
    }

    #[test]
    fn test_next_hash_is_copied_from_record() {
        let next = BlockHash::from_byte_array([0xab; 32]);
        let header = serialize_header(&genesis_record(Some(next))).unwrap();
        assert_eq!(header.nextblockhash, Some(next));
        assert_eq!(header.height, 0);
    }

    #[test]
    fn test_malformed_record() {
        let mut record = genesis_record(None);
        record.header_bytes.truncate(40);
        assert!(matches!(
            serialize_header(&record),
            Err(FacadeError::MalformedHeader(_))
        ));
    }
}
