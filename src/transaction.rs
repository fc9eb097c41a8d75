//! Transaction records as they travel between sources and the facade
use crate::blockchain::{BlockHash, Txid};
use crate::error::{FacadeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Provenance marker appended when the indexing client enriches a record.
pub const ENRICHMENT_SOURCE: &str = "electrum";

/// A transaction lookup result, merged across sources.
///
/// Fields a source returns beyond the ones named here are kept verbatim in
/// `extra` and serialized back flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txid: Txid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<BlockHash>,
    /// Comma separated list of the sources that contributed.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rawtx: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionRecord {
    pub fn new(txid: Txid, source: impl Into<String>) -> Self {
        Self {
            txid,
            blockhash: None,
            source: source.into(),
            rawtx: None,
            extra: Map::new(),
        }
    }

    pub fn with_blockhash(mut self, blockhash: BlockHash) -> Self {
        self.blockhash = Some(blockhash);
        self
    }

    /// Builds a record from a daemon-style verbose transaction object.
    pub fn from_verbose(txid: Txid, source: impl Into<String>, value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(FacadeError::Protocol(format!(
                "verbose transaction {} is not an object",
                txid
            )));
        };
        fields.remove("txid");
        fields.remove("source");
        let blockhash = match fields.remove("blockhash") {
            Some(Value::String(hash)) => Some(hash.parse::<BlockHash>().map_err(|e| {
                FacadeError::Protocol(format!("transaction {} blockhash: {}", txid, e))
            })?),
            _ => None,
        };
        let rawtx = match fields.remove("rawtx") {
            Some(Value::String(raw)) => Some(raw),
            _ => None,
        };

        Ok(Self {
            txid,
            blockhash,
            source: source.into(),
            rawtx,
            extra: fields,
        })
    }

    /// Records another contributing source. Appending the marker that already
    /// ends the list is a no-op.
    pub fn append_source(&mut self, marker: &str) {
        if self.source.rsplit(", ").next() == Some(marker) {
            return;
        }
        if !self.source.is_empty() {
            self.source.push_str(", ");
        }
        self.source.push_str(marker);
    }

    pub fn set_rawtx(&mut self, raw: &[u8]) {
        self.rawtx = Some(hex::encode(raw));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use serde_json::json;

    fn txid() -> Txid {
        Txid::from_byte_array([9u8; 32])
    }

    #[test]
    fn test_append_source_is_guarded() {
        let mut record = TransactionRecord::new(txid(), "bitcoind");
        record.append_source(ENRICHMENT_SOURCE);
        assert_eq!(record.source, "bitcoind, electrum");
        record.append_source(ENRICHMENT_SOURCE);
        assert_eq!(record.source, "bitcoind, electrum");

        let mut empty = TransactionRecord::new(txid(), "");
        empty.append_source(ENRICHMENT_SOURCE);
        assert_eq!(empty.source, "electrum");
    }

    #[test]
    fn test_append_matches_whole_segment_only() {
        let mut record = TransactionRecord::new(txid(), "not-electrum");
        record.append_source(ENRICHMENT_SOURCE);
        assert_eq!(record.source, "not-electrum, electrum");
    }

    #[test]
    fn test_from_verbose_keeps_unknown_fields() {
        let blockhash = BlockHash::from_byte_array([3u8; 32]);
        let value = json!({
            "txid": txid().to_string(),
            "blockhash": blockhash.to_string(),
            "confirmations": 12,
            "vout": [{"value": 0.5, "n": 0}],
        });
        let record = TransactionRecord::from_verbose(txid(), "electrum", value).unwrap();
        assert_eq!(record.blockhash, Some(blockhash));
        assert_eq!(record.extra["confirmations"], json!(12));
        assert!(record.extra.contains_key("vout"));
        assert!(!record.extra.contains_key("txid"));

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["confirmations"], json!(12));
        assert_eq!(out["source"], json!("electrum"));
        assert!(out.get("rawtx").is_none());
    }

    #[test]
    fn test_from_verbose_rejects_non_object() {
        assert!(TransactionRecord::from_verbose(txid(), "x", json!("00")).is_err());
    }
}
