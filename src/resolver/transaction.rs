//! Transaction resolution: one base answer from the registry, enriched with
//! raw bytes and, when the containing block is known, a merkle proof.

use crate::blockchain::{transaction_id, Txid};
use crate::error::{FacadeError, Result};
use crate::persistence::ChainStateAccessor;
use crate::sources::{IndexingClient, SourceRegistry};
use crate::transaction::{TransactionRecord, ENRICHMENT_SOURCE};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct TransactionResolver {
    registry: SourceRegistry,
    indexer: Arc<dyn IndexingClient>,
    repository: Arc<dyn ChainStateAccessor>,
}

impl TransactionResolver {
    pub fn new(
        registry: SourceRegistry,
        indexer: Arc<dyn IndexingClient>,
        repository: Arc<dyn ChainStateAccessor>,
    ) -> Self {
        Self {
            registry,
            indexer,
            repository,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub async fn resolve(&self, txid: &Txid, verbose: bool) -> Result<Option<TransactionRecord>> {
        let Some(mut record) = self.base_lookup(txid, verbose).await? else {
            return Ok(None);
        };
        self.enrich(txid, &mut record).await?;
        Ok(Some(record))
    }

    /// Walks a shuffled snapshot of the registry and keeps the first answer.
    async fn base_lookup(&self, txid: &Txid, verbose: bool) -> Result<Option<TransactionRecord>> {
        let sources = self.registry.shuffled();
        if sources.is_empty() {
            return Err(FacadeError::EmptyRegistry);
        }

        let mut last_error = None;
        let mut answered = false;
        for source in &sources {
            match source.get_raw_transaction(txid, verbose).await {
                Ok(Some(record)) => {
                    debug!(txid = %txid, source = source.name(), "base transaction found");
                    return Ok(Some(record));
                }
                Ok(None) => {
                    answered = true;
                    debug!(txid = %txid, source = source.name(), "source does not know transaction");
                }
                Err(e) => {
                    warn!(txid = %txid, source = source.name(), error = %e, "transaction source failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }

    async fn enrich(&self, txid: &Txid, record: &mut TransactionRecord) -> Result<()> {
        match self.indexer.get_raw_transaction(txid).await? {
            Some(raw) => {
                let computed = transaction_id(&raw)?;
                if computed != *txid {
                    return Err(FacadeError::VerificationFailure(format!(
                        "indexer returned transaction {} for {}",
                        computed, txid
                    )));
                }
                record.set_rawtx(&raw);
                record.append_source(ENRICHMENT_SOURCE);
                debug!(txid = %txid, bytes = raw.len(), "transaction enriched");
            }
            None => info!(txid = %txid, "indexer has no raw bytes for transaction"),
        }

        if let Some(blockhash) = record.blockhash {
            let header = self.repository.get_header(&blockhash)?.ok_or_else(|| {
                FacadeError::VerificationFailure(format!(
                    "containing block {} of {} is not in the header chain",
                    blockhash, txid
                ))
            })?;
            let proof = self
                .indexer
                .get_merkle_proof(txid, header.block_height)
                .await?
                .ok_or_else(|| {
                    FacadeError::VerificationFailure(format!(
                        "no merkle proof for {} at height {}",
                        txid, header.block_height
                    ))
                })?;

            if proof.block_height != header.block_height {
                return Err(FacadeError::VerificationFailure(format!(
                    "merkle proof for {} is for height {}, block {} is at {}",
                    txid, proof.block_height, blockhash, header.block_height
                )));
            }
            let merkle_root = header.decode()?.merkle_root;
            if !proof.verify(txid, header.block_height, &merkle_root) {
                return Err(FacadeError::VerificationFailure(format!(
                    "merkle proof for {} does not match block {}",
                    txid, blockhash
                )));
            }
            debug!(txid = %txid, height = header.block_height, "merkle proof verified");
        }

        Ok(())
    }
}
