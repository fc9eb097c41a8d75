//! The query facade: daemon-compatible read operations composed from the
//! chain state, the resolvers and the header serializer.
//!
//! Every operation returns `Ok(None)` when the chain state does not know the
//! requested identifier. Collaborator failures surface as [`FacadeError`].

use crate::blockchain::{BlockHash, Txid};
use crate::cache::CacheStore;
use crate::config::ServiceConfig;
use crate::error::{FacadeError, Result};
use crate::persistence::ChainStateAccessor;
use crate::resolver::{BlockResolver, RetryPolicy, TransactionResolver};
use crate::serializer::{serialize_header, VerboseHeader};
use crate::sources::{IndexingClient, PeerNetwork, SourceRegistry, TransactionSource};
use crate::transaction::TransactionRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// `getblock` verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVerbosity {
    /// Hex of the serialized block.
    Raw = 0,
    /// Verbose header plus the transaction id list.
    Header = 1,
    /// Decoded transactions; not supported.
    Transactions = 2,
}

impl TryFrom<u8> for BlockVerbosity {
    type Error = FacadeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Raw),
            1 => Ok(Self::Header),
            2 => Ok(Self::Transactions),
            other => Err(FacadeError::InvalidParameter(format!(
                "verbosity must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GetBlock {
    Raw(String),
    Verbose(Box<VerboseHeader>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GetBlockHeader {
    Compact(String),
    Verbose(Box<VerboseHeader>),
}

/// `getblockchaininfo` reply. `difficulty` and `chainwork` are always null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub warning: String,
    pub blocks: u32,
    pub headers: u32,
    pub bestblockhash: BlockHash,
    pub difficulty: Option<f64>,
    pub chainwork: Option<String>,
    pub mediantime: u32,
    pub verificationprogress: u32,
    pub pruned: bool,
}

/// Static identity reported by `getblockchaininfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub chain: String,
    pub version: String,
    pub emulated_daemon_version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        ServiceInfo::from(&ServiceConfig::default())
    }
}

impl From<&ServiceConfig> for ServiceInfo {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            chain: config.chain.clone(),
            version: config.version.clone(),
            emulated_daemon_version: config.emulated_daemon_version.clone(),
        }
    }
}

impl ServiceInfo {
    pub fn warning(&self) -> String {
        format!(
            "chainfacade v{}. emulating bitcoind v{}",
            self.version, self.emulated_daemon_version
        )
    }
}

pub struct QueryFacade {
    repository: Arc<dyn ChainStateAccessor>,
    indexer: Arc<dyn IndexingClient>,
    blocks: BlockResolver,
    transactions: TransactionResolver,
    service: ServiceInfo,
}

impl QueryFacade {
    pub fn new(
        repository: Arc<dyn ChainStateAccessor>,
        peers: Arc<dyn PeerNetwork>,
        indexer: Arc<dyn IndexingClient>,
    ) -> Self {
        Self {
            blocks: BlockResolver::new(repository.clone(), peers),
            transactions: TransactionResolver::new(
                SourceRegistry::new(),
                indexer.clone(),
                repository.clone(),
            ),
            repository,
            indexer,
            service: ServiceInfo::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.blocks = self.blocks.with_policy(policy);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.blocks = self.blocks.with_cache(cache);
        self
    }

    pub fn with_service_info(mut self, service: ServiceInfo) -> Self {
        self.service = service;
        self
    }

    /// Registers a transaction source. Safe to call while queries run.
    pub fn add_source(&self, source: Arc<dyn TransactionSource>) {
        self.transactions.registry().add_source(source);
    }

    pub fn registry(&self) -> &SourceRegistry {
        self.transactions.registry()
    }

    fn best_height(&self) -> Result<Option<u32>> {
        Ok(self.repository.get_best_header()?.map(|h| h.block_height))
    }

    pub async fn get_block(
        &self,
        hash: &BlockHash,
        verbosity: BlockVerbosity,
    ) -> Result<Option<GetBlock>> {
        let Some(header) = self.repository.get_header(hash)? else {
            debug!(hash = %hash, "getblock for unknown header");
            return Ok(None);
        };
        if verbosity == BlockVerbosity::Transactions {
            return Err(FacadeError::NotImplemented("getblock verbosity 2"));
        }

        let block = self.blocks.resolve(&header).await?;
        match verbosity {
            BlockVerbosity::Raw => Ok(Some(GetBlock::Raw(block.to_hex()))),
            _ => {
                let best = self.best_height()?.unwrap_or(header.block_height);
                let mut reply = serialize_header(&header)?;
                reply.confirmations = Some(i64::from(best) - i64::from(header.block_height));
                reply.tx = Some(block.txids);
                Ok(Some(GetBlock::Verbose(Box::new(reply))))
            }
        }
    }

    pub async fn get_block_header(
        &self,
        hash: &BlockHash,
        verbose: bool,
    ) -> Result<Option<GetBlockHeader>> {
        let Some(header) = self.repository.get_header(hash)? else {
            return Ok(None);
        };
        if !verbose {
            return Ok(Some(GetBlockHeader::Compact(header.header_hex())));
        }

        let best = self.best_height()?.unwrap_or(header.block_height);
        let mut reply = serialize_header(&header)?;
        // Counts the block itself, unlike getblock.
        reply.confirmations = Some(i64::from(best) - i64::from(header.block_height) + 1);
        Ok(Some(GetBlockHeader::Verbose(Box::new(reply))))
    }

    pub async fn get_best_block_header(&self, verbose: bool) -> Result<Option<GetBlockHeader>> {
        match self.repository.get_best_header()? {
            Some(best) => self.get_block_header(&best.block_hash, verbose).await,
            None => Ok(None),
        }
    }

    pub async fn get_block_count(&self) -> Result<Option<u32>> {
        self.best_height()
    }

    pub async fn get_block_hash(&self, height: u32) -> Result<Option<BlockHash>> {
        self.repository.get_block_hash(height)
    }

    pub async fn get_best_block_hash(&self) -> Result<Option<BlockHash>> {
        Ok(self.repository.get_best_header()?.map(|h| h.block_hash))
    }

    pub async fn get_blockchain_info(&self) -> Result<Option<BlockchainInfo>> {
        let Some(best) = self.repository.get_best_header()? else {
            return Ok(None);
        };
        let header = best.decode()?;
        Ok(Some(BlockchainInfo {
            chain: self.service.chain.clone(),
            warning: self.service.warning(),
            blocks: best.block_height,
            headers: best.block_height,
            bestblockhash: best.block_hash,
            difficulty: None,
            chainwork: None,
            mediantime: header.time,
            verificationprogress: 0,
            pruned: false,
        }))
    }

    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64> {
        self.indexer.estimate_fee(blocks).await
    }

    pub async fn get_raw_transaction(
        &self,
        txid: &Txid,
        verbose: bool,
    ) -> Result<Option<TransactionRecord>> {
        self.transactions.resolve(txid, verbose).await
    }
}
