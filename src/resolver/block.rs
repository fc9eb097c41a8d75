//! Block body resolution: cache, then repository, then the peer network,
//! inside a bounded retry loop.

use crate::blockchain::{BlockHash, BlockRecord, HeaderRecord};
use crate::cache::{CacheStore, BLOCK_NAMESPACE};
use crate::config::RetryConfig;
use crate::error::{FacadeError, Result};
use crate::persistence::ChainStateAccessor;
use crate::sources::PeerNetwork;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times the whole source chain is walked before giving up, and how
/// long to wait between walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Backoff plus a uniformly random share of the jitter window.
    pub fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.backoff;
        }
        let jitter_ms = self.jitter.as_millis() as u64;
        self.backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: Duration::from_millis(config.backoff_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

pub struct BlockResolver {
    repository: Arc<dyn ChainStateAccessor>,
    peers: Arc<dyn PeerNetwork>,
    cache: Option<Arc<dyn CacheStore>>,
    policy: RetryPolicy,
}

impl BlockResolver {
    pub fn new(repository: Arc<dyn ChainStateAccessor>, peers: Arc<dyn PeerNetwork>) -> Self {
        Self {
            repository,
            peers,
            cache: None,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches the body for a header the chain state already knows.
    ///
    /// Peer failures and peer misses are treated alike. Repository errors are
    /// returned as they are. Dropping the returned future stops the loop at
    /// its current await point.
    pub async fn resolve(&self, header: &HeaderRecord) -> Result<BlockRecord> {
        let hash = header.block_hash;
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            if let Some(block) = self.attempt(&hash, attempt).await? {
                return Ok(block);
            }
            if attempt < max_attempts {
                let delay = self.policy.delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        warn!(hash = %hash, attempts = max_attempts, "block body unavailable");
        Err(FacadeError::ServiceUnavailable {
            attempts: max_attempts,
        })
    }

    async fn attempt(&self, hash: &BlockHash, attempt: u32) -> Result<Option<BlockRecord>> {
        if let Some(block) = self.from_cache(hash).await {
            debug!(hash = %hash, attempt, "block served from cache");
            return Ok(Some(block));
        }

        if let Some(block) = self.repository.get_block(hash)? {
            debug!(hash = %hash, attempt, "block served from repository");
            return Ok(Some(block));
        }

        match self.peers.get_block(hash).await {
            Ok(Some(block)) if block.block_hash == *hash => {
                debug!(hash = %hash, attempt, "block fetched from peer network");
                Ok(Some(block))
            }
            Ok(Some(block)) => {
                warn!(hash = %hash, got = %block.block_hash, attempt, "peer returned a different block");
                Ok(None)
            }
            Ok(None) => {
                debug!(hash = %hash, attempt, "peer network miss");
                Ok(None)
            }
            Err(e) => {
                warn!(hash = %hash, attempt, error = %e, "peer network fetch failed");
                Ok(None)
            }
        }
    }

    async fn from_cache(&self, hash: &BlockHash) -> Option<BlockRecord> {
        let cache = self.cache.as_ref()?;
        let bytes = cache.get(BLOCK_NAMESPACE, &hash.to_string()).await?;
        match BlockRecord::from_bytes(bytes) {
            Ok(block) if block.block_hash == *hash => Some(block),
            Ok(_) => {
                warn!(hash = %hash, "cached body belongs to another block");
                None
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "cached body does not decode");
                None
            }
        }
    }
}
