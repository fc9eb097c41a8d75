//! Caching layer for block bodies and merged transaction records
//!
//! Provides:
//! - a namespaced byte cache (`CacheStore`) the Block Resolver reads first
//! - `TransactionCache`, the decorator that owns the write path around
//!   `getrawtransaction`
//! - `CachingPeerNetwork`, which stores peer-fetched block bodies
use crate::blockchain::{BlockHash, BlockRecord, Txid};
use crate::error::Result;
use crate::sources::PeerNetwork;
use crate::transaction::TransactionRecord;
use async_trait::async_trait;
use lru::LruCache;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const BLOCK_NAMESPACE: &str = "block";
pub const TRANSACTION_NAMESPACE: &str = "transaction";

/// Namespaced key/value cache consulted before any network path.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>>;
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>);
}

/// Generic, thread-safe LRU wrapper using RwLock.
pub struct ThreadSafeCache<K, V> {
    cache: Arc<RwLock<LruCache<K, V>>>,
}

impl<K, V> ThreadSafeCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new LRU cache with specified capacity.
    pub fn new_lru(capacity: usize) -> Self {
        // Zero capacity maps to one entry.
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity_nz))),
        }
    }

    /// Get a value from cache. Reads peek so they never reorder entries.
    pub async fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let cache = self.cache.read().await;
        cache.peek(key).cloned()
    }

    pub async fn put(&self, key: K, value: V) {
        let mut cache = self.cache.write().await;
        cache.put(key, value);
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    pub async fn capacity(&self) -> usize {
        self.cache.read().await.cap().get()
    }
}

impl<K, V> Clone for ThreadSafeCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

/// In-process `CacheStore` keyed by `"{namespace}:{key}"`.
#[derive(Clone)]
pub struct LruCacheStore {
    entries: ThreadSafeCache<String, Vec<u8>>,
}

impl LruCacheStore {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: ThreadSafeCache::new_lru(capacity),
        }
    }

    fn key(namespace: &str, key: &str) -> String {
        format!("{}:{}", namespace, key)
    }

    pub async fn stats(&self) -> (usize, usize) {
        (self.entries.len().await, self.entries.capacity().await)
    }
}

impl Default for LruCacheStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CacheStore for LruCacheStore {
    async fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.entries.get(Self::key(namespace, key).as_str()).await
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) {
        self.entries.put(Self::key(namespace, key), value).await;
    }
}

/// Read-through cache around transaction resolution.
///
/// Only successful lookups are stored; absent answers and errors go
/// straight back to the caller.
#[derive(Clone)]
pub struct TransactionCache {
    store: Arc<dyn CacheStore>,
}

impl TransactionCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    fn key(txid: &Txid, verbose: bool) -> String {
        format!("{}:{}", txid, verbose)
    }

    pub async fn get_or_resolve<F, Fut>(
        &self,
        txid: &Txid,
        verbose: bool,
        resolve: F,
    ) -> Result<Option<TransactionRecord>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<TransactionRecord>>>,
    {
        let key = Self::key(txid, verbose);
        if let Some(bytes) = self.store.get(TRANSACTION_NAMESPACE, &key).await {
            match serde_json::from_slice::<TransactionRecord>(&bytes) {
                Ok(record) => {
                    debug!(txid = %txid, "transaction cache hit");
                    return Ok(Some(record));
                }
                Err(e) => warn!(txid = %txid, error = %e, "discarding unreadable cache entry"),
            }
        }

        let resolved = resolve().await?;
        if let Some(record) = &resolved {
            let bytes = serde_json::to_vec(record)?;
            self.store.put(TRANSACTION_NAMESPACE, &key, bytes).await;
        }
        Ok(resolved)
    }
}

/// Peer network wrapper that writes every body it fetches under
/// `BLOCK_NAMESPACE`, keyed by block hash.
pub struct CachingPeerNetwork {
    inner: Arc<dyn PeerNetwork>,
    store: Arc<dyn CacheStore>,
}

impl CachingPeerNetwork {
    pub fn new(inner: Arc<dyn PeerNetwork>, store: Arc<dyn CacheStore>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl PeerNetwork for CachingPeerNetwork {
    async fn get_block(&self, hash: &BlockHash) -> Result<Option<BlockRecord>> {
        let block = self.inner.get_block(hash).await?;
        match &block {
            Some(block) if block.block_hash == *hash => {
                self.store
                    .put(BLOCK_NAMESPACE, &hash.to_string(), block.block_bytes.clone())
                    .await;
                debug!(hash = %hash, bytes = block.block_bytes.len(), "peer block cached");
            }
            Some(block) => {
                debug!(hash = %hash, got = %block.block_hash, "not caching unrequested block")
            }
            None => {}
        }
        Ok(block)
    }
}
