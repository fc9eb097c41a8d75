//! Header and block repositories the facade reads chain state from.
//!
//! The repository owns the notion of "best chain"; the facade only queries
//! it. Writers (the header syncer) use `save_header`/`save_block`.

use crate::blockchain::{decode_header, BlockHash, BlockRecord, HeaderRecord};
use crate::error::{FacadeError, Result};
use bitcoin::hashes::Hash;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};

/// Read access to the local header chain and any block bodies stored with it.
///
/// All calls are local and must not touch the network.
pub trait ChainStateAccessor: Send + Sync {
    fn get_best_header(&self) -> Result<Option<HeaderRecord>>;
    fn get_header(&self, hash: &BlockHash) -> Result<Option<HeaderRecord>>;
    fn get_block_hash(&self, height: u32) -> Result<Option<BlockHash>>;
    fn get_block(&self, hash: &BlockHash) -> Result<Option<BlockRecord>>;
}

fn hash_from_blob(blob: &[u8]) -> Result<BlockHash> {
    let bytes: [u8; 32] = blob
        .try_into()
        .map_err(|_| FacadeError::Database(format!("stored hash has {} bytes", blob.len())))?;
    Ok(BlockHash::from_byte_array(bytes))
}

fn height_from_sql(height: i64) -> Result<u32> {
    u32::try_from(height)
        .map_err(|_| FacadeError::Database(format!("stored height {} out of range", height)))
}

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| FacadeError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS headers (
                height INTEGER PRIMARY KEY,
                hash BLOB NOT NULL UNIQUE,
                header_bytes BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| FacadeError::Database(format!("Failed to create headers table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash BLOB PRIMARY KEY,
                block_bytes BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| FacadeError::Database(format!("Failed to create blocks table: {}", e)))?;

        Ok(SqliteRepository {
            conn: Mutex::new(conn),
        })
    }

    /// Stores a header at `height`, replacing whatever the best chain had there.
    pub fn save_header(&self, height: u32, header_bytes: &[u8]) -> Result<BlockHash> {
        let hash = decode_header(header_bytes)?.block_hash();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO headers (height, hash, header_bytes) VALUES (?1, ?2, ?3)",
            params![i64::from(height), hash.to_byte_array().to_vec(), header_bytes],
        )
        .map_err(|e| FacadeError::Database(format!("Failed to save header: {}", e)))?;
        Ok(hash)
    }

    pub fn save_block(&self, block: &BlockRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO blocks (hash, block_bytes) VALUES (?1, ?2)",
            params![block.block_hash.to_byte_array().to_vec(), block.block_bytes],
        )
        .map_err(|e| FacadeError::Database(format!("Failed to save block: {}", e)))?;
        Ok(())
    }

    fn header_row(conn: &Connection, sql: &str, key: rusqlite::types::Value) -> Result<Option<HeaderRecord>> {
        let row = conn
            .query_row(sql, [key], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .optional()?;

        let Some((height, hash, header_bytes)) = row else {
            return Ok(None);
        };
        let block_height = height_from_sql(height)?;
        let block_hash = hash_from_blob(&hash)?;
        let next_block_hash = Self::successor_of(conn, block_height, &block_hash)?;

        Ok(Some(HeaderRecord {
            block_hash,
            block_height,
            header_bytes,
            next_block_hash,
        }))
    }

    // The successor is whatever sits one height above and links back to us.
    fn successor_of(conn: &Connection, height: u32, hash: &BlockHash) -> Result<Option<BlockHash>> {
        let next = conn
            .query_row(
                "SELECT hash, header_bytes FROM headers WHERE height = ?1",
                params![i64::from(height) + 1],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;

        match next {
            Some((next_hash, next_bytes)) => {
                let header = decode_header(&next_bytes)?;
                if header.prev_blockhash == *hash {
                    Ok(Some(hash_from_blob(&next_hash)?))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }
}

impl ChainStateAccessor for SqliteRepository {
    fn get_best_header(&self) -> Result<Option<HeaderRecord>> {
        let conn = self.conn.lock();
        let best: Option<i64> = conn
            .query_row("SELECT MAX(height) FROM headers", [], |row| row.get(0))?;
        match best {
            Some(height) => Self::header_row(
                &conn,
                "SELECT height, hash, header_bytes FROM headers WHERE height = ?1",
                rusqlite::types::Value::Integer(height),
            ),
            None => Ok(None),
        }
    }

    fn get_header(&self, hash: &BlockHash) -> Result<Option<HeaderRecord>> {
        let conn = self.conn.lock();
        Self::header_row(
            &conn,
            "SELECT height, hash, header_bytes FROM headers WHERE hash = ?1",
            rusqlite::types::Value::Blob(hash.to_byte_array().to_vec()),
        )
    }

    fn get_block_hash(&self, height: u32) -> Result<Option<BlockHash>> {
        let conn = self.conn.lock();
        let hash: Option<Vec<u8>> = conn
            .query_row(
                "SELECT hash FROM headers WHERE height = ?1",
                params![i64::from(height)],
                |row| row.get(0),
            )
            .optional()?;
        hash.map(|blob| hash_from_blob(&blob)).transpose()
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Option<BlockRecord>> {
        let conn = self.conn.lock();
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT block_bytes FROM blocks WHERE hash = ?1",
                params![hash.to_byte_array().to_vec()],
                |row| row.get(0),
            )
            .optional()?;
        bytes.map(BlockRecord::from_bytes).transpose()
    }
}

#[derive(Default)]
struct MemoryChain {
    headers: HashMap<BlockHash, (u32, Vec<u8>)>,
    heights: BTreeMap<u32, BlockHash>,
    blocks: HashMap<BlockHash, Vec<u8>>,
}

impl MemoryChain {
    fn record(&self, hash: &BlockHash) -> Option<HeaderRecord> {
        let (height, bytes) = self.headers.get(hash)?;
        let next_block_hash = height
            .checked_add(1)
            .and_then(|next_height| self.heights.get(&next_height))
            .filter(|next| {
                self.headers
                    .get(*next)
                    .and_then(|(_, next_bytes)| decode_header(next_bytes).ok())
                    .is_some_and(|header| header.prev_blockhash == *hash)
            })
            .copied();

        Some(HeaderRecord {
            block_hash: *hash,
            block_height: *height,
            header_bytes: bytes.clone(),
            next_block_hash,
        })
    }
}

/// Simple in-memory repository useful for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryRepository {
    chain: RwLock<MemoryChain>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a header at `height`, displacing any header previously there.
    pub fn insert_header(&self, height: u32, header_bytes: Vec<u8>) -> Result<BlockHash> {
        let hash = decode_header(&header_bytes)?.block_hash();
        let mut chain = self.chain.write();
        if let Some(displaced) = chain.heights.insert(height, hash) {
            if displaced != hash {
                chain.headers.remove(&displaced);
            }
        }
        chain.headers.insert(hash, (height, header_bytes));
        Ok(hash)
    }

    pub fn insert_block(&self, block_bytes: Vec<u8>) -> Result<BlockHash> {
        let hash = BlockRecord::from_bytes(block_bytes.clone())?.block_hash;
        self.chain.write().blocks.insert(hash, block_bytes);
        Ok(hash)
    }
}

impl ChainStateAccessor for InMemoryRepository {
    fn get_best_header(&self) -> Result<Option<HeaderRecord>> {
        let chain = self.chain.read();
        Ok(chain
            .heights
            .last_key_value()
            .and_then(|(_, hash)| chain.record(hash)))
    }

    fn get_header(&self, hash: &BlockHash) -> Result<Option<HeaderRecord>> {
        Ok(self.chain.read().record(hash))
    }

    fn get_block_hash(&self, height: u32) -> Result<Option<BlockHash>> {
        Ok(self.chain.read().heights.get(&height).copied())
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Option<BlockRecord>> {
        let bytes = self.chain.read().blocks.get(hash).cloned();
        bytes.map(BlockRecord::from_bytes).transpose()
    }
}
