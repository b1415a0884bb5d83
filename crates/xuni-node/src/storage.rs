//! Block log storage.
//!
//! The block log is the only durable source of truth: every index the ledger
//! keeps can be rebuilt by replaying it. [`BlockStore`] abstracts it with two
//! implementations:
//!
//! - [`RocksBlockStore`]: RocksDB database with a `blocks` column family keyed
//!   by big-endian height and a `metadata` column family holding the stored
//!   chain length. Every mutation is one atomic [`WriteBatch`].
//! - [`MemoryBlockStore`]: non-persistent, for tests and tooling.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch, WriteOptions};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::state::BlockEntry;

const CF_BLOCKS: &str = "blocks";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_METADATA];

const META_CHAIN_LENGTH: &[u8] = b"chain_length";

/// Append-only block log with tail truncation.
pub trait BlockStore: Send + Sync {
    /// Every stored entry in height order.
    fn load_all(&mut self) -> Result<Vec<BlockEntry>, StorageError>;

    /// Store the entry at height `len()`.
    fn append(&mut self, entry: &BlockEntry) -> Result<(), StorageError>;

    /// Keep only the first `len` entries.
    fn truncate(&mut self, len: u32) -> Result<(), StorageError>;

    fn flush(&mut self) -> Result<(), StorageError>;

    /// Number of stored entries.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RocksDB-backed block log.
pub struct RocksBlockStore {
    db: DB,
    len: u32,
    sync_writes: bool,
}

impl RocksBlockStore {
    /// Open or create the block log at `path`.
    ///
    /// When `sync_writes` is set every append is fsynced before returning.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StorageError::Rocks(e.to_string()))?;

        let mut store = Self { db, len: 0, sync_writes };
        store.len = store.stored_length()?;
        debug!(path = %path.as_ref().display(), blocks = store.len, "opened block log");
        Ok(store)
    }

    fn stored_length(&self) -> Result<u32, StorageError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self
            .db
            .get_cf(cf, META_CHAIN_LENGTH)
            .map_err(|e| StorageError::Rocks(e.to_string()))?
        {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Encoding("invalid chain length value".into()))?;
                Ok(u32::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    fn read_entry(&self, height: u32) -> Result<Option<BlockEntry>, StorageError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let Some(bytes) = self
            .db
            .get_cf(cf, height_key(height))
            .map_err(|e| StorageError::Rocks(e.to_string()))?
        else {
            return Ok(None);
        };
        let (entry, _): (BlockEntry, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| StorageError::Encoding(e.to_string()))?;
        Ok(Some(entry))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db
            .write_opt(batch, &opts)
            .map_err(|e| StorageError::Rocks(e.to_string()))
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::MissingColumnFamily(name.to_string()))
    }
}

impl BlockStore for RocksBlockStore {
    /// Reads the log in height order. A missing or undecodable record ends
    /// the log: it and everything above it are dropped.
    fn load_all(&mut self) -> Result<Vec<BlockEntry>, StorageError> {
        let mut entries = Vec::with_capacity(self.len as usize);
        for height in 0..self.len {
            match self.read_entry(height) {
                Ok(Some(entry)) if entry.height == height => entries.push(entry),
                Ok(_) => {
                    warn!(height, "block record missing, truncating block log");
                    self.truncate(height)?;
                    break;
                }
                Err(StorageError::Encoding(reason)) => {
                    warn!(height, %reason, "undecodable block record, truncating block log");
                    self.truncate(height)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    fn append(&mut self, entry: &BlockEntry) -> Result<(), StorageError> {
        if entry.height != self.len {
            return Err(StorageError::NonContiguous { expected: self.len, got: entry.height });
        }
        let bytes = bincode::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf_handle(CF_BLOCKS)?, height_key(entry.height), &bytes);
        batch.put_cf(self.cf_handle(CF_METADATA)?, META_CHAIN_LENGTH, (self.len + 1).to_be_bytes());
        self.write(batch)?;
        self.len += 1;
        Ok(())
    }

    fn truncate(&mut self, len: u32) -> Result<(), StorageError> {
        if len >= self.len {
            return Ok(());
        }
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let mut batch = WriteBatch::default();
        for height in len..self.len {
            batch.delete_cf(cf_blocks, height_key(height));
        }
        batch.put_cf(self.cf_handle(CF_METADATA)?, META_CHAIN_LENGTH, len.to_be_bytes());
        self.write(batch)?;
        debug!(from = self.len, to = len, "truncated block log");
        self.len = len;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| StorageError::Rocks(e.to_string()))
    }

    fn len(&self) -> u32 {
        self.len
    }
}

/// Encode a height as big-endian bytes for ordered iteration.
fn height_key(height: u32) -> [u8; 4] {
    height.to_be_bytes()
}

/// Block log held in memory.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    entries: Vec<BlockEntry>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn load_all(&mut self) -> Result<Vec<BlockEntry>, StorageError> {
        Ok(self.entries.clone())
    }

    fn append(&mut self, entry: &BlockEntry) -> Result<(), StorageError> {
        if entry.height != self.len() {
            return Err(StorageError::NonContiguous { expected: self.len(), got: entry.height });
        }
        self.entries.push(entry.clone());
        Ok(())
    }

    fn truncate(&mut self, len: u32) -> Result<(), StorageError> {
        self.entries.truncate(len as usize);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn len(&self) -> u32 {
        self.entries.len() as u32
    }
}
