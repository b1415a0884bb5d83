//! Error types for the ledger, its block store and its cache.
use thiserror::Error;
use xuni_consensus::CheckpointError;
use xuni_core::error::{BlockError, ErrorKind, TransactionError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("rocksdb: {0}")] Rocks(String),
    #[error("io: {0}")] Io(String),
    #[error("encoding: {0}")] Encoding(String),
    #[error("missing column family: {0}")] MissingColumnFamily(String),
    #[error("non-contiguous append: expected height {expected}, got {got}")] NonContiguous { expected: u32, got: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache file absent")] Absent,
    #[error("cache version {found}, expected {expected}")] VersionMismatch { found: u8, expected: u8 },
    #[error("cache tip {stored} does not match chain tip {actual}")] TipMismatch { stored: String, actual: String },
    #[error("corrupt cache: {0}")] Corrupt(String),
    #[error("cache io: {0}")] Io(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("block rejected: {0}")] Block(#[from] BlockError),
    #[error("transaction rejected: {0}")] Transaction(#[from] TransactionError),
    #[error("storage: {0}")] Storage(#[from] StorageError),
    #[error("cache: {0}")] Cache(#[from] CacheError),
    #[error("checkpoint: {0}")] Checkpoint(#[from] CheckpointError),
    #[error("rollback to {target} would remove checkpointed block {checkpoint}")] CheckpointedRollback { target: u32, checkpoint: u32 },
    #[error("rollback to {target} above chain height {height}")] InvalidRollback { target: u32, height: u32 },
    #[error("reorganization at {split_height} failed, main chain restored only to height {height}: {reason}")] RestoreFailed { split_height: u32, height: u32, reason: String },
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Encoding(_) => ErrorKind::StorageCorruption,
            _ => ErrorKind::StorageIo,
        }
    }
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::StorageCorruption
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Block(e) => e.kind(),
            Self::Transaction(e) => e.kind(),
            Self::Storage(e) => e.kind(),
            Self::Cache(e) => e.kind(),
            Self::Checkpoint(_) | Self::CheckpointedRollback { .. } => ErrorKind::ConsensusViolation,
            Self::InvalidRollback { .. } => ErrorKind::MalformedInput,
            Self::RestoreFailed { .. } => ErrorKind::StorageIo,
        }
    }

    /// Transaction error code behind a rejection, if a transaction caused it.
    pub fn transaction_code(&self) -> Option<&'static str> {
        match self {
            Self::Block(e) => e.transaction_code(),
            Self::Transaction(e) => Some(e.code()),
            _ => None,
        }
    }
}
