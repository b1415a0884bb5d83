//! # xuni-node: Ledger state machine, block log and index cache.
//!
//! - [`ledger::Ledger`]: block and transaction admission, rollback, queries
//! - [`validation::ChainRules`]: consensus checks against the ledger state
//! - [`state::LedgerState`]: the block sequence and its derived indices
//! - [`storage::RocksBlockStore`]: RocksDB-backed block log
//! - [`cache::PersistentCache`]: versioned index snapshot (`blockscache.dat`)
//! - [`config::NodeConfig`]: node configuration

pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod state;
pub mod storage;
pub mod validation;

pub use cache::{CacheStatus, PersistentCache};
pub use config::NodeConfig;
pub use error::{CacheError, LedgerError, StorageError};
pub use ledger::{Ledger, LedgerOptions, OutputForAmount, RandomOutputs};
pub use storage::{BlockStore, MemoryBlockStore, RocksBlockStore};
pub use validation::ChainRules;
