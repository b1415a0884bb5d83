//! # xuni-consensus
//! Checkpoint pinning for the Xuni ledger.
//!
//! [`CheckpointTable`] answers "is this height pinned" and "may this
//! alternative block replace history". The ledger consults it when
//! appending blocks and before any reorganization.

pub mod checkpoint;

pub use checkpoint::{CheckpointError, CheckpointTable, MAINNET_CHECKPOINTS, TESTNET_CHECKPOINTS};
