//! Checkpoint table: trusted `(height, block hash)` pins.
//!
//! Checkpoints bound how much history a competing chain may rewrite:
//!
//! - **Pinning:** a block stored at a checkpointed height must carry the
//!   pinned hash ([`CheckpointTable::check_block`]).
//! - **Ratchet:** no alternative block may land at or below the highest
//!   checkpoint under the current chain height
//!   ([`CheckpointTable::is_alternative_block_allowed`]).
//! - **Depth limit:** outside the checkpoint zone, reorgs deeper than
//!   [`CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW`] blocks are refused.
//!
//! The table is immutable once the ledger is opened. It is loaded from the
//! compiled-in list for the network and optionally extended from a
//! `height,hash` file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, error, info};
use xuni_core::constants::{CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW, NetworkType};
use xuni_core::types::Hash256;

/// Compiled-in mainnet checkpoints as `(height, hex hash)`.
pub const MAINNET_CHECKPOINTS: &[(u32, &str)] = &[];

/// Compiled-in testnet checkpoints. Testnet carries none.
pub const TESTNET_CHECKPOINTS: &[(u32, &str)] = &[];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("duplicate checkpoint height {0}")] DuplicateHeight(u32),
    #[error("bad checkpoint hash at height {height}: {reason}")] BadHashFormat { height: u32, reason: String },
    #[error("checkpoint mismatch at height {height}: expected {expected}, got {got}")] Mismatch { height: u32, expected: Hash256, got: Hash256 },
    #[error("checkpoint file {path}: {reason}")] Io { path: String, reason: String },
    #[error("checkpoint file line {line}: {reason}")] Parse { line: usize, reason: String },
}

/// Sorted height to hash pin list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointTable {
    points: BTreeMap<u32, Hash256>,
}

impl CheckpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a compiled-in `(height, hex hash)` list.
    pub fn load_compiled(list: &[(u32, &str)]) -> Result<Self, CheckpointError> {
        let mut table = Self::new();
        for &(height, hash) in list {
            table.add_checkpoint_hex(height, hash)?;
        }
        Ok(table)
    }

    /// The compiled-in table of `network`.
    pub fn for_network(network: NetworkType) -> Result<Self, CheckpointError> {
        match network {
            NetworkType::Mainnet => Self::load_compiled(MAINNET_CHECKPOINTS),
            NetworkType::Testnet => Self::load_compiled(TESTNET_CHECKPOINTS),
        }
    }

    /// Add a pin. Each height may be pinned once.
    pub fn add_checkpoint(&mut self, height: u32, hash: Hash256) -> Result<(), CheckpointError> {
        if self.points.contains_key(&height) {
            error!(height, "duplicate checkpoint height");
            return Err(CheckpointError::DuplicateHeight(height));
        }
        self.points.insert(height, hash);
        Ok(())
    }

    /// Add a pin given as a 64-character hex string.
    pub fn add_checkpoint_hex(&mut self, height: u32, hash: &str) -> Result<(), CheckpointError> {
        let hash = hash.parse::<Hash256>().map_err(|e| {
            error!(height, "incorrect hash in checkpoints");
            CheckpointError::BadHashFormat { height, reason: e.to_string() }
        })?;
        self.add_checkpoint(height, hash)
    }

    /// Extend the table from a file of `height,hash` lines.
    ///
    /// Blank lines and lines starting with `#` are skipped. Returns the number
    /// of checkpoints added. On error the table is left unchanged.
    pub fn load_from_file(&mut self, path: &Path) -> Result<usize, CheckpointError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            error!(path = %path.display(), "could not load checkpoints file");
            CheckpointError::Io { path: path.display().to_string(), reason: e.to_string() }
        })?;

        let mut staged = self.clone();
        let mut added = 0;
        for (index, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (height, hash) = line.split_once(',').ok_or_else(|| CheckpointError::Parse {
                line: index + 1,
                reason: "expected `height,hash`".into(),
            })?;
            let height = height.trim().parse::<u32>().map_err(|e| CheckpointError::Parse {
                line: index + 1,
                reason: format!("height: {e}"),
            })?;
            staged.add_checkpoint_hex(height, hash)?;
            added += 1;
        }
        *self = staged;

        info!(added, total = self.points.len(), path = %path.display(), "loaded checkpoints");
        Ok(added)
    }

    /// True iff `height` is at or below the highest checkpoint.
    pub fn is_in_checkpoint_zone(&self, height: u32) -> bool {
        self.last_height().is_some_and(|last| height <= last)
    }

    /// Check `hash` against the pin at `height`.
    ///
    /// Returns whether `height` is a checkpoint. Heights without a pin pass.
    pub fn check_block(&self, height: u32, hash: &Hash256) -> Result<bool, CheckpointError> {
        match self.points.get(&height) {
            None => Ok(false),
            Some(expected) if expected == hash => {
                info!(height, "checkpoint passed");
                Ok(true)
            }
            Some(expected) => {
                error!(height, expected = %expected, got = %hash, "checkpoint failed");
                Err(CheckpointError::Mismatch { height, expected: *expected, got: *hash })
            }
        }
    }

    /// Whether a block at `block_height` may replace the block currently at
    /// that height on a chain of `chain_height` blocks.
    ///
    /// Genesis can never be replaced. Outside the checkpoint zone the reorg
    /// depth is limited to the unlock window. The block must also lie above
    /// the highest checkpoint not above `chain_height`.
    pub fn is_alternative_block_allowed(&self, chain_height: u32, block_height: u32) -> bool {
        if block_height == 0 {
            return false;
        }

        if block_height < chain_height.saturating_sub(CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW)
            && !self.is_in_checkpoint_zone(block_height)
        {
            debug!(depth = chain_height - block_height, "reorganization depth too deep");
            return false;
        }

        match self.points.range(..=chain_height).next_back() {
            None => true,
            Some((&checkpoint_height, _)) => checkpoint_height < block_height,
        }
    }

    /// Pinned hash at `height`, if any.
    pub fn get(&self, height: u32) -> Option<&Hash256> {
        self.points.get(&height)
    }

    /// All checkpoint heights in ascending order.
    pub fn heights(&self) -> Vec<u32> {
        self.points.keys().copied().collect()
    }

    pub fn last_height(&self) -> Option<u32> {
        self.points.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Hash256)> {
        self.points.iter().map(|(h, hash)| (*h, hash))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
