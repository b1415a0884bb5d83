//! The ledger: block admission, rollback and queries over a single locked state.
//!
//! All state lives in one [`LedgerState`] behind a [`RwLock`]. Mutations
//! (`append_block`, `rollback_to`, `reorganize`, cache rebuild) take the write
//! lock for their whole duration; consistency-sensitive reads take the read
//! lock. Internal helpers receive the already locked state instead of locking
//! again.
//!
//! Startup runs the cache state machine:
//!
//! ```text
//! Absent -> Loading -> Valid
//!                   -> Invalid -> Rebuilding -> Valid
//! ```
//!
//! A cache is accepted only when its tip matches the tip of the block log;
//! otherwise every stored block is replayed through validation.

use std::fs;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rand::seq::index::sample;
use tracing::{debug, error, info, warn};
use xuni_consensus::CheckpointTable;
use xuni_core::crypto::CryptoOracle;
use xuni_core::currency::Currency;
use xuni_core::error::{BlockError, TransactionError};
use xuni_core::types::{
    Block, BlockInfo, Hash256, KeyImage, OutputTarget, PublicKey, Transaction, TransactionIndex,
    TransactionInput,
};
use xuni_core::validation::ValidatedTransaction;

use crate::cache::{CacheStatus, PersistentCache};
use crate::config::NodeConfig;
use crate::error::{CacheError, LedgerError, StorageError};
use crate::state::{BlockEntry, Indices, LedgerState};
use crate::storage::{BlockStore, MemoryBlockStore, RocksBlockStore};
use crate::validation::ChainRules;

/// Persistence switches of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerOptions {
    pub load_cache: bool,
    pub save_cache_on_shutdown: bool,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self { load_cache: true, save_cache_on_shutdown: true }
    }
}

impl From<&NodeConfig> for LedgerOptions {
    fn from(config: &NodeConfig) -> Self {
        Self { load_cache: config.load_cache, save_cache_on_shutdown: config.save_cache_on_shutdown }
    }
}

/// An unlocked output offered as a ring member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputForAmount {
    pub global_index: u32,
    pub key: PublicKey,
}

/// Ring member candidates for one amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomOutputs {
    pub amount: u64,
    pub outputs: Vec<OutputForAmount>,
}

struct Inner {
    state: LedgerState,
    store: Box<dyn BlockStore>,
    cache: Option<PersistentCache>,
    status: CacheStatus,
    /// The indices changed since the cache was last written.
    dirty: bool,
    options: LedgerOptions,
}

pub struct Ledger {
    rules: ChainRules,
    inner: RwLock<Inner>,
}

impl Ledger {
    /// Open the ledger stored under `config`'s network directory.
    ///
    /// Failing to create the directory or open the block log is fatal.
    pub fn open(
        config: &NodeConfig,
        currency: Currency,
        checkpoints: CheckpointTable,
        oracle: Arc<dyn CryptoOracle>,
    ) -> Result<Self, LedgerError> {
        let dir = config.network_dir();
        fs::create_dir_all(&dir).map_err(|e| {
            error!(path = %dir.display(), "failed to create data directory");
            StorageError::Io(e.to_string())
        })?;
        let store = RocksBlockStore::open(config.blocks_path(), config.sync_writes).map_err(|e| {
            error!(path = %config.blocks_path().display(), error = %e, "failed to open block log");
            e
        })?;
        Self::from_parts(
            Box::new(store),
            Some(PersistentCache::new(config.cache_path())),
            LedgerOptions::from(config),
            ChainRules::new(currency, checkpoints, oracle),
        )
    }

    /// An empty ledger over a [`MemoryBlockStore`], without a cache file.
    pub fn in_memory(currency: Currency, checkpoints: CheckpointTable, oracle: Arc<dyn CryptoOracle>) -> Self {
        Self {
            rules: ChainRules::new(currency, checkpoints, oracle),
            inner: RwLock::new(Inner {
                state: LedgerState::default(),
                store: Box::new(MemoryBlockStore::new()),
                cache: None,
                status: CacheStatus::Valid,
                dirty: false,
                options: LedgerOptions { load_cache: false, save_cache_on_shutdown: false },
            }),
        }
    }

    /// Assemble a ledger from an opened store and run the cache state machine.
    pub fn from_parts(
        mut store: Box<dyn BlockStore>,
        cache: Option<PersistentCache>,
        options: LedgerOptions,
        rules: ChainRules,
    ) -> Result<Self, LedgerError> {
        let entries = store.load_all()?;
        let ledger = Self {
            rules,
            inner: RwLock::new(Inner {
                state: LedgerState::default(),
                store,
                cache,
                status: CacheStatus::Absent,
                dirty: false,
                options,
            }),
        };
        {
            let mut inner = ledger.inner.write();
            ledger.initialize(&mut inner, entries)?;
        }
        Ok(ledger)
    }

    fn initialize(&self, inner: &mut Inner, entries: Vec<BlockEntry>) -> Result<(), LedgerError> {
        if entries.is_empty() {
            inner.status = CacheStatus::Valid;
            return Ok(());
        }

        if inner.options.load_cache {
            if let Some(cache) = inner.cache.clone() {
                inner.status = CacheStatus::Loading;
                let started = Instant::now();
                match load_indices(&cache, &entries) {
                    Ok(indices) => {
                        info!(
                            blocks = entries.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "loaded index cache"
                        );
                        inner.state = LedgerState { blocks: entries, indices };
                        inner.status = CacheStatus::Valid;
                        return Ok(());
                    }
                    Err(CacheError::Absent) => {
                        info!(path = %cache.path().display(), "no index cache");
                        inner.status = CacheStatus::Absent;
                    }
                    Err(e) => {
                        warn!(error = %e, "index cache invalid, ignoring it");
                        inner.status = CacheStatus::Invalid;
                    }
                }
            }
        }

        self.replay(inner, entries)
    }

    /// Rebuild every index by validating and applying `entries` from genesis.
    ///
    /// The block log is truncated at the first entry that fails validation.
    fn replay(&self, inner: &mut Inner, entries: Vec<BlockEntry>) -> Result<(), LedgerError> {
        let started = Instant::now();
        let total = entries.len();
        inner.status = CacheStatus::Rebuilding;
        inner.state = LedgerState::default();
        info!(blocks = total, "rebuilding ledger indices from the block log");

        for stored in entries {
            let height = stored.height;
            match self.rules.validate_block(&inner.state, &stored.block) {
                Ok(entry) if entry == stored => inner.state.apply(&self.rules.currency, entry),
                Ok(_) => {
                    warn!(height, "stored block record disagrees with its block, truncating block log");
                    inner.store.truncate(height)?;
                    break;
                }
                Err(e) => {
                    warn!(height, error = %e, "stored block failed validation, truncating block log");
                    inner.store.truncate(height)?;
                    break;
                }
            }
        }

        inner.status = CacheStatus::Valid;
        inner.dirty = true;
        info!(
            blocks = inner.state.len(),
            skipped = total - inner.state.blocks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ledger indices rebuilt"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn currency(&self) -> &Currency {
        &self.rules.currency
    }

    pub fn checkpoints(&self) -> &CheckpointTable {
        &self.rules.checkpoints
    }

    /// Chain length. Zero when empty.
    pub fn height(&self) -> u32 {
        self.inner.read().state.len()
    }

    pub fn tip(&self) -> Option<BlockInfo> {
        self.inner.read().state.tip().map(BlockEntry::info)
    }

    pub fn block_hash(&self, height: u32) -> Option<Hash256> {
        self.inner.read().state.entry(height).map(|entry| entry.hash)
    }

    pub fn block(&self, height: u32) -> Option<Block> {
        self.inner.read().state.entry(height).map(|entry| entry.block.clone())
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Option<Block> {
        let inner = self.inner.read();
        let height = *inner.state.indices.block_index.get(hash)?;
        inner.state.entry(height).map(|entry| entry.block.clone())
    }

    pub fn transaction(&self, hash: &Hash256) -> Option<Transaction> {
        let inner = self.inner.read();
        let index = *inner.state.indices.transaction_map.get(hash)?;
        inner.state.transaction_at(index).cloned()
    }

    pub fn transaction_index(&self, hash: &Hash256) -> Option<TransactionIndex> {
        self.inner.read().state.indices.transaction_map.get(hash).copied()
    }

    pub fn has_transaction(&self, hash: &Hash256) -> bool {
        self.inner.read().state.indices.transaction_map.contains_key(hash)
    }

    pub fn has_spent_key_image(&self, key_image: &KeyImage) -> bool {
        self.inner.read().state.indices.spent_key_images.contains(key_image)
    }

    /// Global output indexes assigned to the outputs of a transaction.
    pub fn global_output_indexes(&self, tx_hash: &Hash256) -> Option<Vec<u32>> {
        let inner = self.inner.read();
        let index = *inner.state.indices.transaction_map.get(tx_hash)?;
        let entry = inner.state.entry(index.block)?;
        entry
            .transactions
            .get(usize::from(index.transaction))
            .map(|tx| tx.global_output_indexes.clone())
    }

    /// Number of key outputs of `amount`.
    pub fn output_count(&self, amount: u64) -> usize {
        self.inner.read().state.indices.outputs.get(&amount).map_or(0, Vec::len)
    }

    /// Up to `count` distinct unlocked key outputs per amount, chosen uniformly
    /// and returned in global index order.
    pub fn random_outputs_for_amounts(&self, amounts: &[u64], count: usize) -> Vec<RandomOutputs> {
        let inner = self.inner.read();
        let state = &inner.state;
        let height = state.len();
        let tip_timestamp = state.tip().map_or(0, |entry| entry.block.header.timestamp);
        let mut rng = rand::thread_rng();

        amounts
            .iter()
            .map(|&amount| {
                let total = state.indices.outputs.get(&amount).map_or(0, Vec::len) as u32;
                let unlocked: Vec<OutputForAmount> = (0..total)
                    .filter_map(|global_index| {
                        let (_, tx, output) = state.key_output(amount, global_index)?;
                        if !self.rules.currency.is_unlocked(tx.unlock_time, height, tip_timestamp) {
                            return None;
                        }
                        match output.target {
                            OutputTarget::Key { key } => Some(OutputForAmount { global_index, key }),
                            OutputTarget::Multisignature { .. } => None,
                        }
                    })
                    .collect();

                let outputs = if unlocked.len() <= count {
                    unlocked
                } else {
                    let mut picked = sample(&mut rng, unlocked.len(), count).into_vec();
                    picked.sort_unstable();
                    picked.into_iter().map(|i| unlocked[i]).collect()
                };
                RandomOutputs { amount, outputs }
            })
            .collect()
    }

    /// Amount locked in deposits after the block at `height`.
    pub fn deposit_amount_at_height(&self, height: u32) -> Option<u64> {
        self.inner.read().state.indices.deposit_index.get(height as usize).map(|d| d.locked)
    }

    /// Interest committed by deposits created up to the block at `height`.
    pub fn deposit_interest_at_height(&self, height: u32) -> Option<u64> {
        self.inner.read().state.indices.deposit_index.get(height as usize).map(|d| d.interest)
    }

    pub fn already_generated_coins(&self) -> u64 {
        self.inner.read().state.already_generated_coins()
    }

    /// Size limit of the next block; transactions are gated by it too.
    pub fn current_cumulative_blocksize_limit(&self) -> u64 {
        self.rules.cumulative_size_limit(&self.inner.read().state)
    }

    /// Copy of the derived indices.
    pub fn indices(&self) -> Indices {
        self.inner.read().state.indices.clone()
    }

    // ------------------------------------------------------------------
    // Transaction validation
    // ------------------------------------------------------------------

    pub fn validate_transaction_outputs(&self, tx: &Transaction) -> Result<(), TransactionError> {
        self.rules.validate_transaction_outputs(tx)
    }

    /// Verify the inputs of `tx` for inclusion in the block at `height`.
    ///
    /// Returns the highest block whose outputs the inputs reference.
    pub fn validate_transaction_inputs(&self, tx: &Transaction, height: u32) -> Result<BlockInfo, TransactionError> {
        let inner = self.inner.read();
        self.rules.validate_transaction_inputs(&inner.state, tx, height)
    }

    /// Full validation of a non-coinbase transaction, optionally size-gated
    /// against [`current_cumulative_blocksize_limit`](Self::current_cumulative_blocksize_limit).
    pub fn validate_transaction(
        &self,
        tx: &Transaction,
        height: u32,
        check_size: bool,
    ) -> Result<ValidatedTransaction, TransactionError> {
        let inner = self.inner.read();
        self.rules
            .validate_transaction(&inner.state, tx, height, check_size)
            .map(|(totals, _)| totals)
    }

    /// Re-validate the inputs of a pooled transaction against the next block.
    ///
    /// `max_used` remembers the highest block the inputs were verified
    /// against. While that block is still on the chain the ring signatures
    /// are not verified again; only the spent sets are consulted.
    /// `last_failed` remembers the tip at the last failure so an unchanged
    /// chain rejects immediately.
    pub fn check_transaction_inputs_cached(
        &self,
        tx: &Transaction,
        max_used: &mut BlockInfo,
        last_failed: &mut BlockInfo,
    ) -> Result<(), TransactionError> {
        let inner = self.inner.read();
        let state = &inner.state;
        let height = state.len();
        let tip = state.tip().map(BlockEntry::info).unwrap_or_default();

        if !max_used.is_empty()
            && !state.entry(max_used.height).is_some_and(|entry| entry.hash == max_used.hash)
        {
            debug!(height = max_used.height, "referenced block left the chain, re-verifying inputs");
            max_used.clear();
        }

        if max_used.is_empty() {
            if !last_failed.is_empty() && *last_failed == tip {
                return Err(TransactionError::AlreadyRejected(tip.height));
            }
            match self.rules.validate_transaction_inputs(state, tx, height) {
                Ok(used) => {
                    *max_used = used;
                    last_failed.clear();
                }
                Err(e) => {
                    *last_failed = tip;
                    return Err(e);
                }
            }
        } else {
            for (index, input) in tx.inputs.iter().enumerate() {
                match input {
                    TransactionInput::Key { key_image, .. } => {
                        if state.indices.spent_key_images.contains(key_image) {
                            *last_failed = tip;
                            return Err(TransactionError::KeyImageUsed(key_image.to_string()));
                        }
                    }
                    TransactionInput::Multisignature { amount, output_index, .. } => {
                        if state.multisignature_output(*amount, *output_index).is_none_or(|(usage, _, _)| usage.is_used) {
                            *last_failed = tip;
                            return Err(TransactionError::MultisignatureUsed(index));
                        }
                    }
                    TransactionInput::Generation { .. } => return Err(TransactionError::UnexpectedGeneration),
                }
            }
            last_failed.clear();
        }

        self.rules.validate_transaction_outputs(tx)
    }

    // ------------------------------------------------------------------
    // Chain mutation
    // ------------------------------------------------------------------

    /// Validate `block` as the next block and append it.
    ///
    /// A block timestamped too far past the local clock is refused. Replay of
    /// the stored log skips that check. On rejection nothing changes.
    pub fn append_block(&self, block: &Block) -> Result<BlockInfo, LedgerError> {
        let mut inner = self.inner.write();
        self.admit_locked(&mut inner, block)
    }

    fn admit_locked(&self, inner: &mut Inner, block: &Block) -> Result<BlockInfo, LedgerError> {
        self.rules.check_future_timestamp(block, unix_now()).map_err(|e| {
            debug!(height = inner.state.len(), error = %e, "block rejected");
            e
        })?;
        self.append_locked(inner, block)
    }

    fn append_locked(&self, inner: &mut Inner, block: &Block) -> Result<BlockInfo, LedgerError> {
        let height = inner.state.len();
        let entry = self.rules.validate_block(&inner.state, block).map_err(|e| {
            debug!(height, error = %e, code = e.transaction_code().unwrap_or(""), "block rejected");
            e
        })?;

        inner.store.append(&entry)?;
        let info = entry.info();
        let transactions = entry.transactions.len();
        let cumulative_size = entry.cumulative_size;
        inner.state.apply(&self.rules.currency, entry);
        inner.dirty = true;

        info!(height = info.height, hash = %info.hash, transactions, cumulative_size, "block added");
        Ok(info)
    }

    /// Keep the first `height` blocks, undoing every block above them.
    ///
    /// Refuses to remove a checkpointed block. Returns the removed blocks in
    /// chain order.
    pub fn rollback_to(&self, height: u32) -> Result<Vec<Block>, LedgerError> {
        let mut inner = self.inner.write();
        self.rollback_locked(&mut inner, height)
    }

    fn rollback_locked(&self, inner: &mut Inner, height: u32) -> Result<Vec<Block>, LedgerError> {
        let len = inner.state.len();
        if height > len {
            return Err(LedgerError::InvalidRollback { target: height, height: len });
        }
        if let Some((checkpoint, _)) = self
            .rules
            .checkpoints
            .iter()
            .find(|(checkpoint, _)| (height..len).contains(checkpoint))
        {
            warn!(to = height, checkpoint, "rollback would remove a checkpointed block");
            return Err(LedgerError::CheckpointedRollback { target: height, checkpoint });
        }
        self.truncate_locked(inner, height)
    }

    fn truncate_locked(&self, inner: &mut Inner, height: u32) -> Result<Vec<Block>, LedgerError> {
        let from = inner.state.len();
        inner.store.truncate(height)?;

        let mut removed = Vec::with_capacity(from.saturating_sub(height) as usize);
        while inner.state.len() > height {
            match inner.state.revert_tip() {
                Some(entry) => removed.push(entry.block),
                None => break,
            }
        }
        removed.reverse();
        if !removed.is_empty() {
            inner.dirty = true;
            info!(from, to = height, "rolled back blocks");
        }
        Ok(removed)
    }

    /// Replace the blocks from `split_height` on with `blocks`.
    ///
    /// The switch must be allowed by the checkpoint table. If any replacement
    /// block is rejected the original blocks are restored and the error is
    /// returned. If the restore itself fails the chain is left at the height
    /// reached and [`LedgerError::RestoreFailed`] reports it. On success
    /// returns the replaced blocks.
    pub fn reorganize(&self, split_height: u32, blocks: &[Block]) -> Result<Vec<Block>, LedgerError> {
        let mut inner = self.inner.write();
        let len = inner.state.len();
        if split_height > len {
            return Err(LedgerError::InvalidRollback { target: split_height, height: len });
        }
        if !self.rules.checkpoints.is_alternative_block_allowed(len, split_height) {
            warn!(split_height, chain_height = len, "alternative chain not allowed");
            return Err(BlockError::AlternativeNotAllowed { height: split_height, chain_height: len }.into());
        }

        let original = self.rollback_locked(&mut inner, split_height)?;
        for block in blocks {
            if let Err(e) = self.admit_locked(&mut inner, block) {
                warn!(split_height, error = %e, "alternative chain rejected, restoring main chain");
                if let Err(restore) = self.restore_locked(&mut inner, split_height, &original) {
                    let height = inner.state.len();
                    error!(split_height, height, error = %restore, "failed to restore main chain");
                    return Err(LedgerError::RestoreFailed { split_height, height, reason: restore.to_string() });
                }
                return Err(e);
            }
        }

        info!(split_height, removed = original.len(), added = blocks.len(), "reorganized chain");
        Ok(original)
    }

    fn restore_locked(&self, inner: &mut Inner, split_height: u32, original: &[Block]) -> Result<(), LedgerError> {
        self.truncate_locked(inner, split_height)?;
        for block in original {
            self.append_locked(inner, block)?;
        }
        Ok(())
    }

    /// Check every stored checkpointed block against its pin.
    ///
    /// A mismatching block and everything above it are removed. Returns the
    /// highest verified checkpoint height.
    pub fn verify_checkpoints(&self) -> Result<Option<u32>, LedgerError> {
        let mut inner = self.inner.write();
        let mut last_valid = None;
        for (height, expected) in self.rules.checkpoints.iter() {
            let Some(entry) = inner.state.entry(height) else {
                break;
            };
            if entry.hash != *expected {
                let got = entry.hash;
                error!(height, expected = %expected, got = %got, "stored block violates checkpoint, rolling back");
                self.truncate_locked(&mut inner, height)?;
                return Ok(last_valid);
            }
            last_valid = Some(height);
        }
        if let Some(height) = last_valid {
            info!(height, "checkpoints verified");
        }
        Ok(last_valid)
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    pub fn cache_status(&self) -> CacheStatus {
        self.inner.read().status
    }

    /// Whether the indices changed since the cache was last written.
    pub fn is_dirty(&self) -> bool {
        self.inner.read().dirty
    }

    /// Write the index cache. A ledger without a cache file does nothing.
    pub fn save_cache(&self) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let Some(cache) = inner.cache.as_ref() else {
            return Ok(());
        };
        let started = Instant::now();
        cache.save(&inner.state.indices, &inner.state.tip_hash())?;
        info!(
            path = %cache.path().display(),
            blocks = inner.state.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "saved index cache"
        );
        inner.dirty = false;
        Ok(())
    }

    /// Discard the indices and rebuild them from the block log.
    pub fn rebuild_cache(&self) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        inner.status = CacheStatus::Invalid;
        let entries = inner.store.load_all()?;
        self.replay(&mut inner, entries)
    }

    /// Save the cache when dirty and configured to, then flush the block log.
    pub fn close(&self) -> Result<(), LedgerError> {
        let save = {
            let inner = self.inner.read();
            inner.dirty && inner.options.save_cache_on_shutdown && inner.cache.is_some()
        };
        if save {
            self.save_cache()?;
        }
        self.inner.write().store.flush()?;
        info!("ledger closed");
        Ok(())
    }
}

/// Load the cache for the chain ending at the last entry and check that it
/// covers exactly that chain.
fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
}

fn load_indices(cache: &PersistentCache, entries: &[BlockEntry]) -> Result<Indices, CacheError> {
    let tip = entries.last().map(|entry| entry.hash).unwrap_or(Hash256::ZERO);
    let indices = cache.load(&tip)?;
    let len = entries.len();
    let tip_height = indices.block_index.get(&tip).copied();
    if indices.block_index.len() != len
        || indices.deposit_index.len() != len
        || tip_height != Some(len as u32 - 1)
    {
        return Err(CacheError::Corrupt("indices do not cover the block log".into()));
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xuni_core::crypto::RistrettoOracle;
    use xuni_core::genesis::genesis_block;
    use std::sync::atomic::{AtomicBool, Ordering};
    use xuni_core::types::{BlockHeader, TransactionOutput};

    fn ledger() -> Ledger {
        Ledger::in_memory(Currency::default(), CheckpointTable::new(), Arc::new(RistrettoOracle))
    }

    fn coinbase_block(ledger: &Ledger, nonce: u32) -> Block {
        let currency = ledger.currency();
        let height = ledger.height();
        let tip = ledger.tip().unwrap();
        let parent = ledger.block(tip.height).unwrap();
        let reward = currency.base_reward(height, ledger.already_generated_coins());
        Block {
            header: BlockHeader {
                major_version: currency.block_major_version(height),
                minor_version: 0,
                timestamp: parent.header.timestamp + 120,
                previous_block_hash: tip.hash,
                nonce,
            },
            transactions: vec![Transaction {
                version: 1,
                unlock_time: currency.coinbase_unlock_time(height),
                inputs: vec![TransactionInput::Generation { height }],
                outputs: vec![TransactionOutput::key(reward, xuni_core::crypto::hash_to_public_key(b"miner"))],
                extra: vec![],
                signatures: vec![],
            }],
        }
    }

    #[test]
    fn empty_ledger() {
        let ledger = ledger();
        assert_eq!(ledger.height(), 0);
        assert!(ledger.tip().is_none());
        assert_eq!(ledger.cache_status(), CacheStatus::Valid);
        assert_eq!(ledger.already_generated_coins(), 0);
    }

    #[test]
    fn append_genesis_and_query() {
        let ledger = ledger();
        let genesis = genesis_block(ledger.currency());
        let info = ledger.append_block(&genesis).unwrap();
        assert_eq!(info.height, 0);
        assert_eq!(ledger.height(), 1);
        assert_eq!(ledger.block_hash(0), Some(info.hash));
        assert_eq!(ledger.block_by_hash(&info.hash), Some(genesis.clone()));

        let coinbase_hash = genesis.transactions[0].hash().unwrap();
        assert!(ledger.has_transaction(&coinbase_hash));
        assert_eq!(ledger.transaction(&coinbase_hash), Some(genesis.transactions[0].clone()));
        assert_eq!(ledger.transaction_index(&coinbase_hash), Some(TransactionIndex { block: 0, transaction: 0 }));
        assert_eq!(ledger.global_output_indexes(&coinbase_hash), Some(vec![0, 1]));
        assert!(ledger.is_dirty());
    }

    #[test]
    fn rejected_block_changes_nothing() {
        let ledger = ledger();
        ledger.append_block(&genesis_block(ledger.currency())).unwrap();
        let before = ledger.indices();
        let mut block = coinbase_block(&ledger, 1);
        block.transactions[0].outputs[0].amount += 1;
        assert!(matches!(ledger.append_block(&block), Err(LedgerError::Block(BlockError::InvalidReward { .. }))));
        assert_eq!(ledger.height(), 1);
        assert_eq!(ledger.indices(), before);
    }

    #[test]
    fn rollback_is_inverse_of_append() {
        let ledger = ledger();
        ledger.append_block(&genesis_block(ledger.currency())).unwrap();
        let before = ledger.indices();
        let block = coinbase_block(&ledger, 1);
        ledger.append_block(&block).unwrap();
        assert_eq!(ledger.rollback_to(ledger.height() - 1).unwrap(), vec![block]);
        assert_eq!(ledger.indices(), before);
        assert_eq!(ledger.height(), 1);
    }

    #[test]
    fn rollback_above_height_rejected() {
        let ledger = ledger();
        assert!(matches!(ledger.rollback_to(1), Err(LedgerError::InvalidRollback { target: 1, height: 0 })));
        assert!(ledger.rollback_to(0).unwrap().is_empty());
    }

    #[test]
    fn reorganize_swaps_suffix() {
        let ledger = ledger();
        ledger.append_block(&genesis_block(ledger.currency())).unwrap();
        let original = coinbase_block(&ledger, 1);
        ledger.append_block(&original).unwrap();

        let alternative_ledger = super::tests::ledger();
        alternative_ledger.append_block(&genesis_block(ledger.currency())).unwrap();
        let first = coinbase_block(&alternative_ledger, 2);
        alternative_ledger.append_block(&first).unwrap();
        let second = coinbase_block(&alternative_ledger, 3);

        let replaced = ledger.reorganize(1, &[first.clone(), second]).unwrap();
        assert_eq!(replaced, vec![original]);
        assert_eq!(ledger.height(), 3);
        assert_eq!(ledger.block(1), Some(first));
    }

    #[test]
    fn failed_reorganize_restores_chain() {
        let ledger = ledger();
        ledger.append_block(&genesis_block(ledger.currency())).unwrap();
        let original = coinbase_block(&ledger, 1);
        ledger.append_block(&original).unwrap();
        let before = ledger.indices();

        let mut bad = original.clone();
        bad.header.nonce = 99;
        bad.transactions[0].outputs[0].amount += 1;
        assert!(ledger.reorganize(1, &[bad]).is_err());
        assert_eq!(ledger.height(), 2);
        assert_eq!(ledger.block(1), Some(original));
        assert_eq!(ledger.indices(), before);
    }

    #[test]
    fn far_future_block_refused_on_append() {
        let ledger = ledger();
        ledger.append_block(&genesis_block(ledger.currency())).unwrap();
        let before = ledger.indices();
        let mut block = coinbase_block(&ledger, 1);
        block.header.timestamp = u64::MAX - 5;
        assert!(matches!(
            ledger.append_block(&block),
            Err(LedgerError::Block(BlockError::TimestampInFuture { timestamp, .. })) if timestamp == u64::MAX - 5
        ));
        assert_eq!(ledger.height(), 1);
        assert_eq!(ledger.indices(), before);
    }

    /// Memory store whose appends fail once `failing` is set.
    struct FailingStore {
        inner: MemoryBlockStore,
        failing: Arc<AtomicBool>,
    }

    impl BlockStore for FailingStore {
        fn load_all(&mut self) -> Result<Vec<BlockEntry>, StorageError> {
            self.inner.load_all()
        }

        fn append(&mut self, entry: &BlockEntry) -> Result<(), StorageError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Io("disk full".into()));
            }
            self.inner.append(entry)
        }

        fn truncate(&mut self, len: u32) -> Result<(), StorageError> {
            self.inner.truncate(len)
        }

        fn flush(&mut self) -> Result<(), StorageError> {
            self.inner.flush()
        }

        fn len(&self) -> u32 {
            self.inner.len()
        }
    }

    #[test]
    fn failed_restore_reports_shortened_chain() {
        let failing = Arc::new(AtomicBool::new(false));
        let store = FailingStore { inner: MemoryBlockStore::new(), failing: Arc::clone(&failing) };
        let ledger = Ledger::from_parts(
            Box::new(store),
            None,
            LedgerOptions { load_cache: false, save_cache_on_shutdown: false },
            ChainRules::new(Currency::default(), CheckpointTable::new(), Arc::new(RistrettoOracle)),
        )
        .unwrap();
        ledger.append_block(&genesis_block(ledger.currency())).unwrap();
        let original = coinbase_block(&ledger, 1);
        ledger.append_block(&original).unwrap();
        ledger.append_block(&coinbase_block(&ledger, 2)).unwrap();

        let mut bad = original.clone();
        bad.header.nonce = 99;
        bad.transactions[0].outputs[0].amount += 1;
        failing.store(true, Ordering::SeqCst);
        let err = ledger.reorganize(1, &[bad]).unwrap_err();
        assert!(matches!(err, LedgerError::RestoreFailed { split_height: 1, height: 1, .. }));
        assert_eq!(err.kind(), xuni_core::error::ErrorKind::StorageIo);
        assert_eq!(ledger.height(), 1);
    }

    #[test]
    fn genesis_cannot_be_reorganized() {
        let ledger = ledger();
        ledger.append_block(&genesis_block(ledger.currency())).unwrap();
        assert!(matches!(
            ledger.reorganize(0, &[]),
            Err(LedgerError::Block(BlockError::AlternativeNotAllowed { height: 0, chain_height: 1 }))
        ));
    }

    #[test]
    fn checkpointed_block_cannot_be_rolled_back() {
        let currency = Currency::default();
        let genesis = genesis_block(&currency);
        let mut checkpoints = CheckpointTable::new();
        checkpoints.add_checkpoint(0, genesis.hash().unwrap()).unwrap();
        let ledger = Ledger::in_memory(currency, checkpoints, Arc::new(RistrettoOracle));
        ledger.append_block(&genesis).unwrap();
        ledger.append_block(&coinbase_block(&ledger, 1)).unwrap();

        assert!(matches!(
            ledger.rollback_to(0),
            Err(LedgerError::CheckpointedRollback { target: 0, checkpoint: 0 })
        ));
        assert_eq!(ledger.rollback_to(1).unwrap().len(), 1);
        assert_eq!(ledger.verify_checkpoints().unwrap(), Some(0));
    }

    #[test]
    fn random_outputs_respect_unlock() {
        let ledger = ledger();
        let currency = ledger.currency().clone();
        ledger.append_block(&genesis_block(&currency)).unwrap();
        let genesis_amount = genesis_block(&currency).transactions[0].outputs[0].amount;

        // Genesis coinbase outputs unlock at height 10.
        let picked = ledger.random_outputs_for_amounts(&[genesis_amount], 5);
        assert!(picked[0].outputs.is_empty());
        while ledger.height() < 10 {
            let nonce = ledger.height();
            ledger.append_block(&coinbase_block(&ledger, nonce)).unwrap();
        }
        let picked = ledger.random_outputs_for_amounts(&[genesis_amount, 12345], 5);
        assert_eq!(picked[0].amount, genesis_amount);
        assert!(!picked[0].outputs.is_empty());
        assert!(picked[0].outputs.windows(2).all(|w| w[0].global_index < w[1].global_index));
        assert!(picked[1].outputs.is_empty());
        assert!(ledger.output_count(genesis_amount) >= picked[0].outputs.len());
    }

    #[test]
    fn size_limit_exposed() {
        let ledger = ledger();
        assert!(ledger.current_cumulative_blocksize_limit() > 0);
    }
}
