//! Chain-aware validation of blocks and transactions.
//!
//! [`ChainRules`] bundles the currency policy, the checkpoint table and the
//! crypto oracle. Every check reads a [`LedgerState`] and never mutates it, so
//! a rejected block leaves no trace.
//!
//! Block validation order:
//!
//! 1. transaction and output counts, transaction hashes, duplicate block,
//!    parent linkage, major version
//! 2. checkpoint pin
//! 3. timestamp against the median of the last
//!    [`BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW_V1`] blocks
//! 4. coinbase shape, duplicate transactions
//! 5. every other transaction, with spends claimed earlier in the block
//! 6. cumulative size and coinbase reward
//!
//! The wall-clock bound of [`ChainRules::check_future_timestamp`] applies to
//! newly admitted blocks only, so replaying the stored log is deterministic.

use std::collections::HashSet;
use std::sync::Arc;

use xuni_consensus::CheckpointTable;
use xuni_core::constants::{
    BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW_V1, CRYPTONOTE_BLOCK_FUTURE_TIME_LIMIT_V1,
    CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE,
    CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE, CRYPTONOTE_REWARD_BLOCKS_WINDOW,
};
use xuni_core::crypto::CryptoOracle;
use xuni_core::currency::{Currency, median};
use xuni_core::error::{BlockError, TransactionError};
use xuni_core::types::{
    Block, BlockInfo, Hash256, KeyImage, OutputTarget, PublicKey, Signature, Transaction,
    TransactionInput, relative_output_offsets_to_absolute,
};
use xuni_core::validation::{
    ValidatedTransaction, check_coinbase_structure, check_inputs_structure, check_money,
    check_outputs,
};

use crate::state::{BlockEntry, LedgerState, TransactionEntry};

/// Spends claimed by transactions earlier in the block under validation.
#[derive(Debug, Default)]
pub struct BlockSpends {
    key_images: HashSet<KeyImage>,
    multisignature_outputs: HashSet<(u64, u32)>,
}

impl BlockSpends {
    fn claim(&mut self, tx: &Transaction) {
        for input in &tx.inputs {
            match input {
                TransactionInput::Key { key_image, .. } => {
                    self.key_images.insert(*key_image);
                }
                TransactionInput::Multisignature { amount, output_index, .. } => {
                    self.multisignature_outputs.insert((*amount, *output_index));
                }
                TransactionInput::Generation { .. } => {}
            }
        }
    }
}

/// Consensus rules evaluated against a [`LedgerState`].
pub struct ChainRules {
    pub currency: Currency,
    pub checkpoints: CheckpointTable,
    pub oracle: Arc<dyn CryptoOracle>,
}

impl ChainRules {
    pub fn new(currency: Currency, checkpoints: CheckpointTable, oracle: Arc<dyn CryptoOracle>) -> Self {
        Self { currency, checkpoints, oracle }
    }

    /// Cumulative size limit for the next block: twice the effective median
    /// of recent block sizes, never above the height-based growth cap.
    pub fn cumulative_size_limit(&self, state: &LedgerState) -> u64 {
        let median = recent_size_median(state).max(CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE);
        median
            .saturating_mul(2)
            .min(self.currency.max_block_cumulative_size(state.len()))
    }

    pub fn validate_transaction_outputs(&self, tx: &Transaction) -> Result<(), TransactionError> {
        check_outputs(tx, &self.currency, self.oracle.as_ref())
    }

    /// Resolve and verify every input of `tx` for inclusion in the block at `height`.
    ///
    /// Returns the highest block whose outputs were referenced, or an empty
    /// [`BlockInfo`] when none was.
    pub fn validate_transaction_inputs(
        &self,
        state: &LedgerState,
        tx: &Transaction,
        height: u32,
    ) -> Result<BlockInfo, TransactionError> {
        // A spent key image rejects the transaction whatever else is wrong with it.
        if let Some(key_image) = tx.key_images().find(|image| state.indices.spent_key_images.contains(image)) {
            return Err(TransactionError::KeyImageUsed(key_image.to_string()));
        }
        check_inputs_structure(tx, self.oracle.as_ref())?;
        self.resolve_inputs(state, tx, height, &BlockSpends::default())
    }

    /// Full standalone validation of a non-coinbase transaction.
    pub fn validate_transaction(
        &self,
        state: &LedgerState,
        tx: &Transaction,
        height: u32,
        check_size: bool,
    ) -> Result<(ValidatedTransaction, BlockInfo), TransactionError> {
        if check_size {
            let max = self
                .cumulative_size_limit(state)
                .saturating_sub(CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE);
            let size = tx.blob_size()?;
            if size > max {
                return Err(TransactionError::TooBig { size, max });
            }
        }
        self.check_transaction(state, tx, height, &BlockSpends::default())
    }

    /// Checks that need no ring resolution, then the chain-dependent inputs.
    fn check_transaction(
        &self,
        state: &LedgerState,
        tx: &Transaction,
        height: u32,
        spends: &BlockSpends,
    ) -> Result<(ValidatedTransaction, BlockInfo), TransactionError> {
        if !self.currency.is_transaction_version_supported(tx.version) {
            return Err(TransactionError::WrongVersion(tx.version));
        }
        self.validate_transaction_outputs(tx)?;
        check_inputs_structure(tx, self.oracle.as_ref())?;
        let totals = check_money(tx, &self.currency)?;
        let max_used = self.resolve_inputs(state, tx, height, spends)?;
        Ok((totals, max_used))
    }

    /// Spent-set, reference, unlock and signature checks of structurally valid inputs.
    fn resolve_inputs(
        &self,
        state: &LedgerState,
        tx: &Transaction,
        height: u32,
        spends: &BlockSpends,
    ) -> Result<BlockInfo, TransactionError> {
        let prefix_hash = tx.prefix_hash()?;
        let tip_timestamp = state.tip().map_or(0, |entry| entry.block.header.timestamp);
        let mut max_used: Option<u32> = None;

        for (index, (input, signatures)) in tx.inputs.iter().zip(&tx.signatures).enumerate() {
            match input {
                TransactionInput::Generation { .. } => return Err(TransactionError::UnexpectedGeneration),
                TransactionInput::Key { amount, output_offsets, key_image } => {
                    if state.indices.spent_key_images.contains(key_image)
                        || spends.key_images.contains(key_image)
                    {
                        return Err(TransactionError::KeyImageUsed(key_image.to_string()));
                    }
                    let ring = self.ring_keys(
                        state,
                        index,
                        *amount,
                        output_offsets,
                        height,
                        tip_timestamp,
                        &mut max_used,
                    )?;
                    if !self.oracle.verify_ring_signature(&prefix_hash, key_image, &ring, signatures) {
                        return Err(TransactionError::InvalidRingSignature(index));
                    }
                }
                TransactionInput::Multisignature { amount, signature_count, output_index, term } => {
                    let (usage, source, output) = state
                        .multisignature_output(*amount, *output_index)
                        .ok_or(TransactionError::InvalidReference(index))?;
                    if usage.transaction.block >= height {
                        return Err(TransactionError::InvalidReference(index));
                    }
                    if usage.is_used || spends.multisignature_outputs.contains(&(*amount, *output_index)) {
                        return Err(TransactionError::MultisignatureUsed(index));
                    }
                    let OutputTarget::Multisignature { keys, required_signature_count, term: output_term } =
                        &output.target
                    else {
                        return Err(TransactionError::KeysMismatch(index));
                    };
                    if output_term != term || required_signature_count != signature_count {
                        return Err(TransactionError::KeysMismatch(index));
                    }
                    if !self.currency.is_unlocked(source.unlock_time, height, tip_timestamp) {
                        return Err(TransactionError::OutputLocked(index));
                    }
                    if *term > 0 && u64::from(height) < u64::from(usage.transaction.block) + u64::from(*term) {
                        return Err(TransactionError::DepositLocked(index));
                    }
                    if !self.verify_multisignature(&prefix_hash, keys, signatures) {
                        return Err(TransactionError::InvalidMultisignature(index));
                    }
                    max_used = max_used.max(Some(usage.transaction.block));
                }
            }
        }

        Ok(max_used
            .and_then(|h| state.entry(h))
            .map(BlockEntry::info)
            .unwrap_or_default())
    }

    /// Public keys of the ring members referenced by a key input.
    #[allow(clippy::too_many_arguments)]
    fn ring_keys(
        &self,
        state: &LedgerState,
        index: usize,
        amount: u64,
        output_offsets: &[u32],
        height: u32,
        tip_timestamp: u64,
        max_used: &mut Option<u32>,
    ) -> Result<Vec<PublicKey>, TransactionError> {
        let absolute = relative_output_offsets_to_absolute(output_offsets)
            .ok_or(TransactionError::InvalidReference(index))?;

        let mut ring = Vec::with_capacity(absolute.len());
        for global_index in absolute {
            let (reference, source, output) = state
                .key_output(amount, global_index)
                .ok_or(TransactionError::InvalidReference(index))?;
            if reference.transaction.block >= height {
                return Err(TransactionError::InvalidReference(index));
            }
            if !self.currency.is_unlocked(source.unlock_time, height, tip_timestamp) {
                return Err(TransactionError::OutputLocked(index));
            }
            let OutputTarget::Key { key } = output.target else {
                return Err(TransactionError::InvalidReference(index));
            };
            *max_used = (*max_used).max(Some(reference.transaction.block));
            ring.push(key);
        }
        Ok(ring)
    }

    /// Each signature must match a distinct key, keys consumed in order.
    fn verify_multisignature(&self, prefix_hash: &Hash256, keys: &[PublicKey], signatures: &[Signature]) -> bool {
        let mut keys = keys.iter();
        signatures
            .iter()
            .all(|signature| keys.any(|key| self.oracle.verify_signature(prefix_hash, key, signature)))
    }

    /// Validate `block` as the next block of `state`.
    pub fn validate_block(&self, state: &LedgerState, block: &Block) -> Result<BlockEntry, BlockError> {
        check_entry_counts(block)?;
        let hashes = block
            .transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| tx.hash().map_err(|source| BlockError::Transaction { index, source }))
            .collect::<Result<Vec<_>, _>>()?;
        let hash = block.hash_with(&hashes);
        let height = state.len();

        if state.indices.block_index.contains_key(&hash) {
            return Err(BlockError::AlreadyExists(hash.to_string()));
        }
        let tip_hash = state.tip_hash();
        if block.header.previous_block_hash != tip_hash {
            return Err(BlockError::InvalidPrevHash {
                got: block.header.previous_block_hash.to_string(),
                tip: tip_hash.to_string(),
            });
        }
        let expected_version = self.currency.block_major_version(height);
        if block.header.major_version != expected_version {
            return Err(BlockError::WrongVersion { got: block.header.major_version, expected: expected_version });
        }
        if self.checkpoints.check_block(height, &hash).is_err() {
            return Err(BlockError::CheckpointMismatch { height });
        }
        self.check_timestamp(state, block)?;

        let coinbase = block.coinbase().ok_or(BlockError::NoCoinbase)?;
        if !self.currency.is_transaction_version_supported(coinbase.version) {
            return Err(BlockError::InvalidCoinbase(format!("version {}", coinbase.version)));
        }
        let coinbase_total =
            check_coinbase_structure(coinbase, height, &self.currency).map_err(BlockError::InvalidCoinbase)?;

        let mut seen = HashSet::with_capacity(hashes.len());
        for tx_hash in &hashes {
            if !seen.insert(*tx_hash) || state.indices.transaction_map.contains_key(tx_hash) {
                return Err(BlockError::DuplicateTransaction(tx_hash.to_string()));
            }
        }

        let mut cumulative_size = coinbase
            .blob_size()
            .map_err(|source| BlockError::Transaction { index: 0, source })?;
        let mut fees = 0u64;
        let mut spends = BlockSpends::default();
        for (index, tx) in block.transactions.iter().enumerate().skip(1) {
            let wrap = |source: TransactionError| BlockError::Transaction { index, source };
            let (totals, _) = self.check_transaction(state, tx, height, &spends).map_err(wrap)?;
            spends.claim(tx);
            fees = fees.checked_add(totals.fee).ok_or(wrap(TransactionError::AmountOverflow))?;
            cumulative_size = cumulative_size.saturating_add(tx.blob_size().map_err(wrap)?);
        }

        let max_size = self.currency.max_block_cumulative_size(height);
        if cumulative_size > max_size {
            return Err(BlockError::OversizedBlock { size: cumulative_size, max: max_size });
        }

        let already_generated = state.already_generated_coins();
        let median_size = recent_size_median(state);
        let reward = self
            .currency
            .block_reward(height, median_size, cumulative_size, already_generated, fees)
            .ok_or(BlockError::OversizedBlock {
                size: cumulative_size,
                max: median_size.max(CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE).saturating_mul(2),
            })?;
        if coinbase_total > reward.reward {
            return Err(BlockError::InvalidReward { got: coinbase_total, expected: reward.reward });
        }

        let global_indexes = state.assign_global_indexes(&block.transactions);
        Ok(BlockEntry {
            block: block.clone(),
            height,
            hash,
            cumulative_size,
            already_generated_coins: already_generated.saturating_add(coinbase_total.saturating_sub(fees)),
            transactions: hashes
                .into_iter()
                .zip(global_indexes)
                .map(|(hash, global_output_indexes)| TransactionEntry { hash, global_output_indexes })
                .collect(),
        })
    }

    /// Refuse a block timestamped more than
    /// [`CRYPTONOTE_BLOCK_FUTURE_TIME_LIMIT_V1`] seconds past `now`.
    pub fn check_future_timestamp(&self, block: &Block, now: u64) -> Result<(), BlockError> {
        let limit = now.saturating_add(CRYPTONOTE_BLOCK_FUTURE_TIME_LIMIT_V1);
        if block.header.timestamp > limit {
            return Err(BlockError::TimestampInFuture { timestamp: block.header.timestamp, limit });
        }
        Ok(())
    }

    fn check_timestamp(&self, state: &LedgerState, block: &Block) -> Result<(), BlockError> {
        let window = BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW_V1;
        if state.blocks.len() < window {
            return Ok(());
        }
        let timestamps = state.blocks[state.blocks.len() - window..]
            .iter()
            .map(|entry| entry.block.header.timestamp)
            .collect();
        let median = median(timestamps);
        if block.header.timestamp < median {
            return Err(BlockError::TimestampTooOld { timestamp: block.header.timestamp, median });
        }
        Ok(())
    }
}

/// Transaction and output positions are indexed as `u16`.
fn check_entry_counts(block: &Block) -> Result<(), BlockError> {
    let count = block.transactions.len();
    if u16::try_from(count.saturating_sub(1)).is_err() {
        return Err(BlockError::TooManyTransactions(count));
    }
    for (index, tx) in block.transactions.iter().enumerate() {
        if u16::try_from(tx.outputs.len().saturating_sub(1)).is_err() {
            return Err(BlockError::TooManyOutputs { index, count: tx.outputs.len() });
        }
    }
    Ok(())
}

/// Median cumulative size of the last [`CRYPTONOTE_REWARD_BLOCKS_WINDOW`] blocks.
fn recent_size_median(state: &LedgerState) -> u64 {
    let start = state.blocks.len().saturating_sub(CRYPTONOTE_REWARD_BLOCKS_WINDOW);
    median(state.blocks[start..].iter().map(|entry| entry.cumulative_size).collect())
}
