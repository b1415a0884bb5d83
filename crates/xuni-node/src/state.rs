//! Owned ledger state: the block sequence and every index derived from it.
//!
//! [`LedgerState::apply`] and [`LedgerState::revert_tip`] are exact inverses.
//! Neither validates anything; callers run the checks in
//! [`validation`](crate::validation) first and only apply accepted blocks.

use std::collections::{HashMap, HashSet};

use xuni_core::currency::Currency;
use xuni_core::types::{
    Block, BlockInfo, Hash256, KeyImage, OutputTarget, Transaction, TransactionIndex,
    TransactionInput, TransactionOutput,
};

/// Per-transaction record stored alongside its block.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TransactionEntry {
    pub hash: Hash256,
    /// Global index of each output among outputs of the same amount and kind.
    pub global_output_indexes: Vec<u32>,
}

/// A block as stored in the block log.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BlockEntry {
    pub block: Block,
    pub height: u32,
    pub hash: Hash256,
    /// Sum of the serialized sizes of every transaction, coinbase included.
    pub cumulative_size: u64,
    /// Coins minted up to and including this block.
    pub already_generated_coins: u64,
    pub transactions: Vec<TransactionEntry>,
}

impl BlockEntry {
    pub fn info(&self) -> BlockInfo {
        BlockInfo { height: self.height, hash: self.hash }
    }
}

/// Location of a key output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, bincode::Encode, bincode::Decode)]
pub struct OutputReference {
    pub transaction: TransactionIndex,
    pub output: u16,
}

/// Location and spent flag of a multisignature output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct MultisignatureOutputUsage {
    pub transaction: TransactionIndex,
    pub output: u16,
    pub is_used: bool,
}

/// Running deposit totals after a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct DepositEntry {
    /// Amount currently locked in deposits.
    pub locked: u64,
    /// Interest committed by every deposit created so far.
    pub interest: u64,
}

/// Indices derived from the block sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Indices {
    pub block_index: HashMap<Hash256, u32>,
    pub transaction_map: HashMap<Hash256, TransactionIndex>,
    pub spent_key_images: HashSet<KeyImage>,
    /// Key outputs per amount, in global index order.
    pub outputs: HashMap<u64, Vec<OutputReference>>,
    /// Multisignature outputs per amount, in global index order.
    pub multisignature_outputs: HashMap<u64, Vec<MultisignatureOutputUsage>>,
    /// One entry per block height.
    pub deposit_index: Vec<DepositEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub blocks: Vec<BlockEntry>,
    pub indices: Indices,
}

impl LedgerState {
    pub fn len(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tip(&self) -> Option<&BlockEntry> {
        self.blocks.last()
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.tip().map(|entry| entry.hash).unwrap_or(Hash256::ZERO)
    }

    pub fn entry(&self, height: u32) -> Option<&BlockEntry> {
        self.blocks.get(height as usize)
    }

    pub fn already_generated_coins(&self) -> u64 {
        self.tip().map(|entry| entry.already_generated_coins).unwrap_or(0)
    }

    pub fn transaction_at(&self, index: TransactionIndex) -> Option<&Transaction> {
        self.entry(index.block)?
            .block
            .transactions
            .get(usize::from(index.transaction))
    }

    /// The transaction holding a key output, and the output itself.
    pub fn key_output(&self, amount: u64, global_index: u32) -> Option<(OutputReference, &Transaction, &TransactionOutput)> {
        let reference = *self.indices.outputs.get(&amount)?.get(global_index as usize)?;
        let tx = self.transaction_at(reference.transaction)?;
        let output = tx.outputs.get(usize::from(reference.output))?;
        Some((reference, tx, output))
    }

    /// The transaction holding a multisignature output, its usage record and the output.
    pub fn multisignature_output(
        &self,
        amount: u64,
        global_index: u32,
    ) -> Option<(MultisignatureOutputUsage, &Transaction, &TransactionOutput)> {
        let usage = *self.indices.multisignature_outputs.get(&amount)?.get(global_index as usize)?;
        let tx = self.transaction_at(usage.transaction)?;
        let output = tx.outputs.get(usize::from(usage.output))?;
        Some((usage, tx, output))
    }

    /// Global output indexes the transactions of `block` receive when appended.
    pub fn assign_global_indexes(&self, transactions: &[Transaction]) -> Vec<Vec<u32>> {
        let mut key_next: HashMap<u64, u32> = HashMap::new();
        let mut multisig_next: HashMap<u64, u32> = HashMap::new();
        transactions
            .iter()
            .map(|tx| {
                tx.outputs
                    .iter()
                    .map(|output| {
                        let (next, existing) = match output.target {
                            OutputTarget::Key { .. } => (
                                &mut key_next,
                                self.indices.outputs.get(&output.amount).map_or(0, Vec::len),
                            ),
                            OutputTarget::Multisignature { .. } => (
                                &mut multisig_next,
                                self.indices.multisignature_outputs.get(&output.amount).map_or(0, Vec::len),
                            ),
                        };
                        let slot = next.entry(output.amount).or_insert(existing as u32);
                        let index = *slot;
                        *slot += 1;
                        index
                    })
                    .collect()
            })
            .collect()
    }

    /// Push an accepted block and index its contents.
    pub fn apply(&mut self, currency: &Currency, entry: BlockEntry) {
        let height = entry.height;
        let indices = &mut self.indices;
        let mut deposits = indices.deposit_index.last().copied().unwrap_or_default();

        indices.block_index.insert(entry.hash, height);
        // Positions fit in u16: validate_block refuses larger blocks.
        for (position, (tx, tx_entry)) in entry.block.transactions.iter().zip(&entry.transactions).enumerate() {
            let index = TransactionIndex { block: height, transaction: position as u16 };
            indices.transaction_map.insert(tx_entry.hash, index);

            for input in &tx.inputs {
                match input {
                    TransactionInput::Generation { .. } => {}
                    TransactionInput::Key { key_image, .. } => {
                        indices.spent_key_images.insert(*key_image);
                    }
                    TransactionInput::Multisignature { amount, output_index, term, .. } => {
                        if let Some(usage) = indices
                            .multisignature_outputs
                            .get_mut(amount)
                            .and_then(|outputs| outputs.get_mut(*output_index as usize))
                        {
                            usage.is_used = true;
                        }
                        if *term > 0 {
                            deposits.locked = deposits.locked.saturating_sub(*amount);
                        }
                    }
                }
            }

            for (output_position, output) in tx.outputs.iter().enumerate() {
                let output_position = output_position as u16;
                match &output.target {
                    OutputTarget::Key { .. } => {
                        indices
                            .outputs
                            .entry(output.amount)
                            .or_default()
                            .push(OutputReference { transaction: index, output: output_position });
                    }
                    OutputTarget::Multisignature { term, .. } => {
                        indices.multisignature_outputs.entry(output.amount).or_default().push(
                            MultisignatureOutputUsage { transaction: index, output: output_position, is_used: false },
                        );
                        if *term > 0 {
                            deposits.locked = deposits.locked.saturating_add(output.amount);
                            deposits.interest = deposits
                                .interest
                                .saturating_add(currency.calculate_interest(output.amount, *term));
                        }
                    }
                }
            }
        }

        indices.deposit_index.push(deposits);
        self.blocks.push(entry);
    }

    /// Pop the tip block and remove everything [`apply`](Self::apply) indexed for it.
    pub fn revert_tip(&mut self) -> Option<BlockEntry> {
        let entry = self.blocks.pop()?;
        let indices = &mut self.indices;

        for (tx, tx_entry) in entry.block.transactions.iter().zip(&entry.transactions).rev() {
            for output in tx.outputs.iter().rev() {
                match output.target {
                    OutputTarget::Key { .. } => pop_last(&mut indices.outputs, output.amount),
                    OutputTarget::Multisignature { .. } => {
                        pop_last(&mut indices.multisignature_outputs, output.amount)
                    }
                }
            }

            for input in &tx.inputs {
                match input {
                    TransactionInput::Generation { .. } => {}
                    TransactionInput::Key { key_image, .. } => {
                        indices.spent_key_images.remove(key_image);
                    }
                    TransactionInput::Multisignature { amount, output_index, .. } => {
                        if let Some(usage) = indices
                            .multisignature_outputs
                            .get_mut(amount)
                            .and_then(|outputs| outputs.get_mut(*output_index as usize))
                        {
                            usage.is_used = false;
                        }
                    }
                }
            }

            indices.transaction_map.remove(&tx_entry.hash);
        }

        indices.deposit_index.pop();
        indices.block_index.remove(&entry.hash);
        Some(entry)
    }
}

/// Remove the newest element of `map[amount]`, dropping the key once empty.
fn pop_last<T>(map: &mut HashMap<u64, Vec<T>>, amount: u64) {
    if let Some(values) = map.get_mut(&amount) {
        values.pop();
        if values.is_empty() {
            map.remove(&amount);
        }
    }
}
