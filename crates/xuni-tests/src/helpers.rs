//! Shared chain-building helpers for scenario and property tests.
//!
//! [`TestChain`] wraps a [`Ledger`] that already holds the genesis block and
//! a small wallet of the coinbase outputs it mined. Helpers build signed ring
//! spends and multisignature spends against the ledger's own output index.

use std::sync::Arc;

use xuni_consensus::CheckpointTable;
use xuni_core::constants::CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW;
use xuni_core::crypto::{KeyPair, RistrettoOracle};
use xuni_core::currency::Currency;
use xuni_core::genesis::genesis_block;
use xuni_core::types::{
    Block, BlockHeader, OutputTarget, PublicKey, Transaction, TransactionInput, TransactionOutput,
    absolute_output_offsets_to_relative,
};
use xuni_core::validation::check_money;
use xuni_node_lib::{Ledger, LedgerError, OutputForAmount};

/// Seconds between consecutive test blocks.
pub const BLOCK_INTERVAL: u64 = 120;

/// An in-memory ledger over the default currency.
pub fn test_ledger(checkpoints: CheckpointTable) -> Ledger {
    Ledger::in_memory(Currency::default(), checkpoints, Arc::new(RistrettoOracle))
}

/// A fresh key and a key output of `amount` paying to it.
pub fn key_output(amount: u64) -> (KeyPair, TransactionOutput) {
    let keys = KeyPair::generate();
    let output = TransactionOutput::key(amount, keys.public_key());
    (keys, output)
}

/// An M-of-N output over `keys`. A non-zero `term` makes it a deposit.
pub fn multisignature_output(amount: u64, keys: &[KeyPair], required: u8, term: u32) -> TransactionOutput {
    TransactionOutput {
        amount,
        target: OutputTarget::Multisignature {
            keys: keys.iter().map(KeyPair::public_key).collect(),
            required_signature_count: required,
            term,
        },
    }
}

/// A key output the test wallet can spend.
#[derive(Debug, Clone)]
pub struct OwnedOutput {
    pub keys: KeyPair,
    pub amount: u64,
    pub global_index: u32,
    /// Height of the block that created the output.
    pub height: u32,
}

/// A multisignature output the test wallet can spend.
#[derive(Debug, Clone)]
pub struct OwnedMultisignature {
    pub keys: Vec<KeyPair>,
    pub required: u8,
    pub amount: u64,
    pub index: u32,
    pub term: u32,
}

/// A ledger plus the outputs mined into it.
pub struct TestChain {
    pub ledger: Ledger,
    pub wallet: Vec<OwnedOutput>,
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TestChain {
    /// In-memory chain holding only the genesis block.
    pub fn new() -> Self {
        Self::with_ledger(test_ledger(CheckpointTable::new()))
    }

    /// Wrap `ledger`, appending the genesis block when it is empty.
    pub fn with_ledger(ledger: Ledger) -> Self {
        if ledger.height() == 0 {
            ledger.append_block(&genesis_block(ledger.currency())).unwrap();
        }
        Self { ledger, wallet: Vec::new() }
    }

    pub fn height(&self) -> u32 {
        self.ledger.height()
    }

    /// The next block carrying `transactions`, its coinbase paying the base
    /// reward plus fees to `miner`.
    pub fn next_block(&self, transactions: Vec<Transaction>, miner: PublicKey) -> Block {
        let currency = self.ledger.currency();
        let height = self.ledger.height();
        let tip = self.ledger.tip().unwrap();
        let parent = self.ledger.block(tip.height).unwrap();
        let fees: u64 = transactions
            .iter()
            .map(|tx| check_money(tx, currency).map_or(0, |totals| totals.fee))
            .sum();
        let reward = currency.base_reward(height, self.ledger.already_generated_coins()) + fees;

        let coinbase = Transaction {
            version: 1,
            unlock_time: currency.coinbase_unlock_time(height),
            inputs: vec![TransactionInput::Generation { height }],
            outputs: vec![TransactionOutput::key(reward, miner)],
            extra: vec![],
            signatures: vec![],
        };
        let mut block_transactions = vec![coinbase];
        block_transactions.extend(transactions);

        Block {
            header: BlockHeader {
                major_version: currency.block_major_version(height),
                minor_version: 0,
                timestamp: parent.header.timestamp + BLOCK_INTERVAL,
                previous_block_hash: tip.hash,
                nonce: height,
            },
            transactions: block_transactions,
        }
    }

    /// Mine `transactions` into the next block, keeping its coinbase output.
    pub fn mine(&mut self, transactions: Vec<Transaction>) -> Result<Block, LedgerError> {
        let miner = KeyPair::generate();
        let block = self.next_block(transactions, miner.public_key());
        let info = self.ledger.append_block(&block)?;
        self.receive(&block.transactions[0], 0, miner, info.height);
        Ok(block)
    }

    /// Mine `count` coinbase-only blocks.
    pub fn mine_empty(&mut self, count: u32) -> Vec<Block> {
        (0..count).map(|_| self.mine(vec![]).unwrap()).collect()
    }

    /// Record output `output` of the mined `tx` as owned by `keys`.
    pub fn receive(&mut self, tx: &Transaction, output: usize, keys: KeyPair, height: u32) {
        let tx_hash = tx.hash().unwrap();
        let global_index = self.ledger.global_output_indexes(&tx_hash).unwrap()[output];
        self.wallet.push(OwnedOutput { keys, amount: tx.outputs[output].amount, global_index, height });
    }

    /// Remove and return the oldest owned output spendable in the next block,
    /// mining empty blocks until one unlocks.
    pub fn take_spendable(&mut self) -> OwnedOutput {
        if self.wallet.is_empty() {
            self.mine_empty(1);
        }
        let unlock_height = self.wallet[0].height + CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW;
        if self.height() < unlock_height {
            self.mine_empty(unlock_height - self.height());
        }
        self.wallet.remove(0)
    }

    /// Sign a transaction spending `owned` into `outputs`, each ring padded
    /// with up to `mixins` unlocked decoys of the same amount.
    pub fn spend(&self, owned: &[OwnedOutput], outputs: Vec<TransactionOutput>, mixins: usize) -> Transaction {
        let mut rings = Vec::with_capacity(owned.len());
        let mut inputs = Vec::with_capacity(owned.len());
        for output in owned {
            let (ring, signer, offsets) = self.ring_for(output, mixins);
            inputs.push(TransactionInput::Key {
                amount: output.amount,
                output_offsets: offsets,
                key_image: output.keys.key_image(),
            });
            rings.push((ring, signer));
        }

        let mut tx = Transaction { version: 1, unlock_time: 0, inputs, outputs, extra: vec![], signatures: vec![] };
        let prefix_hash = tx.prefix_hash().unwrap();
        tx.signatures = owned
            .iter()
            .zip(&rings)
            .map(|(output, (ring, signer))| output.keys.generate_ring_signature(&prefix_hash, ring, *signer).unwrap())
            .collect();
        tx
    }

    fn ring_for(&self, owned: &OwnedOutput, mixins: usize) -> (Vec<PublicKey>, usize, Vec<u32>) {
        let mut members: Vec<OutputForAmount> = self
            .ledger
            .random_outputs_for_amounts(&[owned.amount], mixins + 1)
            .into_iter()
            .flat_map(|candidates| candidates.outputs)
            .filter(|candidate| candidate.global_index != owned.global_index)
            .take(mixins)
            .collect();
        members.push(OutputForAmount { global_index: owned.global_index, key: owned.keys.public_key() });
        members.sort_by_key(|member| member.global_index);

        let signer = members.iter().position(|member| member.global_index == owned.global_index).unwrap();
        let absolute: Vec<u32> = members.iter().map(|member| member.global_index).collect();
        let ring = members.iter().map(|member| member.key).collect();
        (ring, signer, absolute_output_offsets_to_relative(&absolute))
    }

    /// Locate output `output` of the mined `tx` as a multisignature output.
    pub fn multisignature(&self, tx: &Transaction, output: usize, keys: Vec<KeyPair>) -> OwnedMultisignature {
        let tx_hash = tx.hash().unwrap();
        let index = self.ledger.global_output_indexes(&tx_hash).unwrap()[output];
        let OutputTarget::Multisignature { required_signature_count, term, .. } = &tx.outputs[output].target else {
            panic!("output {output} is not a multisignature output");
        };
        OwnedMultisignature {
            keys,
            required: *required_signature_count,
            amount: tx.outputs[output].amount,
            index,
            term: *term,
        }
    }

    /// Spend `owned` into `outputs`, signed by its first `required` keys in order.
    pub fn spend_multisignature(&self, owned: &OwnedMultisignature, outputs: Vec<TransactionOutput>) -> Transaction {
        let mut tx = Transaction {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Multisignature {
                amount: owned.amount,
                signature_count: owned.required,
                output_index: owned.index,
                term: owned.term,
            }],
            outputs,
            extra: vec![],
            signatures: vec![],
        };
        let prefix_hash = tx.prefix_hash().unwrap();
        tx.signatures = vec![
            owned.keys[..usize::from(owned.required)]
                .iter()
                .map(|keys| keys.generate_signature(&prefix_hash))
                .collect(),
        ];
        tx
    }
}

