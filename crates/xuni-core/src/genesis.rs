//! Genesis block definition.
//!
//! The genesis block (height 0) carries a single coinbase paying the height-0
//! base reward to two provably unspendable keys. Every node derives the
//! identical block from the currency parameters.

use crate::constants::GENESIS_NONCE;
use crate::crypto::hash_to_public_key;
use crate::currency::Currency;
use crate::error::TransactionError;
use crate::types::{Block, BlockHeader, Hash256, Transaction, TransactionInput, TransactionOutput};

/// Message embedded in the genesis coinbase extra field.
pub const GENESIS_MESSAGE: &[u8] = b"Xuni genesis: ledger of record, April 2020.";

/// Seeds of the two genesis output keys.
const GENESIS_OUTPUT_SEEDS: [&[u8]; 2] = [b"xuni genesis output 0", b"xuni genesis output 1"];

/// Build the genesis coinbase for `currency`.
pub fn genesis_coinbase(currency: &Currency) -> Transaction {
    let reward = currency.base_reward(0, 0);
    let first = reward / 2;
    Transaction {
        version: 1,
        unlock_time: currency.coinbase_unlock_time(0),
        inputs: vec![TransactionInput::Generation { height: 0 }],
        outputs: vec![
            TransactionOutput::key(first, hash_to_public_key(GENESIS_OUTPUT_SEEDS[0])),
            TransactionOutput::key(reward - first, hash_to_public_key(GENESIS_OUTPUT_SEEDS[1])),
        ],
        extra: GENESIS_MESSAGE.to_vec(),
        signatures: vec![],
    }
}

/// The genesis block for `currency`.
pub fn genesis_block(currency: &Currency) -> Block {
    Block {
        header: BlockHeader {
            major_version: currency.block_major_version(0),
            minor_version: 0,
            timestamp: currency.genesis_timestamp,
            previous_block_hash: Hash256::ZERO,
            nonce: GENESIS_NONCE,
        },
        transactions: vec![genesis_coinbase(currency)],
    }
}

/// Hash of the genesis block for `currency`.
pub fn genesis_hash(currency: &Currency) -> Result<Hash256, TransactionError> {
    genesis_block(currency).hash()
}
