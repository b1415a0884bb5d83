//! Core protocol types: keys, transactions, blocks and chain locators.
//!
//! All monetary values are in atomic units (1 XUNI = 10^6 units).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TransactionError;
use crate::merkle::merkle_root;

/// A 32-byte hash value.
///
/// Used for transaction hashes, block hashes and merkle roots (all BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used as the genesis parent.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// BLAKE3 of arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    /// Parse a 64-character hex string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A compressed curve point used as a one-time output key.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct PublicKey(pub [u8; 32]);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A key image: the unique spend tag of a key output.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct KeyImage(pub [u8; 32]);

impl fmt::Display for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A 64-byte signature: two 32-byte scalars `(c, r)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn from_parts(c: [u8; 32], r: [u8; 32]) -> Self {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&c);
        bytes[32..].copy_from_slice(&r);
        Self(bytes)
    }

    /// Split into the `(c, r)` halves.
    pub fn parts(&self) -> ([u8; 32], [u8; 32]) {
        let mut c = [0u8; 32];
        let mut r = [0u8; 32];
        c.copy_from_slice(&self.0[..32]);
        r.copy_from_slice(&self.0[32..]);
        (c, r)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

// serde only derives arrays up to 32 elements; signatures travel as hex.
impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// A transaction input.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum TransactionInput {
    /// Coinbase input minting the block reward at `height`.
    Generation { height: u32 },
    /// Ring input spending one of the referenced key outputs of `amount`.
    Key {
        amount: u64,
        /// Global output indexes of the ring members, delta encoded.
        output_offsets: Vec<u32>,
        key_image: KeyImage,
    },
    /// Spend of a multisignature output (a deposit when `term > 0`).
    Multisignature {
        amount: u64,
        signature_count: u8,
        /// Global index of the spent output among outputs of `amount`.
        output_index: u32,
        term: u32,
    },
}

impl TransactionInput {
    /// Amount consumed by the input. Zero for generation inputs.
    pub fn amount(&self) -> u64 {
        match self {
            Self::Generation { .. } => 0,
            Self::Key { amount, .. } | Self::Multisignature { amount, .. } => *amount,
        }
    }

    /// Number of signatures this input must carry.
    pub fn required_signatures(&self) -> usize {
        match self {
            Self::Generation { .. } => 0,
            Self::Key { output_offsets, .. } => output_offsets.len(),
            Self::Multisignature { signature_count, .. } => usize::from(*signature_count),
        }
    }
}

/// Destination of a transaction output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum OutputTarget {
    Key { key: PublicKey },
    /// M-of-N output. A non-zero `term` makes it a deposit locked for `term` blocks.
    Multisignature {
        keys: Vec<PublicKey>,
        required_signature_count: u8,
        term: u32,
    },
}

/// A transaction output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: OutputTarget,
}

impl TransactionOutput {
    pub fn key(amount: u64, key: PublicKey) -> Self {
        Self { amount, target: OutputTarget::Key { key } }
    }

    /// Deposit term, if this output is a deposit.
    pub fn deposit_term(&self) -> Option<u32> {
        match &self.target {
            OutputTarget::Multisignature { term, .. } if *term > 0 => Some(*term),
            _ => None,
        }
    }
}

/// A transaction.
///
/// Canonical field order: version, unlock time, inputs, outputs, extra,
/// signatures. `signatures[i]` holds the signatures of `inputs[i]`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    pub version: u8,
    /// Height (below `CRYPTONOTE_MAX_BLOCK_NUMBER`) or Unix timestamp before
    /// which the outputs cannot be spent.
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    /// Canonical binary encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Transaction hash: BLAKE3 of the canonical encoding.
    pub fn hash(&self) -> Result<Hash256, TransactionError> {
        Ok(Hash256::digest(&self.to_bytes()?))
    }

    /// Hash of everything but the signatures. This is the signed message.
    pub fn prefix_hash(&self) -> Result<Hash256, TransactionError> {
        let prefix = (self.version, self.unlock_time, &self.inputs, &self.outputs, &self.extra);
        let encoded = bincode::encode_to_vec(prefix, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        Ok(Hash256::digest(&encoded))
    }

    /// Size of the canonical encoding in bytes.
    pub fn blob_size(&self) -> Result<u64, TransactionError> {
        Ok(self.to_bytes()?.len() as u64)
    }

    /// A coinbase has exactly one input and it is a generation input.
    pub fn is_coinbase(&self) -> bool {
        matches!(self.inputs.as_slice(), [TransactionInput::Generation { .. }])
    }

    /// Sum of all input amounts. Returns None on overflow.
    pub fn total_input_amount(&self) -> Option<u64> {
        self.inputs
            .iter()
            .try_fold(0u64, |acc, input| acc.checked_add(input.amount()))
    }

    /// Sum of all output amounts. Returns None on overflow.
    pub fn total_output_amount(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
    }

    /// Key images of every key input, in input order.
    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.inputs.iter().filter_map(|input| match input {
            TransactionInput::Key { key_image, .. } => Some(key_image),
            _ => None,
        })
    }
}

/// Convert delta-encoded output offsets to absolute global indexes.
///
/// Returns None if the running sum overflows.
pub fn relative_output_offsets_to_absolute(offsets: &[u32]) -> Option<Vec<u32>> {
    let mut absolute = Vec::with_capacity(offsets.len());
    let mut current = 0u32;
    for (i, offset) in offsets.iter().enumerate() {
        current = if i == 0 { *offset } else { current.checked_add(*offset)? };
        absolute.push(current);
    }
    Some(absolute)
}

/// Convert sorted absolute global indexes to the delta encoding.
pub fn absolute_output_offsets_to_relative(indexes: &[u32]) -> Vec<u32> {
    let mut relative = Vec::with_capacity(indexes.len());
    let mut previous = 0u32;
    for (i, index) in indexes.iter().enumerate() {
        relative.push(if i == 0 { *index } else { index.saturating_sub(previous) });
        previous = *index;
    }
    relative
}

/// Block header.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    pub previous_block_hash: Hash256,
    pub nonce: u32,
}

/// A complete block. The first transaction is the coinbase.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Header bytes plus merkle root and transaction count.
    const HASH_SIZE: usize = 2 + 8 + 32 + 4 + 32 + 8;

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Hashes of all transactions in block order.
    pub fn transaction_hashes(&self) -> Result<Vec<Hash256>, TransactionError> {
        self.transactions.iter().map(Transaction::hash).collect()
    }

    /// Block hash over an explicit little-endian layout:
    /// major || minor || timestamp || prev_hash || nonce || merkle_root || tx_count.
    pub fn hash_with(&self, transaction_hashes: &[Hash256]) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.push(self.header.major_version);
        data.push(self.header.minor_version);
        data.extend_from_slice(&self.header.timestamp.to_le_bytes());
        data.extend_from_slice(self.header.previous_block_hash.as_bytes());
        data.extend_from_slice(&self.header.nonce.to_le_bytes());
        data.extend_from_slice(merkle_root(transaction_hashes).as_bytes());
        data.extend_from_slice(&(transaction_hashes.len() as u64).to_le_bytes());
        Hash256::digest(&data)
    }

    pub fn hash(&self) -> Result<Hash256, TransactionError> {
        Ok(self.hash_with(&self.transaction_hashes()?))
    }
}

/// Locator of a transaction within the chain.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct TransactionIndex {
    /// Height of the containing block.
    pub block: u32,
    /// Position within the block (0 is the coinbase).
    pub transaction: u16,
}

/// A `(height, hash)` locator of a block.
///
/// The empty value (zero hash) means "not checked yet".
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockInfo {
    pub height: u32,
    pub hash: Hash256,
}

impl BlockInfo {
    pub fn is_empty(&self) -> bool {
        self.hash.is_zero()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
