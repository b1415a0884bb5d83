//! Error types for the Xuni protocol.
use thiserror::Error;

/// How a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Zero or overflowing amounts, bad key encodings. Rejects one tx/block.
    MalformedInput,
    /// Double spend, inflation, size limit, checkpoint mismatch. Rejects one tx/block.
    ConsensusViolation,
    /// Stale or corrupt cache. Recovered by rebuild.
    StorageCorruption,
    /// Block storage cannot be opened or written. Fatal at startup.
    StorageIo,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("empty inputs")] EmptyInputs,
    #[error("wrong version: {0}")] WrongVersion(u8),
    #[error("too big: {size} > {max}")] TooBig { size: u64, max: u64 },
    #[error("zero input amount at input {0}")] InvalidInputAmount(usize),
    #[error("zero output amount at output {0}")] InvalidOutputAmount(usize),
    #[error("amount overflow")] AmountOverflow,
    #[error("creates money: inputs {inputs}, outputs {outputs}")] CreatesMoney { inputs: u64, outputs: u64 },
    #[error("generation input outside coinbase")] UnexpectedGeneration,
    #[error("duplicate key image {0} within transaction")] DoubleSpend(String),
    #[error("key image already spent: {0}")] KeyImageUsed(String),
    #[error("invalid key image: {0}")] InvalidKeyImage(String),
    #[error("invalid output reference at input {0}")] InvalidReference(usize),
    #[error("output referenced by input {0} is still locked")] OutputLocked(usize),
    #[error("signature count mismatch at input {index}: got {got}, expected {expected}")] MissingSignature { index: usize, got: usize, expected: usize },
    #[error("invalid ring signature at input {0}")] InvalidRingSignature(usize),
    #[error("invalid multisignature at input {0}")] InvalidMultisignature(usize),
    #[error("multisignature output mismatch at input {0}")] KeysMismatch(usize),
    #[error("multisignature output already used at input {0}")] MultisignatureUsed(usize),
    #[error("deposit at input {0} has not matured")] DepositLocked(usize),
    #[error("invalid output key at output {0}")] InvalidOutputKey(usize),
    #[error("invalid multisignature output at output {0}")] InvalidMultisignatureOutput(usize),
    #[error("invalid deposit at output {0}")] InvalidDeposit(usize),
    #[error("inputs already rejected at tip height {0}")] AlreadyRejected(u32),
    #[error("serialization: {0}")] Serialization(String),
}

impl TransactionError {
    /// Core error code name reported to peers and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyInputs | Self::UnexpectedGeneration => "TX_MISSING_INPUT",
            Self::WrongVersion(_) => "TX_WRONG_VERSION",
            Self::TooBig { .. } => "TX_TOO_BIG",
            Self::InvalidInputAmount(_) => "TX_INVALID_INPUT_AMOUNT",
            Self::InvalidOutputAmount(_) | Self::InvalidDeposit(_) => "TX_INVALID_OUTPUT_AMOUNT",
            Self::AmountOverflow => "TX_AMOUNT_OVERFLOW",
            Self::CreatesMoney { .. } => "TX_CREATES_MONEY",
            Self::DoubleSpend(_) | Self::MultisignatureUsed(_) => "TX_DOUBLE_SPEND",
            Self::KeyImageUsed(_) => "TX_KEY_IMAGE_USED",
            Self::InvalidKeyImage(_) | Self::InvalidOutputKey(_) => "TX_PUBLIC_KEY_INVALID",
            Self::InvalidReference(_) | Self::AlreadyRejected(_) => "TX_INVALID_REFERENCE",
            Self::OutputLocked(_) | Self::DepositLocked(_) => "TX_FROM_FUTURE",
            Self::MissingSignature { .. } => "TX_MISSING_RING_SIGNATURE",
            Self::InvalidRingSignature(_) | Self::InvalidMultisignature(_) => "TX_INVALID_RING_SIGNATURE",
            Self::KeysMismatch(_) | Self::InvalidMultisignatureOutput(_) => "TX_KEYS_MISMATCH",
            Self::Serialization(_) => "TX_EXTRA_PARSE_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyInputs
            | Self::WrongVersion(_)
            | Self::InvalidInputAmount(_)
            | Self::InvalidOutputAmount(_)
            | Self::AmountOverflow
            | Self::InvalidKeyImage(_)
            | Self::InvalidOutputKey(_)
            | Self::InvalidMultisignatureOutput(_)
            | Self::InvalidDeposit(_)
            | Self::MissingSignature { .. }
            | Self::Serialization(_) => ErrorKind::MalformedInput,
            _ => ErrorKind::ConsensusViolation,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("wrong major version: got {got}, expected {expected}")] WrongVersion { got: u8, expected: u8 },
    #[error("invalid prev hash: got {got}, tip {tip}")] InvalidPrevHash { got: String, tip: String },
    #[error("block already exists: {0}")] AlreadyExists(String),
    #[error("timestamp {timestamp} below median {median}")] TimestampTooOld { timestamp: u64, median: u64 },
    #[error("timestamp {timestamp} beyond future limit {limit}")] TimestampInFuture { timestamp: u64, limit: u64 },
    #[error("too many transactions: {0}")] TooManyTransactions(usize),
    #[error("too many outputs in transaction {index}: {count}")] TooManyOutputs { index: usize, count: usize },
    #[error("no coinbase")] NoCoinbase,
    #[error("invalid coinbase: {0}")] InvalidCoinbase(String),
    #[error("invalid reward: got {got}, expected at most {expected}")] InvalidReward { got: u64, expected: u64 },
    #[error("oversized: {size} > {max}")] OversizedBlock { size: u64, max: u64 },
    #[error("duplicate transaction: {0}")] DuplicateTransaction(String),
    #[error("checkpoint mismatch at height {height}")] CheckpointMismatch { height: u32 },
    #[error("alternative block at height {height} not allowed at chain height {chain_height}")] AlternativeNotAllowed { height: u32, chain_height: u32 },
    #[error("tx error in {index}: {source}")] Transaction { index: usize, source: TransactionError },
}

impl BlockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transaction { source, .. } => source.kind(),
            Self::WrongVersion { .. }
            | Self::NoCoinbase
            | Self::InvalidCoinbase(_)
            | Self::TooManyTransactions(_)
            | Self::TooManyOutputs { .. } => {
                ErrorKind::MalformedInput
            }
            _ => ErrorKind::ConsensusViolation,
        }
    }

    /// Error code of the underlying transaction failure, if any.
    pub fn transaction_code(&self) -> Option<&'static str> {
        match self {
            Self::Transaction { source, .. } => Some(source.code()),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("signer index {index} out of ring of {len}")] SignerOutOfRing { index: usize, len: usize },
    #[error("ring member {0} does not match the signing key")] SignerKeyMismatch(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_for_scenario_errors() {
        assert_eq!(TransactionError::KeyImageUsed("ab".into()).code(), "TX_KEY_IMAGE_USED");
        assert_eq!(
            TransactionError::CreatesMoney { inputs: 1, outputs: 2 }.code(),
            "TX_CREATES_MONEY"
        );
        assert_eq!(TransactionError::InvalidInputAmount(0).code(), "TX_INVALID_INPUT_AMOUNT");
        assert_eq!(TransactionError::AmountOverflow.code(), "TX_AMOUNT_OVERFLOW");
        assert_eq!(TransactionError::InvalidRingSignature(0).code(), "TX_INVALID_RING_SIGNATURE");
    }

    #[test]
    fn kinds() {
        assert_eq!(TransactionError::AmountOverflow.kind(), ErrorKind::MalformedInput);
        assert_eq!(TransactionError::KeyImageUsed(String::new()).kind(), ErrorKind::ConsensusViolation);
        let wrapped = BlockError::Transaction { index: 1, source: TransactionError::InvalidInputAmount(0) };
        assert_eq!(wrapped.kind(), ErrorKind::MalformedInput);
        assert_eq!(wrapped.transaction_code(), Some("TX_INVALID_INPUT_AMOUNT"));
        assert_eq!(BlockError::CheckpointMismatch { height: 3 }.kind(), ErrorKind::ConsensusViolation);
    }

    #[test]
    fn creates_money_message() {
        let err = TransactionError::CreatesMoney { inputs: 1_000_000, outputs: 1_000_500 };
        assert!(err.to_string().contains("creates money"));
    }
}
