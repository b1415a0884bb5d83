//! Persistent snapshot of the ledger indices (`blockscache.dat`).
//!
//! File layout:
//!
//! ```text
//! version: u8 | tip hash: [u8; 32] | payload length: u64 LE | payload | BLAKE3(all preceding bytes)
//! ```
//!
//! The payload is the bincode encoding of the indices with every map and set
//! flattened into a sorted list, so equal indices always produce equal bytes.
//! A file with another version, a different tip or a bad checksum is
//! rejected whole; the ledger then rebuilds from the block log.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use xuni_core::types::{Hash256, KeyImage, TransactionIndex};

use crate::error::CacheError;
use crate::state::{DepositEntry, Indices, MultisignatureOutputUsage, OutputReference};

/// Current cache format version.
pub const CACHE_VERSION: u8 = 1;

const HEADER_SIZE: usize = 1 + 32 + 8;
const CHECKSUM_SIZE: usize = 32;

/// Cache lifecycle. Only `Valid` admits blocks and transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Absent,
    Loading,
    Valid,
    Invalid,
    Rebuilding,
}

/// Sorted, encodable form of [`Indices`].
#[derive(Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
struct Snapshot {
    block_index: Vec<(Hash256, u32)>,
    transaction_map: Vec<(Hash256, TransactionIndex)>,
    spent_key_images: Vec<KeyImage>,
    outputs: Vec<(u64, Vec<OutputReference>)>,
    multisignature_outputs: Vec<(u64, Vec<MultisignatureOutputUsage>)>,
    deposit_index: Vec<DepositEntry>,
}

impl From<&Indices> for Snapshot {
    fn from(indices: &Indices) -> Self {
        let mut block_index: Vec<_> = indices.block_index.iter().map(|(k, v)| (*k, *v)).collect();
        block_index.sort_unstable();
        let mut transaction_map: Vec<_> = indices.transaction_map.iter().map(|(k, v)| (*k, *v)).collect();
        transaction_map.sort_unstable();
        let mut spent_key_images: Vec<_> = indices.spent_key_images.iter().copied().collect();
        spent_key_images.sort_unstable();
        let mut outputs: Vec<_> = indices.outputs.iter().map(|(k, v)| (*k, v.clone())).collect();
        outputs.sort_unstable_by_key(|(amount, _)| *amount);
        let mut multisignature_outputs: Vec<_> =
            indices.multisignature_outputs.iter().map(|(k, v)| (*k, v.clone())).collect();
        multisignature_outputs.sort_unstable_by_key(|(amount, _)| *amount);

        Self {
            block_index,
            transaction_map,
            spent_key_images,
            outputs,
            multisignature_outputs,
            deposit_index: indices.deposit_index.clone(),
        }
    }
}

impl From<Snapshot> for Indices {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            block_index: snapshot.block_index.into_iter().collect(),
            transaction_map: snapshot.transaction_map.into_iter().collect(),
            spent_key_images: snapshot.spent_key_images.into_iter().collect(),
            outputs: snapshot.outputs.into_iter().collect(),
            multisignature_outputs: snapshot.multisignature_outputs.into_iter().collect(),
            deposit_index: snapshot.deposit_index,
        }
    }
}

/// Encode `indices` for the chain ending at `tip`.
pub fn encode(indices: &Indices, tip: &Hash256) -> Result<Vec<u8>, CacheError> {
    let payload = bincode::encode_to_vec(Snapshot::from(indices), bincode::config::standard())
        .map_err(|e| CacheError::Corrupt(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    bytes.push(CACHE_VERSION);
    bytes.extend_from_slice(tip.as_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    let checksum = blake3::hash(&bytes);
    bytes.extend_from_slice(checksum.as_bytes());
    Ok(bytes)
}

/// Decode a cache image, accepting it only for the chain ending at `expected_tip`.
pub fn decode(bytes: &[u8], expected_tip: &Hash256) -> Result<Indices, CacheError> {
    let Some(&version) = bytes.first() else {
        return Err(CacheError::Corrupt("empty file".into()));
    };
    if version != CACHE_VERSION {
        return Err(CacheError::VersionMismatch { found: version, expected: CACHE_VERSION });
    }
    if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(CacheError::Corrupt("truncated header".into()));
    }

    let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    if blake3::hash(body).as_bytes() != checksum {
        return Err(CacheError::Corrupt("checksum mismatch".into()));
    }

    let mut tip = [0u8; 32];
    tip.copy_from_slice(&body[1..33]);
    let stored = Hash256(tip);
    if stored != *expected_tip {
        return Err(CacheError::TipMismatch { stored: stored.to_string(), actual: expected_tip.to_string() });
    }

    let mut length = [0u8; 8];
    length.copy_from_slice(&body[33..HEADER_SIZE]);
    let payload = &body[HEADER_SIZE..];
    if u64::from_le_bytes(length) != payload.len() as u64 {
        return Err(CacheError::Corrupt("payload length mismatch".into()));
    }

    let (snapshot, read): (Snapshot, usize) =
        bincode::decode_from_slice(payload, bincode::config::standard())
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;
    if read != payload.len() {
        return Err(CacheError::Corrupt("trailing payload bytes".into()));
    }
    Ok(snapshot.into())
}

/// Cache file handle.
#[derive(Debug, Clone)]
pub struct PersistentCache {
    path: PathBuf,
}

impl PersistentCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot atomically: a temporary file renamed into place.
    pub fn save(&self, indices: &Indices, tip: &Hash256) -> Result<(), CacheError> {
        let bytes = encode(indices, tip)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes).map_err(|e| CacheError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| CacheError::Io(e.to_string()))
    }

    pub fn load(&self, expected_tip: &Hash256) -> Result<Indices, CacheError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Err(CacheError::Absent),
            Err(e) => return Err(CacheError::Io(e.to_string())),
        };
        decode(&bytes, expected_tip)
    }

    /// Delete the cache file. A missing file is not an error.
    pub fn invalidate(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_indices() -> Indices {
        let mut indices = Indices::default();
        let tx = TransactionIndex { block: 0, transaction: 0 };
        indices.block_index.insert(Hash256([1; 32]), 0);
        indices.transaction_map.insert(Hash256([2; 32]), tx);
        indices.spent_key_images.insert(KeyImage([3; 32]));
        indices.spent_key_images.insert(KeyImage([4; 32]));
        indices.outputs.insert(10, vec![OutputReference { transaction: tx, output: 0 }]);
        indices.multisignature_outputs.insert(
            20,
            vec![MultisignatureOutputUsage { transaction: tx, output: 1, is_used: true }],
        );
        indices.deposit_index.push(DepositEntry { locked: 20, interest: 1 });
        indices
    }

    #[test]
    fn round_trip() {
        let indices = sample_indices();
        let tip = Hash256([9; 32]);
        let bytes = encode(&indices, &tip).unwrap();
        assert_eq!(decode(&bytes, &tip).unwrap(), indices);
    }

    #[test]
    fn encoding_is_deterministic() {
        let tip = Hash256([9; 32]);
        assert_eq!(encode(&sample_indices(), &tip).unwrap(), encode(&sample_indices(), &tip).unwrap());
    }

    #[test]
    fn tip_mismatch_rejected() {
        let bytes = encode(&sample_indices(), &Hash256([9; 32])).unwrap();
        assert!(matches!(decode(&bytes, &Hash256([8; 32])), Err(CacheError::TipMismatch { .. })));
    }

    #[test]
    fn old_version_rejected() {
        let tip = Hash256([9; 32]);
        let mut bytes = encode(&sample_indices(), &tip).unwrap();
        bytes[0] = CACHE_VERSION - 1;
        assert_eq!(
            decode(&bytes, &tip),
            Err(CacheError::VersionMismatch { found: CACHE_VERSION - 1, expected: CACHE_VERSION })
        );
    }

    #[test]
    fn flipped_byte_rejected() {
        let tip = Hash256([9; 32]);
        let mut bytes = encode(&sample_indices(), &tip).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x01;
        assert!(matches!(decode(&bytes, &tip), Err(CacheError::Corrupt(_))));
        assert!(matches!(decode(&bytes[..10], &tip), Err(CacheError::Corrupt(_))));
        assert!(matches!(decode(&[], &tip), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn file_save_load_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::new(dir.path().join("blockscache.dat"));
        let tip = Hash256([9; 32]);
        assert_eq!(cache.load(&tip), Err(CacheError::Absent));

        cache.save(&sample_indices(), &tip).unwrap();
        assert_eq!(cache.load(&tip).unwrap(), sample_indices());

        cache.invalidate().unwrap();
        assert_eq!(cache.load(&tip), Err(CacheError::Absent));
        cache.invalidate().unwrap();
    }
}
