//! BLAKE3 merkle root committing a block to its transactions.
//!
//! Leaves and internal nodes are domain separated:
//! - leaf: `BLAKE3(0x00 || tx_hash)`
//! - node: `BLAKE3(0x01 || left || right)`
//!
//! Odd layers duplicate their last element. An empty list hashes to [`Hash256::ZERO`].

use crate::types::Hash256;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

fn leaf_hash(data: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_PREFIX]);
    hasher.update(data.as_bytes());
    Hash256(hasher.finalize().into())
}

fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Merkle root of a list of transaction hashes.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    let mut layer: Vec<Hash256> = leaves.iter().map(leaf_hash).collect();
    if layer.is_empty() {
        return Hash256::ZERO;
    }
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| node_hash(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    layer[0]
}
