//! RFC 6962 Merkle tree hashing.
//!
//! Leaf and interior hashes use the domain-separation prefixes from the
//! certificate transparency RFC (`0x00` for leaves, `0x01` for interior
//! nodes) so that a leaf hash can never collide with an interior hash.

use sha2::{Digest, Sha256};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// `SHA-256("")`: the canonical root of the empty tree.
#[must_use]
pub fn empty_root() -> [u8; 32] {
    let digest = Sha256::digest([]);
    digest.into()
}

/// `RFC 6962` leaf hash: `SHA-256(0x00 || data)`.
#[must_use]
pub fn hash_leaf(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

/// `RFC 6962` interior node hash: `SHA-256(0x01 || left || right)`.
#[must_use]
pub fn hash_children(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Root of the left-complete binary tree over `leaves`, per RFC 6962 §2.1.
///
/// Returns [`empty_root`] for an empty slice. This is the reference
/// computation; `seqlog-tile` computes the same value incrementally from
/// tiles rather than by re-hashing every leaf.
#[must_use]
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    subtree_hash(leaves)
}

fn subtree_hash(leaves: &[[u8; 32]]) -> [u8; 32] {
    match leaves.len() {
        0 => empty_root(),
        1 => leaves[0],
        n => {
            let split = largest_power_of_two_less_than(n);
            let left = subtree_hash(&leaves[..split]);
            let right = subtree_hash(&leaves[split..]);
            hash_children(&left, &right)
        }
    }
}

/// Largest power of two strictly less than `n` (RFC 6962's `k`).
fn largest_power_of_two_less_than(n: usize) -> usize {
    let mut k = 1usize;
    while k * 2 < n {
        k *= 2;
    }
    k
}
