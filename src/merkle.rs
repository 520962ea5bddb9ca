//! Merkle root over an ordered block body.
//!
//! Domain-separated SHA-256 tree:
//! - Leaves: H(0x00 || tx_hash)
//! - Internal nodes: H(0x01 || left || right)
//! - Odd subtree: left duplicated (Bitcoin-style)
//!
//! The body always carries the reward transaction at position 0, so the
//! empty case never arises in consensus; the function is still total.

use crate::types::Hash32;
use sha2::{Digest, Sha256};

pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return Hash32(leaf_hash(&Hash32::zero()));
    }
    let hashed: Vec<[u8; 32]> = leaves.iter().map(leaf_hash).collect();
    Hash32(root_of(&hashed))
}

fn leaf_hash(h: &Hash32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x00]); // domain separator: leaf
    hasher.update(h.0);
    hasher.finalize().into()
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x01]); // domain separator: internal node
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn root_of(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.len() == 1 {
        return leaves[0];
    }

    let mid = leaves.len().next_power_of_two() / 2;
    let (left_leaves, right_leaves) = if leaves.len() > mid {
        (&leaves[..mid], &leaves[mid..])
    } else {
        (&leaves[..], &leaves[..0])
    };

    let left = root_of(left_leaves);
    let right = if right_leaves.is_empty() {
        left // duplicate left for odd trees
    } else {
        root_of(right_leaves)
    };
    node_hash(&left, &right)
}
