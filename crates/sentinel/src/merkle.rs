//! Keccak-256 merkle trees.
//!
//! Two layouts are in use on chain:
//! - [merkle_root] / [merkle_proof]: an odd node count at any level pairs the last node
//!   with itself (the leaf level always has an even count, a single leaf pairs with itself).
//!   Used for the dividend account root.
//! - [padded_merkle_root]: leaves padded with zero words to the next power of two. Used
//!   for child-chain header roots.

use alloy::primitives::B256;
use sha3::{Digest, Keccak256};

pub fn keccak(data: &[u8]) -> B256 {
    B256::from_slice(&Keccak256::digest(data))
}

/// Left-pad `bytes` to a 32-byte word. Inputs longer than 32 bytes keep their low 32 bytes.
pub fn pad32(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let take = bytes.len().min(32);
    out[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    out
}

fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    B256::from_slice(&hasher.finalize())
}

fn next_level(level: &[B256]) -> Vec<B256> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [l, r] => hash_pair(l, r),
            [l] => hash_pair(l, l),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

fn leaf_level(leaves: &[B256]) -> Vec<B256> {
    let mut level = leaves.to_vec();
    if let Some(last) = level.last().copied() {
        if level.len() % 2 == 1 {
            level.push(last);
        }
    }
    level
}

/// Root of a self-pairing tree. `None` for an empty leaf set.
pub fn merkle_root(leaves: &[B256]) -> Option<B256> {
    if leaves.is_empty() {
        return None;
    }
    let mut level = leaf_level(leaves);
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.first().copied()
}

/// Sibling path from leaf `index` to the root of a self-pairing tree.
pub fn merkle_proof(leaves: &[B256], index: usize) -> Option<Vec<B256>> {
    if index >= leaves.len() {
        return None;
    }
    let mut proof = Vec::new();
    let mut level = leaf_level(leaves);
    let mut idx = index;
    while level.len() > 1 {
        let sibling = if idx % 2 == 0 {
            level.get(idx + 1).copied().unwrap_or(level[idx])
        } else {
            level[idx - 1]
        };
        proof.push(sibling);
        level = next_level(&level);
        idx /= 2;
    }
    Some(proof)
}

/// Check a [merkle_proof] path.
pub fn verify_proof(leaf: B256, index: usize, proof: &[B256], root: B256) -> bool {
    let mut acc = leaf;
    let mut idx = index;
    for sibling in proof {
        acc = if idx % 2 == 0 {
            hash_pair(&acc, sibling)
        } else {
            hash_pair(sibling, &acc)
        };
        idx /= 2;
    }
    acc == root
}

/// Root over leaves padded with zero words to the next power of two.
pub fn padded_merkle_root(leaves: &[B256]) -> B256 {
    let width = leaves.len().max(1).next_power_of_two();
    let mut level = leaves.to_vec();
    level.resize(width, B256::ZERO);
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}
