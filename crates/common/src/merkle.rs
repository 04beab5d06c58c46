//! Deterministic Merkle commitment construction.
//!
//! ## Shape
//!
//! Leaves are padded with [`ZERO_HASH`] to the next power of two so the tree
//! is always complete; internal nodes hash `left ‖ right` with keccak-256.
//! The anchoring verifier expects this exact shape, which is why the padding
//! rule is part of the consensus surface.
//!
//! ## Proofs
//!
//! `generate_proof(i)` returns the sibling hashes ordered root→leaf; the
//! length always equals the tree depth. Given identical leaves in identical
//! order, the root and every proof are byte-identical across rebuilds.

use crate::crypto::keccak256;
use crate::types::{Hash32, ZERO_HASH};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    #[error("cannot build a merkle tree without leaves")]
    NoLeaves,
    #[error("leaf index {index} out of range for {leaves} leaves")]
    LeafOutOfRange { index: u64, leaves: usize },
}

fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&left.0);
    buf[32..].copy_from_slice(&right.0);
    keccak256(&buf)
}

/// Complete binary Merkle tree over a fixed leaf sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// All levels below the root; `levels[0]` holds the padded leaves.
    levels: Vec<Vec<Hash32>>,
    /// Number of real (unpadded) leaves.
    leaf_count: usize,
    root: Hash32,
}

impl MerkleTree {
    pub fn new(leaves: Vec<Hash32>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::NoLeaves);
        }

        let leaf_count = leaves.len();
        let width = leaf_count.next_power_of_two();
        let mut level = leaves;
        level.resize(width, ZERO_HASH);

        let mut levels = Vec::new();
        while level.len() > 1 {
            let mut above = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                above.push(hash_pair(&pair[0], &pair[1]));
            }
            levels.push(level);
            level = above;
        }
        let root = level[0];

        Ok(Self {
            levels,
            leaf_count,
            root,
        })
    }

    pub fn root(&self) -> Hash32 {
        self.root
    }

    /// Tree depth; equals the proof length for every leaf.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Sibling path for leaf `index`, ordered root→leaf.
    pub fn generate_proof(&self, index: u64) -> Result<Vec<Hash32>, MerkleError> {
        if index as usize >= self.leaf_count {
            return Err(MerkleError::LeafOutOfRange {
                index,
                leaves: self.leaf_count,
            });
        }

        let mut proof = Vec::with_capacity(self.depth());
        let mut pos = index as usize;
        for level in &self.levels {
            proof.push(level[pos ^ 1]);
            pos >>= 1;
        }
        proof.reverse();
        Ok(proof)
    }
}

/// Checks a root→leaf sibling path against a root.
pub fn verify_proof(proof: &[Hash32], leaf_index: u64, leaf: &Hash32, root: &Hash32) -> bool {
    if proof.len() < 64 && leaf_index >= 1u64 << proof.len() {
        return false;
    }

    let mut acc = *leaf;
    // walk leaf→root, consuming the proof from its tail
    for (height, sibling) in proof.iter().rev().enumerate() {
        let bit = (leaf_index >> height) & 1;
        acc = if bit == 0 {
            hash_pair(&acc, sibling)
        } else {
            hash_pair(sibling, &acc)
        };
    }
    acc == *root
}
