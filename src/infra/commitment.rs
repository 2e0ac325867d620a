//! Merkle engine
//!
//! Builds commitment trees over an explicit leaf list, issues inclusion
//! proofs and verifies them. Nodes are `SHA-256(left || right)` with no
//! domain prefix. An odd node at any level is paired with a copy of itself,
//! so every level above the leaves has `ceil(n / 2)` nodes.
//!
//! The engine is stateless: trees are rebuilt from the frozen leaf set each
//! time they are needed.

use thiserror::Error;

use crate::crypto::{hash_pair, hash_to_hex};
use crate::domain::{Hash256, MerkleProof, ProofStep};

use super::SurveyError;

/// Error type for tree construction and proving
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("cannot build a Merkle tree with no leaves")]
    EmptyTree,

    #[error("leaf {0} is not in the tree")]
    LeafNotFound(String),

    #[error("leaf index {index} out of range for {len} leaves")]
    IndexOutOfRange { index: usize, len: usize },
}

impl From<MerkleError> for SurveyError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::EmptyTree => SurveyError::Precondition(err.to_string()),
            MerkleError::LeafNotFound(hex) => SurveyError::CommitmentNotFound(hex),
            MerkleError::IndexOutOfRange { .. } => SurveyError::Validation(err.to_string()),
        }
    }
}

/// A fully materialized tree, leaves at level 0 and the root last
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    /// Build the tree bottom-up, duplicating the last node of odd levels
    pub fn build(leaves: &[Hash256]) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyTree);
        }

        let mut levels = vec![leaves.to_vec()];
        while levels.last().map_or(0, Vec::len) > 1 {
            let current = &levels[levels.len() - 1];
            let next: Vec<Hash256> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [last] => hash_pair(last, last),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    pub fn root(&self) -> Hash256 {
        // build() guarantees a non-empty top level
        self.levels[self.levels.len() - 1][0]
    }

    pub fn leaves(&self) -> &[Hash256] {
        &self.levels[0]
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Prove the first occurrence of `leaf`
    pub fn prove(&self, leaf: &Hash256) -> Result<MerkleProof, MerkleError> {
        let index = self
            .leaves()
            .iter()
            .position(|l| l == leaf)
            .ok_or_else(|| MerkleError::LeafNotFound(hash_to_hex(leaf)))?;
        self.prove_index(index)
    }

    /// Prove the leaf at `index`
    pub fn prove_index(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        let len = self.leaf_count();
        if index >= len {
            return Err(MerkleError::IndexOutOfRange { index, len });
        }

        let mut steps = Vec::with_capacity(self.depth());
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if idx % 2 == 0 {
                // a missing right sibling is the node itself
                let sibling = level.get(idx + 1).copied().unwrap_or(level[idx]);
                ProofStep::right(sibling)
            } else {
                ProofStep::left(level[idx - 1])
            };
            steps.push(step);
            idx /= 2;
        }

        Ok(MerkleProof::new(self.levels[0][index], index, steps))
    }
}

/// Root over `leaves`
pub fn merkle_root(leaves: &[Hash256]) -> Result<Hash256, MerkleError> {
    MerkleTree::build(leaves).map(|tree| tree.root())
}

/// Inclusion proof for the first occurrence of `target` in `leaves`
pub fn prove(leaves: &[Hash256], target: &Hash256) -> Result<MerkleProof, MerkleError> {
    MerkleTree::build(leaves)?.prove(target)
}

/// Check that `commitment` folds through `proof` to `root`
pub fn verify_proof(commitment: &Hash256, proof: &MerkleProof, root: &Hash256) -> bool {
    &proof.root_from(commitment) == root
}

/// Root over published campaign roots, same construction as campaign trees
pub fn final_root(campaign_roots: &[Hash256]) -> Result<Hash256, MerkleError> {
    merkle_root(campaign_roots)
}
