//! Merkle proof types and published roots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire::hash256_hex;
use super::{CampaignId, Hash256};
use crate::crypto::hash_pair;

/// Which side of the running hash a sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// One level of an inclusion proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    #[serde(with = "hash256_hex")]
    pub sibling: Hash256,
    pub side: Side,
}

impl ProofStep {
    pub fn left(sibling: Hash256) -> Self {
        Self {
            sibling,
            side: Side::Left,
        }
    }

    pub fn right(sibling: Hash256) -> Self {
        Self {
            sibling,
            side: Side::Right,
        }
    }
}

/// Merkle inclusion proof for a single leaf, steps ordered leaf to root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    #[serde(with = "hash256_hex")]
    pub leaf: Hash256,

    /// Index of the leaf in the tree
    pub leaf_index: usize,

    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    pub fn new(leaf: Hash256, leaf_index: usize, steps: Vec<ProofStep>) -> Self {
        Self {
            leaf,
            leaf_index,
            steps,
        }
    }

    /// Fold `leaf` through the steps, honoring each side bit
    pub fn root_from(&self, leaf: &Hash256) -> Hash256 {
        self.steps.iter().fold(*leaf, |acc, step| match step.side {
            Side::Left => hash_pair(&step.sibling, &acc),
            Side::Right => hash_pair(&acc, &step.sibling),
        })
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }
}

/// Final root over a set of published campaign roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversityRoot {
    pub university_id: String,

    /// Campaigns covered, in leaf order
    pub campaign_ids: Vec<CampaignId>,

    pub total_campaigns: u32,

    #[serde(with = "hash256_hex")]
    pub final_merkle_root: Hash256,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Chains a response into its campaign root and that root into a final root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccreditationProof {
    pub university_id: String,
    pub campaign_id: CampaignId,

    #[serde(with = "hash256_hex")]
    pub commitment: Hash256,
    pub response_proof: MerkleProof,

    #[serde(with = "hash256_hex")]
    pub campaign_root: Hash256,
    pub campaign_proof: MerkleProof,

    #[serde(with = "hash256_hex")]
    pub final_root: Hash256,
}

impl AccreditationProof {
    /// Both hops must reproduce their roots
    pub fn verify(&self) -> bool {
        self.response_proof.leaf == self.commitment
            && self.response_proof.root_from(&self.commitment) == self.campaign_root
            && self.campaign_proof.leaf == self.campaign_root
            && self.campaign_proof.root_from(&self.campaign_root) == self.final_root
    }
}
