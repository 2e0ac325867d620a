//! Inclusion proofs and university final roots

use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, instrument};

use crate::crypto::hash_to_hex;
use crate::domain::{
    AccreditationProof, Campaign, CampaignId, Hash256, MerkleProof, UniversityRoot,
    MAX_UNIVERSITY_ID_LEN,
};
use crate::infra::{commitment, MerkleTree, Result, SurveyError};

use super::SurveyService;

impl SurveyService {
    /// Inclusion proof for a response against the campaign's frozen set
    pub async fn prove_response(
        &self,
        campaign_id: &CampaignId,
        commitment: &Hash256,
    ) -> Result<MerkleProof> {
        let campaign = self.get_campaign(campaign_id).await?;
        let (tree, _) = self.campaign_tree(&campaign).await?;
        Ok(tree.prove(commitment)?)
    }

    /// Check a proof against the campaign's published (or staged) root
    pub async fn verify_response(
        &self,
        campaign_id: &CampaignId,
        commitment: &Hash256,
        proof: &MerkleProof,
    ) -> Result<bool> {
        let campaign = self.get_campaign(campaign_id).await?;
        let root = campaign
            .merkle_root
            .or(campaign.computed_root)
            .ok_or_else(|| SurveyError::Precondition("campaign has no root yet".to_string()))?;
        Ok(commitment::verify_proof(commitment, proof, &root))
    }

    /// Compute and store the final root over published campaigns, in the given order
    #[instrument(skip_all, fields(university_id = %university_id))]
    pub async fn compute_university_root(
        &self,
        university_id: &str,
        campaign_ids: &[CampaignId],
    ) -> Result<UniversityRoot> {
        if university_id.trim().is_empty() || university_id.len() > MAX_UNIVERSITY_ID_LEN {
            return Err(SurveyError::Validation(format!(
                "university id must be 1 to {MAX_UNIVERSITY_ID_LEN} bytes"
            )));
        }
        if campaign_ids.is_empty() {
            return Err(SurveyError::Validation("no campaigns given".to_string()));
        }
        let mut seen = HashSet::with_capacity(campaign_ids.len());
        if let Some(dup) = campaign_ids.iter().find(|id| !seen.insert(*id)) {
            return Err(SurveyError::Validation(format!("campaign {dup} listed twice")));
        }

        let roots = self.published_roots(campaign_ids).await?;
        let final_root = commitment::final_root(&roots)?;

        let now = Utc::now();
        let record = UniversityRoot {
            university_id: university_id.to_string(),
            campaign_ids: campaign_ids.to_vec(),
            total_campaigns: campaign_ids.len() as u32,
            final_merkle_root: final_root,
            created_at: now,
            updated_at: now,
        };
        self.stores.roots.upsert_university_root(&record).await?;

        info!(
            final_root = %hash_to_hex(&final_root),
            total_campaigns = record.total_campaigns,
            "University root computed"
        );
        Ok(record)
    }

    pub async fn get_university_root(&self, university_id: &str) -> Result<UniversityRoot> {
        self.stores
            .roots
            .get_university_root(university_id)
            .await?
            .ok_or_else(|| SurveyError::UniversityNotFound(university_id.to_string()))
    }

    /// Proof that a campaign root is a leaf of the university's final root
    pub async fn prove_campaign_in_university(
        &self,
        university_id: &str,
        campaign_id: &CampaignId,
    ) -> Result<MerkleProof> {
        let record = self.get_university_root(university_id).await?;
        let index = record
            .campaign_ids
            .iter()
            .position(|id| id == campaign_id)
            .ok_or_else(|| {
                SurveyError::Validation(format!(
                    "campaign {campaign_id} is not covered by {university_id}"
                ))
            })?;

        let roots = self.published_roots(&record.campaign_ids).await?;
        let tree = MerkleTree::build(&roots)?;
        if tree.root() != record.final_merkle_root {
            return Err(SurveyError::Internal(format!(
                "stored final root for {university_id} does not match its campaigns"
            )));
        }
        Ok(tree.prove_index(index)?)
    }

    /// Chain a response proof and a campaign proof up to the final root
    #[instrument(skip_all, fields(university_id = %university_id, campaign_id = %campaign_id))]
    pub async fn prove_accreditation(
        &self,
        university_id: &str,
        campaign_id: &CampaignId,
        commitment: &Hash256,
    ) -> Result<AccreditationProof> {
        let campaign = self.get_campaign(campaign_id).await?;
        let campaign_root = campaign.merkle_root.ok_or_else(|| {
            SurveyError::Precondition(format!("campaign {campaign_id} is not published"))
        })?;

        let response_proof = self.prove_response(campaign_id, commitment).await?;
        let campaign_proof = self
            .prove_campaign_in_university(university_id, campaign_id)
            .await?;
        let final_root = self
            .get_university_root(university_id)
            .await?
            .final_merkle_root;

        Ok(AccreditationProof {
            university_id: university_id.to_string(),
            campaign_id: campaign_id.clone(),
            commitment: *commitment,
            response_proof,
            campaign_root,
            campaign_proof,
            final_root,
        })
    }

    /// The campaign's tree, rebuilt from the frozen set and checked against the staged root
    async fn campaign_tree(&self, campaign: &Campaign) -> Result<(MerkleTree, Hash256)> {
        let root = campaign.computed_root.ok_or_else(|| {
            SurveyError::Precondition(format!("campaign {} has no computed root", campaign.id))
        })?;

        let leaves = self.frozen_leaves(&campaign.id).await?;
        let tree = MerkleTree::build(&leaves)?;
        if tree.root() != root {
            return Err(SurveyError::Internal(format!(
                "stored responses for {} no longer match the staged root",
                campaign.id
            )));
        }
        Ok((tree, root))
    }

    async fn published_roots(&self, campaign_ids: &[CampaignId]) -> Result<Vec<Hash256>> {
        let mut roots = Vec::with_capacity(campaign_ids.len());
        for id in campaign_ids {
            let campaign = self.get_campaign(id).await?;
            let root = campaign.merkle_root.filter(|_| campaign.is_published()).ok_or_else(|| {
                SurveyError::Precondition(format!("campaign {id} is not published"))
            })?;
            roots.push(root);
        }
        Ok(roots)
    }
}
