//! Anchor submission, ingestion and root computation

use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::crypto::{self, hash_to_hex, EncryptionError};
use crate::domain::{
    parse_answers, AnchoredResponse, CampaignId, CampaignStatus, DecryptedResponse, Hash256,
    IngestionFailure, IngestionFailureReason, IngestionReport,
};
use crate::infra::{commitment, Result, SurveyError};

use super::SurveyService;

type Decrypted = (u32, AnchoredResponse, std::result::Result<String, EncryptionError>);

impl SurveyService {
    /// Anchor respondent submissions while the campaign is launched
    #[instrument(skip_all, fields(campaign_id = %campaign_id, count = commitments.len()))]
    pub async fn submit_responses(
        &self,
        campaign_id: &CampaignId,
        commitments: Vec<Hash256>,
        ciphertexts: Vec<Vec<u8>>,
    ) -> Result<usize> {
        let campaign = self.get_campaign(campaign_id).await?;
        self.require_status(&campaign, CampaignStatus::Launched, "submit responses")?;

        let anchored = self
            .stores
            .anchors
            .submit_batch(campaign_id, commitments, ciphertexts)
            .await?;
        info!(anchored, "Responses anchored");
        Ok(anchored)
    }

    /// Decrypt, verify and store every anchored response.
    ///
    /// Failures are per response: they are logged and reported, and never
    /// stop the pass. Running it again only picks up what is new.
    #[instrument(skip_all, fields(campaign_id = %campaign_id))]
    pub async fn ingest(&self, campaign_id: &CampaignId) -> Result<IngestionReport> {
        let mut campaign = self.get_campaign(campaign_id).await?;
        self.require_status(&campaign, CampaignStatus::Closed, "ingest")?;
        if campaign.is_frozen() {
            return Err(SurveyError::Precondition(
                "response set is frozen once the root is computed".to_string(),
            ));
        }

        let anchored = self.stores.anchors.read_responses(campaign_id).await?;
        let mut report = IngestionReport::new(campaign_id.clone());

        let mut seen = HashSet::with_capacity(anchored.len());
        let mut pending: Vec<(u32, AnchoredResponse)> = Vec::new();
        for (position, response) in anchored.into_iter().enumerate() {
            let position = position as u32;
            if !seen.insert(response.commitment) {
                record_failure(
                    &mut report,
                    position,
                    &response.commitment,
                    IngestionFailureReason::Replay,
                    "commitment already anchored earlier".to_string(),
                );
                continue;
            }
            if self
                .stores
                .responses
                .has_response(campaign_id, &response.commitment)
                .await?
            {
                report.already_present += 1;
                continue;
            }
            pending.push((position, response));
        }

        if !pending.is_empty() {
            let key = self
                .unseal(&campaign.id, campaign.encryption_private_key.clone())
                .await?;
            let decrypted = tokio::task::spawn_blocking(move || {
                pending
                    .into_iter()
                    .map(|(position, response)| {
                        let plaintext = crypto::decrypt_answer(&response.ciphertext, &key);
                        (position, response, plaintext)
                    })
                    .collect::<Vec<Decrypted>>()
            })
            .await?;

            let ingested_at = Utc::now();
            for (position, response, plaintext) in decrypted {
                let plaintext = match plaintext {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        record_failure(
                            &mut report,
                            position,
                            &response.commitment,
                            IngestionFailureReason::Decryption,
                            e.to_string(),
                        );
                        continue;
                    }
                };

                if !crypto::verify_commitment(&plaintext, &response.commitment) {
                    record_failure(
                        &mut report,
                        position,
                        &response.commitment,
                        IngestionFailureReason::CommitmentMismatch,
                        "plaintext does not hash to the anchored commitment".to_string(),
                    );
                    continue;
                }

                let parsed_answers = match parse_answers(&plaintext, campaign.question_count) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        record_failure(
                            &mut report,
                            position,
                            &response.commitment,
                            IngestionFailureReason::MalformedAnswer,
                            e.to_string(),
                        );
                        continue;
                    }
                };

                let stored = self
                    .stores
                    .responses
                    .store_response(&DecryptedResponse {
                        campaign_id: campaign_id.clone(),
                        commitment: response.commitment,
                        plaintext_answer: plaintext,
                        parsed_answers,
                        position,
                        ingested_at,
                    })
                    .await?;
                if stored {
                    report.ingested += 1;
                } else {
                    report.already_present += 1;
                }
            }
        }

        let total = self.stores.responses.list_responses(campaign_id).await?.len();
        let now = Utc::now();
        campaign.total_responses = total as u32;
        campaign.ingested_at = Some(now);
        campaign.updated_at = now;
        self.save(&mut campaign, CampaignStatus::Closed, "ingest")
            .await?;

        info!(
            ingested = report.ingested,
            already_present = report.already_present,
            failed = report.failed(),
            total_responses = campaign.total_responses,
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Freeze the verified response set and stage its Merkle root.
    ///
    /// The set is frozen before it is read, so the staged root covers
    /// exactly what is stored. Calling it again over the frozen set returns
    /// the same root.
    #[instrument(skip_all, fields(campaign_id = %campaign_id))]
    pub async fn compute_root(&self, campaign_id: &CampaignId) -> Result<Hash256> {
        let mut campaign = self.get_campaign(campaign_id).await?;
        self.require_status(&campaign, CampaignStatus::Closed, "compute root")?;
        if campaign.ingested_at.is_none() {
            return Err(SurveyError::Precondition(
                "responses must be ingested before computing the root".to_string(),
            ));
        }

        if !campaign.is_frozen() {
            // an empty set stays open
            if self.frozen_leaves(campaign_id).await?.is_empty() {
                return Err(SurveyError::Precondition(
                    "no verified responses to commit to".to_string(),
                ));
            }
            let now = Utc::now();
            campaign.frozen_at = Some(now);
            campaign.updated_at = now;
            self.save(&mut campaign, CampaignStatus::Closed, "compute root")
                .await?;
            debug!("Response set frozen");
        }

        let leaves = self.frozen_leaves(campaign_id).await?;
        let root = commitment::merkle_root(&leaves)?;

        if let Some(staged) = campaign.computed_root {
            if staged != root {
                return Err(SurveyError::Internal(format!(
                    "staged root {} does not match recomputed {}",
                    hash_to_hex(&staged),
                    hash_to_hex(&root)
                )));
            }
            return Ok(staged);
        }

        campaign.computed_root = Some(root);
        campaign.root_leaf_count = Some(leaves.len() as u32);
        campaign.total_responses = leaves.len() as u32;
        campaign.updated_at = Utc::now();
        self.save(&mut campaign, CampaignStatus::Closed, "compute root")
            .await?;

        info!(
            root = %hash_to_hex(&root),
            leaves = leaves.len(),
            "Merkle root staged"
        );
        Ok(root)
    }

    /// Commitments of verified responses, in anchor order
    pub(super) async fn frozen_leaves(&self, campaign_id: &CampaignId) -> Result<Vec<Hash256>> {
        Ok(self
            .stores
            .responses
            .list_responses(campaign_id)
            .await?
            .into_iter()
            .map(|r| r.commitment)
            .collect())
    }
}

fn record_failure(
    report: &mut IngestionReport,
    position: u32,
    commitment: &Hash256,
    reason: IngestionFailureReason,
    message: String,
) {
    let commitment_hex = hash_to_hex(commitment);
    warn!(
        position,
        commitment = %commitment_hex,
        reason = %reason,
        "Response rejected during ingestion"
    );
    report.failures.push(IngestionFailure {
        position,
        commitment_hex,
        reason,
        message,
    });
}
