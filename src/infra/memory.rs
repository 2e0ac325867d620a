//! In-memory implementations of the store traits
//!
//! Used by tests and by embedders that do not need durability. Every
//! compare-and-set runs under a single write lock. Locks are taken in the
//! order campaigns, tokens, responses.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::crypto::hash_to_hex;
use crate::domain::{
    AnchoredResponse, Campaign, CampaignId, CampaignStatus, DecryptedResponse, Hash256, Token,
    UniversityRoot,
};

use super::{
    AnchorStore, CampaignStore, ResponseStore, Result, SurveyError, TokenLedger,
    UniversityRootStore,
};

/// In-memory campaign, token, response and root store
#[derive(Default)]
pub struct InMemoryStore {
    campaigns: RwLock<HashMap<CampaignId, Campaign>>,
    tokens: RwLock<HashMap<String, Token>>,
    responses: RwLock<HashMap<CampaignId, Vec<DecryptedResponse>>>,
    roots: RwLock<HashMap<String, UniversityRoot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignStore for InMemoryStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let mut campaigns = self.campaigns.write().await;
        if campaigns.contains_key(&campaign.id) {
            return Err(SurveyError::DuplicateCampaign(campaign.id.clone()));
        }
        campaigns.insert(campaign.id.clone(), campaign.clone());
        Ok(())
    }

    async fn get_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>> {
        Ok(self.campaigns.read().await.get(id).cloned())
    }

    async fn update_campaign(
        &self,
        campaign: &Campaign,
        expected: CampaignStatus,
    ) -> Result<bool> {
        let mut campaigns = self.campaigns.write().await;
        match campaigns.get_mut(&campaign.id) {
            Some(stored) if stored.status == expected && stored.revision == campaign.revision => {
                *stored = campaign.clone();
                stored.revision = campaign.revision.wrapping_add(1);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(SurveyError::CampaignNotFound(campaign.id.clone())),
        }
    }
}

#[async_trait]
impl TokenLedger for InMemoryStore {
    async fn insert_tokens(&self, tokens: &[Token]) -> Result<()> {
        let mut stored = self.tokens.write().await;

        let mut taken: HashSet<(&CampaignId, &str)> = stored
            .values()
            .map(|t| (&t.campaign_id, t.student_email.as_str()))
            .collect();
        for token in tokens {
            if !taken.insert((&token.campaign_id, token.student_email.as_str())) {
                return Err(SurveyError::DuplicateRespondent(token.student_email.clone()));
            }
            if stored.contains_key(&token.token) {
                return Err(SurveyError::Internal("token secret collision".to_string()));
            }
        }
        drop(taken);

        for token in tokens {
            stored.insert(token.token.clone(), token.clone());
        }
        Ok(())
    }

    async fn get_token(&self, token: &str) -> Result<Option<Token>> {
        Ok(self.tokens.read().await.get(token).cloned())
    }

    async fn mark_used(&self, token: &str) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let entry = tokens.get_mut(token).ok_or(SurveyError::TokenInvalid)?;
        if entry.used {
            return Err(SurveyError::TokenAlreadyUsed);
        }
        entry.used = true;
        entry.used_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_used_while_launched(
        &self,
        token: &str,
        campaign_id: &CampaignId,
    ) -> Result<()> {
        // held across the token update so no status write can interleave
        let campaigns = self.campaigns.read().await;
        let mut tokens = self.tokens.write().await;

        let entry = tokens.get_mut(token).ok_or(SurveyError::TokenInvalid)?;
        if &entry.campaign_id != campaign_id {
            return Err(SurveyError::TokenScope {
                requested: campaign_id.clone(),
            });
        }
        if entry.used {
            return Err(SurveyError::TokenAlreadyUsed);
        }
        let campaign = campaigns
            .get(campaign_id)
            .ok_or_else(|| SurveyError::CampaignNotFound(campaign_id.clone()))?;
        if !campaign.status.accepts_signing() {
            return Err(SurveyError::InvalidTransition {
                campaign_id: campaign_id.clone(),
                operation: "sign",
                status: campaign.status,
            });
        }

        entry.used = true;
        entry.used_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_completed(&self, token: &str) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let entry = tokens.get_mut(token).ok_or(SurveyError::TokenInvalid)?;
        if !entry.used {
            return Err(SurveyError::Precondition(
                "token must be used before it is completed".to_string(),
            ));
        }
        if !entry.is_completed {
            entry.is_completed = true;
            entry.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_tokens(&self, campaign_id: &CampaignId) -> Result<Vec<Token>> {
        let mut tokens: Vec<Token> = self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| &t.campaign_id == campaign_id)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| a.student_email.cmp(&b.student_email));
        Ok(tokens)
    }
}

#[async_trait]
impl ResponseStore for InMemoryStore {
    async fn store_response(&self, response: &DecryptedResponse) -> Result<bool> {
        let campaigns = self.campaigns.read().await;
        if campaigns
            .get(&response.campaign_id)
            .is_some_and(Campaign::is_frozen)
        {
            return Err(SurveyError::Precondition(format!(
                "response set of {} is frozen",
                response.campaign_id
            )));
        }
        let mut responses = self.responses.write().await;
        let list = responses.entry(response.campaign_id.clone()).or_default();
        if list.iter().any(|r| r.commitment == response.commitment) {
            return Ok(false);
        }
        list.push(response.clone());
        list.sort_by_key(|r| r.position);
        Ok(true)
    }

    async fn has_response(
        &self,
        campaign_id: &CampaignId,
        commitment: &Hash256,
    ) -> Result<bool> {
        Ok(self
            .responses
            .read()
            .await
            .get(campaign_id)
            .is_some_and(|list| list.iter().any(|r| &r.commitment == commitment)))
    }

    async fn list_responses(&self, campaign_id: &CampaignId) -> Result<Vec<DecryptedResponse>> {
        Ok(self
            .responses
            .read()
            .await
            .get(campaign_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl UniversityRootStore for InMemoryStore {
    async fn upsert_university_root(&self, root: &UniversityRoot) -> Result<()> {
        let mut roots = self.roots.write().await;
        let mut record = root.clone();
        if let Some(existing) = roots.get(&root.university_id) {
            record.created_at = existing.created_at;
        }
        roots.insert(root.university_id.clone(), record);
        Ok(())
    }

    async fn get_university_root(&self, university_id: &str) -> Result<Option<UniversityRoot>> {
        Ok(self.roots.read().await.get(university_id).cloned())
    }
}

#[derive(Default)]
struct AnchorLog {
    entries: Vec<AnchoredResponse>,
    pruned: bool,
}

/// In-memory append-only anchor store
#[derive(Default)]
pub struct InMemoryAnchorStore {
    logs: RwLock<HashMap<CampaignId, AnchorLog>>,
}

impl InMemoryAnchorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append entries without any checks, as an untrusted ledger might
    pub async fn append_raw(&self, entries: Vec<AnchoredResponse>) {
        let mut logs = self.logs.write().await;
        for entry in entries {
            logs.entry(entry.campaign_id.clone())
                .or_default()
                .entries
                .push(entry);
        }
    }
}

#[async_trait]
impl AnchorStore for InMemoryAnchorStore {
    async fn submit_batch(
        &self,
        campaign_id: &CampaignId,
        commitments: Vec<Hash256>,
        ciphertexts: Vec<Vec<u8>>,
    ) -> Result<usize> {
        if commitments.len() != ciphertexts.len() {
            return Err(SurveyError::Validation(format!(
                "{} commitments but {} ciphertexts",
                commitments.len(),
                ciphertexts.len()
            )));
        }
        if commitments.is_empty() {
            return Err(SurveyError::Validation("empty batch".to_string()));
        }

        let mut logs = self.logs.write().await;
        let log = logs.entry(campaign_id.clone()).or_default();
        if log.pruned {
            return Err(SurveyError::Precondition(format!(
                "campaign {campaign_id} is published"
            )));
        }

        let mut seen: HashSet<Hash256> = log.entries.iter().map(|e| e.commitment).collect();
        for commitment in &commitments {
            if !seen.insert(*commitment) {
                return Err(SurveyError::DuplicateCommitment(hash_to_hex(commitment)));
            }
        }

        let anchored_at = Utc::now();
        let count = commitments.len();
        log.entries.extend(
            commitments
                .into_iter()
                .zip(ciphertexts)
                .map(|(commitment, ciphertext)| AnchoredResponse {
                    campaign_id: campaign_id.clone(),
                    commitment,
                    ciphertext,
                    anchored_at,
                }),
        );
        Ok(count)
    }

    async fn read_responses(&self, campaign_id: &CampaignId) -> Result<Vec<AnchoredResponse>> {
        Ok(self
            .logs
            .read()
            .await
            .get(campaign_id)
            .map(|log| log.entries.clone())
            .unwrap_or_default())
    }

    async fn prune_ciphertexts(&self, campaign_id: &CampaignId) -> Result<u64> {
        let mut logs = self.logs.write().await;
        let log = logs.entry(campaign_id.clone()).or_default();
        log.pruned = true;

        let mut cleared = 0;
        for entry in &mut log.entries {
            if !entry.ciphertext.is_empty() {
                entry.ciphertext.clear();
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}
