//! Survey service
//!
//! Orchestrates the campaign lifecycle over the store traits:
//! key generation at creation, blind signing while launched, ingestion and
//! root computation once closed, and publication. Every campaign write is a
//! compare-and-set on the status and revision it was computed from.
//!
//! RSA and AES work is synchronous and runs on the blocking pool.

mod ingest;
mod proofs;
mod tokens;

use chrono::Utc;
use rsa::RsaPrivateKey;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::crypto::{
    self, encode_public_key, hash_from_hex, KeyPurpose, KeySealer, KeySource, OsKeySource,
    SealedKey,
};
use crate::domain::{
    Campaign, CampaignId, CampaignPublicKeys, CampaignStatus, LifecycleAction, NewCampaign,
    MAX_SEMESTER_LEN,
};
use crate::infra::{
    AnchorStore, CampaignStore, InMemoryAnchorStore, InMemoryStore, ResponseStore, Result,
    SqliteSurveyStore, SurveyError, TokenLedger, UniversityRootStore,
};

/// The collaborators a [`SurveyService`] runs against
#[derive(Clone)]
pub struct SurveyStores {
    pub campaigns: Arc<dyn CampaignStore>,
    pub tokens: Arc<dyn TokenLedger>,
    pub responses: Arc<dyn ResponseStore>,
    pub anchors: Arc<dyn AnchorStore>,
    pub roots: Arc<dyn UniversityRootStore>,
}

impl SurveyStores {
    /// Everything in memory
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            campaigns: store.clone(),
            tokens: store.clone(),
            responses: store.clone(),
            anchors: Arc::new(InMemoryAnchorStore::new()),
            roots: store,
        }
    }

    /// SQLite persistence with an external anchor store
    pub fn sqlite(store: SqliteSurveyStore, anchors: Arc<dyn AnchorStore>) -> Self {
        let store = Arc::new(store);
        Self {
            campaigns: store.clone(),
            tokens: store.clone(),
            responses: store.clone(),
            anchors,
            roots: store,
        }
    }
}

/// Anonymous survey core
pub struct SurveyService {
    stores: SurveyStores,
    key_source: Arc<dyn KeySource>,
    sealer: KeySealer,
}

impl SurveyService {
    pub fn new(stores: SurveyStores, sealer: KeySealer) -> Self {
        Self {
            stores,
            key_source: Arc::new(OsKeySource),
            sealer,
        }
    }

    /// Replace the key source (tests inject pre-generated keys)
    pub fn with_key_source(mut self, key_source: Arc<dyn KeySource>) -> Self {
        self.key_source = key_source;
        self
    }

    pub fn stores(&self) -> &SurveyStores {
        &self.stores
    }

    // ------------------------------------------------------------------
    // Campaign creation and keys
    // ------------------------------------------------------------------

    /// Validate, generate and seal keys, and persist a `Draft` campaign
    #[instrument(skip_all, fields(campaign_id = %new.campaign_id))]
    pub async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign> {
        new.campaign_id.validate().map_err(SurveyError::Validation)?;
        if new.semester.trim().is_empty() || new.semester.len() > MAX_SEMESTER_LEN {
            return Err(SurveyError::Validation(format!(
                "semester must be 1 to {MAX_SEMESTER_LEN} bytes"
            )));
        }
        if new.question_count == Some(0) {
            return Err(SurveyError::Validation(
                "question_count must be positive".to_string(),
            ));
        }

        // key generation is expensive; fail fast on an obvious duplicate
        if self
            .stores
            .campaigns
            .get_campaign(&new.campaign_id)
            .await?
            .is_some()
        {
            return Err(SurveyError::DuplicateCampaign(new.campaign_id));
        }

        let key_source = self.key_source.clone();
        let sealer = self.sealer.clone();
        let id = new.campaign_id.to_string();
        let material = tokio::task::spawn_blocking(move || -> Result<KeyMaterial> {
            let keys = key_source.generate()?;
            Ok(KeyMaterial {
                blind_signing_public_key: encode_public_key(&keys.blind_signing_public())?,
                encryption_public_key: encode_public_key(&keys.encryption_public())?,
                blind_signing_private_key: sealer.seal(
                    &id,
                    KeyPurpose::BlindSigning,
                    &keys.blind_signing,
                )?,
                encryption_private_key: sealer.seal(&id, KeyPurpose::Encryption, &keys.encryption)?,
            })
        })
        .await??;

        let now = Utc::now();
        let campaign = Campaign {
            id: new.campaign_id,
            semester: new.semester.trim().to_string(),
            campaign_type: new.campaign_type,
            question_count: new.question_count,
            status: CampaignStatus::Draft,
            blind_signing_public_key: material.blind_signing_public_key,
            encryption_public_key: material.encryption_public_key,
            blind_signing_private_key: material.blind_signing_private_key,
            encryption_private_key: material.encryption_private_key,
            total_responses: 0,
            ingested_at: None,
            frozen_at: None,
            computed_root: None,
            root_leaf_count: None,
            merkle_root: None,
            published_at: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        };
        self.stores.campaigns.insert_campaign(&campaign).await?;

        info!(
            campaign_type = ?campaign.campaign_type,
            semester = %campaign.semester,
            "Campaign created"
        );
        Ok(campaign)
    }

    pub async fn get_campaign(&self, campaign_id: &CampaignId) -> Result<Campaign> {
        self.stores
            .campaigns
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| SurveyError::CampaignNotFound(campaign_id.clone()))
    }

    /// Public keys respondents need to blind and encrypt
    pub async fn get_public_keys(&self, campaign_id: &CampaignId) -> Result<CampaignPublicKeys> {
        Ok(self.get_campaign(campaign_id).await?.public_keys())
    }

    /// Decrypt a ciphertext under the campaign's encryption key
    pub async fn decrypt_response(
        &self,
        campaign_id: &CampaignId,
        ciphertext: Vec<u8>,
    ) -> Result<String> {
        let campaign = self.get_campaign(campaign_id).await?;
        let key = self
            .unseal(&campaign.id, campaign.encryption_private_key.clone())
            .await?;
        let plaintext =
            tokio::task::spawn_blocking(move || crypto::decrypt_answer(&ciphertext, &key))
                .await??;
        Ok(plaintext)
    }

    /// Check a plaintext against a hex commitment
    pub fn verify_commitment(&self, plaintext: &str, commitment_hex: &str) -> Result<bool> {
        let commitment = hash_from_hex(commitment_hex)?;
        Ok(crypto::verify_commitment(plaintext, &commitment))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Draft -> Open
    pub async fn open(&self, campaign_id: &CampaignId) -> Result<Campaign> {
        self.transition(campaign_id, LifecycleAction::Open).await
    }

    /// Launched -> Closed; blind signing stops
    pub async fn close(&self, campaign_id: &CampaignId) -> Result<Campaign> {
        self.transition(campaign_id, LifecycleAction::Close).await
    }

    /// Closed -> Published, recording the staged root and pruning ciphertexts
    #[instrument(skip_all, fields(campaign_id = %campaign_id))]
    pub async fn publish(&self, campaign_id: &CampaignId) -> Result<Campaign> {
        let mut campaign = self.get_campaign(campaign_id).await?;
        let action = LifecycleAction::Publish;
        let next = self.next_status(&campaign, action)?;

        let root = campaign.computed_root.ok_or_else(|| {
            SurveyError::Precondition("root must be computed before publishing".to_string())
        })?;

        let now = Utc::now();
        let expected = campaign.status;
        campaign.status = next;
        campaign.merkle_root = Some(root);
        campaign.published_at = Some(now);
        campaign.updated_at = now;
        self.save(&mut campaign, expected, action.as_str()).await?;
        info!(
            merkle_root = %crypto::hash_to_hex(&root),
            total_responses = campaign.total_responses,
            "Campaign published"
        );

        // publication is already committed here
        match self.stores.anchors.prune_ciphertexts(&campaign.id).await {
            Ok(pruned) => info!(pruned, "Ciphertexts pruned"),
            Err(e) => warn!(error = %e, "Pruning ciphertexts failed after publication"),
        }
        Ok(campaign)
    }

    #[instrument(skip_all, fields(campaign_id = %campaign_id, action = %action))]
    async fn transition(
        &self,
        campaign_id: &CampaignId,
        action: LifecycleAction,
    ) -> Result<Campaign> {
        let mut campaign = self.get_campaign(campaign_id).await?;
        let expected = campaign.status;
        campaign.status = self.next_status(&campaign, action)?;
        campaign.updated_at = Utc::now();
        self.save(&mut campaign, expected, action.as_str()).await?;

        info!(from = %expected, to = %campaign.status, "Campaign transitioned");
        Ok(campaign)
    }

    fn next_status(&self, campaign: &Campaign, action: LifecycleAction) -> Result<CampaignStatus> {
        action
            .apply(campaign.status)
            .ok_or_else(|| SurveyError::InvalidTransition {
                campaign_id: campaign.id.clone(),
                operation: action.as_str(),
                status: campaign.status,
            })
    }

    /// Fail with `InvalidTransition` unless the campaign is in `required`
    fn require_status(
        &self,
        campaign: &Campaign,
        required: CampaignStatus,
        operation: &'static str,
    ) -> Result<()> {
        if campaign.status != required {
            return Err(SurveyError::InvalidTransition {
                campaign_id: campaign.id.clone(),
                operation,
                status: campaign.status,
            });
        }
        Ok(())
    }

    /// Write `campaign` if the stored record is still the one it was read as.
    ///
    /// On success `campaign.revision` matches the stored record again.
    async fn save(
        &self,
        campaign: &mut Campaign,
        expected: CampaignStatus,
        operation: &'static str,
    ) -> Result<()> {
        if self
            .stores
            .campaigns
            .update_campaign(campaign, expected)
            .await?
        {
            campaign.revision = campaign.revision.wrapping_add(1);
            return Ok(());
        }

        let current = self.get_campaign(&campaign.id).await?;
        if current.status == expected {
            return Err(SurveyError::ConcurrentUpdate {
                campaign_id: campaign.id.clone(),
                operation,
            });
        }
        Err(SurveyError::InvalidTransition {
            campaign_id: campaign.id.clone(),
            operation,
            status: current.status,
        })
    }

    async fn unseal(&self, campaign_id: &CampaignId, sealed: SealedKey) -> Result<RsaPrivateKey> {
        let sealer = self.sealer.clone();
        let id = campaign_id.to_string();
        let key = tokio::task::spawn_blocking(move || sealer.unseal(&id, &sealed)).await??;
        Ok(key)
    }
}

struct KeyMaterial {
    blind_signing_public_key: Vec<u8>,
    encryption_public_key: Vec<u8>,
    blind_signing_private_key: SealedKey,
    encryption_private_key: SealedKey,
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::crypto::{decode_public_key, encrypt_answer};
    use crate::domain::CampaignType;

    #[tokio::test]
    async fn test_create_campaign_persists_draft_with_sealed_keys() {
        let service = service();
        let campaign = service.create_campaign(new_campaign("CSE101")).await.unwrap();

        assert_eq!(campaign.status, CampaignStatus::Draft);
        assert!(campaign.blind_signing_public_key.len() <= crypto::MAX_PUBLIC_KEY_DER_LEN);
        assert!(decode_public_key(&campaign.blind_signing_public_key).is_ok());
        assert_eq!(
            campaign.encryption_private_key.purpose(),
            KeyPurpose::Encryption
        );

        let keys = service.get_public_keys(&campaign.id).await.unwrap();
        assert_eq!(keys.encryption_public_key, campaign.encryption_public_key);
    }

    #[tokio::test]
    async fn test_create_campaign_validation() {
        let service = service();

        let mut bad_id = new_campaign("x");
        bad_id.campaign_id = CampaignId::new("x".repeat(51));
        assert!(matches!(
            service.create_campaign(bad_id).await,
            Err(SurveyError::Validation(_))
        ));

        let mut bad_semester = new_campaign("CSE101");
        bad_semester.semester = "s".repeat(21);
        assert!(matches!(
            service.create_campaign(bad_semester).await,
            Err(SurveyError::Validation(_))
        ));

        service.create_campaign(new_campaign("CSE101")).await.unwrap();
        assert!(matches!(
            service.create_campaign(new_campaign("CSE101")).await,
            Err(SurveyError::DuplicateCampaign(_))
        ));
    }

    #[tokio::test]
    async fn test_key_generation_failure_aborts_creation() {
        struct FailingKeySource;
        impl KeySource for FailingKeySource {
            fn generate(&self) -> std::result::Result<crypto::CampaignKeys, crypto::KeyError> {
                Err(crypto::KeyError::Generation("no entropy".into()))
            }
        }

        let service = SurveyService::new(SurveyStores::in_memory(), KeySealer::generate())
            .with_key_source(Arc::new(FailingKeySource));
        let new = NewCampaign {
            campaign_id: CampaignId::new("EVT1"),
            semester: "2025S1".into(),
            campaign_type: CampaignType::Event,
            question_count: None,
        };
        assert!(matches!(
            service.create_campaign(new).await,
            Err(SurveyError::KeyGeneration(_))
        ));
        assert!(matches!(
            service.get_campaign(&CampaignId::new("EVT1")).await,
            Err(SurveyError::CampaignNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_rejects_wrong_state() {
        let service = service();
        let id = launched(&service, "CSE101", &["a@x.edu"]).await[0]
            .campaign_id
            .clone();

        // double launch
        assert!(matches!(
            service.launch(&id, &["b@x.edu".to_string()]).await,
            Err(SurveyError::InvalidTransition {
                status: CampaignStatus::Launched,
                ..
            })
        ));
        // publish while launched
        assert!(matches!(
            service.publish(&id).await,
            Err(SurveyError::InvalidTransition { .. })
        ));

        service.close(&id).await.unwrap();
        // publish before compute_root
        assert!(matches!(
            service.publish(&id).await,
            Err(SurveyError::Precondition(_))
        ));
        assert!(matches!(
            service.open(&id).await,
            Err(SurveyError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_decrypt_response_and_verify_commitment() {
        let service = service();
        let campaign = service.create_campaign(new_campaign("CSE101")).await.unwrap();
        let public = decode_public_key(&campaign.encryption_public_key).unwrap();

        let answer = "[5,4,3]";
        let ciphertext = encrypt_answer(answer, &public).unwrap();
        let plaintext = service
            .decrypt_response(&campaign.id, ciphertext)
            .await
            .unwrap();
        assert_eq!(plaintext, answer);

        let commitment_hex = crypto::hash_to_hex(&crypto::commit(answer));
        assert!(service.verify_commitment(answer, &commitment_hex).unwrap());
        assert!(!service.verify_commitment("[5,4,2]", &commitment_hex).unwrap());
        assert!(matches!(
            service.verify_commitment(answer, "zz"),
            Err(SurveyError::Validation(_))
        ));
    }
}
