//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use rsa::{RsaPrivateKey, RsaPublicKey};

use anonymous_survey::crypto::{
    self, blind, commit, decode_public_key, encrypt_answer, generate_rsa_key, CampaignKeys,
    KeyError, KeySealer, KeySource,
};
use anonymous_survey::domain::{CampaignPublicKeys, CampaignType};
use anonymous_survey::{CampaignId, Hash256, NewCampaign, SurveyService, SurveyStores};

fn shared_blind_signing_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| generate_rsa_key().unwrap())
}

fn shared_encryption_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| generate_rsa_key().unwrap())
}

/// Hands out the same two keys to every campaign; RSA-2048 generation is slow
pub struct SharedKeySource;

impl KeySource for SharedKeySource {
    fn generate(&self) -> Result<CampaignKeys, KeyError> {
        Ok(CampaignKeys {
            blind_signing: shared_blind_signing_key().clone(),
            encryption: shared_encryption_key().clone(),
        })
    }
}

pub fn service_with(stores: SurveyStores) -> SurveyService {
    SurveyService::new(stores, KeySealer::generate()).with_key_source(Arc::new(SharedKeySource))
}

pub fn in_memory_service() -> SurveyService {
    service_with(SurveyStores::in_memory())
}

pub fn course(id: &str, question_count: Option<u8>) -> NewCampaign {
    NewCampaign {
        campaign_id: CampaignId::new(id),
        semester: "2025S1".to_string(),
        campaign_type: CampaignType::Course,
        question_count,
    }
}

pub fn emails(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("student{i}@uni.edu")).collect()
}

/// Create, open and launch a campaign; returns the issued token secrets
pub async fn launch(service: &SurveyService, new: NewCampaign, respondents: usize) -> Vec<String> {
    let id = new.campaign_id.clone();
    service.create_campaign(new).await.unwrap();
    service.open(&id).await.unwrap();
    service
        .launch(&id, &emails(respondents))
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.token)
        .collect()
}

/// What a respondent keeps after a successful session
pub struct Submission {
    pub commitment: Hash256,
    pub ciphertext: Vec<u8>,
}

/// Run the respondent side: blind, get signed, unblind, verify, commit and encrypt
pub async fn respond(
    service: &SurveyService,
    campaign_id: &CampaignId,
    token: &str,
    answer: &str,
) -> Submission {
    let keys: CampaignPublicKeys = service.get_public_keys(campaign_id).await.unwrap();
    let signing: RsaPublicKey = decode_public_key(&keys.blind_signing_public_key).unwrap();
    let encryption: RsaPublicKey = decode_public_key(&keys.encryption_public_key).unwrap();

    let commitment = commit(answer);
    let prepared = blind::prepare(&commitment);
    let blinded = blind::blind(&prepared, &signing).unwrap();
    let blind_signature = service
        .sign_blinded(campaign_id, token, blinded.blinded_message)
        .await
        .unwrap();
    let signature =
        blind::finalize(&signing, &prepared, &blind_signature, &blinded.inverse).unwrap();
    assert!(blind::verify(&signing, &signature, &prepared));

    Submission {
        commitment,
        ciphertext: encrypt_answer(answer, &encryption).unwrap(),
    }
}

pub async fn submit_all(service: &SurveyService, campaign_id: &CampaignId, subs: &[Submission]) {
    service
        .submit_responses(
            campaign_id,
            subs.iter().map(|s| s.commitment).collect(),
            subs.iter().map(|s| s.ciphertext.clone()).collect(),
        )
        .await
        .unwrap();
}

pub fn hex(hash: &Hash256) -> String {
    crypto::hash_to_hex(hash)
}
