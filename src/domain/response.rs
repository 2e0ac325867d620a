//! Anchored and decrypted survey responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::wire::{bytes_base64, hash256_hex};
use super::{CampaignId, Hash256};

/// A `(commitment, ciphertext)` pair as held by the anchor store.
///
/// The ciphertext is empty once the campaign has been published and pruned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoredResponse {
    pub campaign_id: CampaignId,
    #[serde(with = "hash256_hex")]
    pub commitment: Hash256,
    #[serde(with = "bytes_base64")]
    pub ciphertext: Vec<u8>,
    pub anchored_at: DateTime<Utc>,
}

/// A response that passed decryption and commitment verification
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedResponse {
    pub campaign_id: CampaignId,
    #[serde(with = "hash256_hex")]
    pub commitment: Hash256,
    pub plaintext_answer: String,
    /// Score vector for structured answers, `None` for free text
    pub parsed_answers: Option<Vec<u8>>,
    /// Index in anchor order
    pub position: u32,
    pub ingested_at: DateTime<Utc>,
}

impl fmt::Debug for DecryptedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedResponse")
            .field("campaign_id", &self.campaign_id)
            .field("commitment", &hex::encode(self.commitment))
            .field("position", &self.position)
            .field("structured", &self.parsed_answers.is_some())
            .finish()
    }
}

/// Outcome of one ingestion pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub campaign_id: CampaignId,
    /// Newly stored responses
    pub ingested: u32,
    /// Responses stored by an earlier pass
    pub already_present: u32,
    pub failures: Vec<IngestionFailure>,
}

impl IngestionReport {
    pub fn new(campaign_id: CampaignId) -> Self {
        Self {
            campaign_id,
            ingested: 0,
            already_present: 0,
            failures: Vec::new(),
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A single response rejected during ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionFailure {
    /// Index in anchor order
    pub position: u32,
    pub commitment_hex: String,
    pub reason: IngestionFailureReason,
    /// Human-readable message
    pub message: String,
}

/// Reasons a response can be rejected during ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionFailureReason {
    /// Commitment already seen earlier in anchor order
    Replay,
    /// Ciphertext did not decrypt under the campaign key
    Decryption,
    /// Decrypted plaintext does not hash to the anchored commitment
    CommitmentMismatch,
    /// Structured answer does not fit the campaign template
    MalformedAnswer,
}

impl IngestionFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionFailureReason::Replay => "replay",
            IngestionFailureReason::Decryption => "decryption",
            IngestionFailureReason::CommitmentMismatch => "commitment_mismatch",
            IngestionFailureReason::MalformedAnswer => "malformed_answer",
        }
    }
}

impl fmt::Display for IngestionFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured answer with the wrong number of scores
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("answer has {actual} scores, campaign expects {expected}")]
pub struct MalformedAnswer {
    pub expected: u8,
    pub actual: usize,
}

/// Derive the score vector from a plaintext answer.
///
/// Structured answers are a JSON array of integers in `0..=255`, or an object
/// whose `answers` field is such an array. Anything else is free text and
/// yields `Ok(None)`.
pub fn parse_answers(
    plaintext: &str,
    question_count: Option<u8>,
) -> Result<Option<Vec<u8>>, MalformedAnswer> {
    let value: serde_json::Value = match serde_json::from_str(plaintext) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };

    let array = match &value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => match map.get("answers") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };

    let scores: Option<Vec<u8>> = array
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect();
    let Some(scores) = scores else {
        return Ok(None);
    };

    if let Some(expected) = question_count {
        if scores.len() != usize::from(expected) {
            return Err(MalformedAnswer {
                expected,
                actual: scores.len(),
            });
        }
    }

    Ok(Some(scores))
}
