//! Error types for the survey core

use thiserror::Error;

use crate::crypto::{BlindSignatureError, EncryptionError, HashError, KeyError};
use crate::domain::{CampaignId, CampaignStatus, MalformedAnswer};

/// Errors that can occur in the survey core
#[derive(Error, Debug)]
pub enum SurveyError {
    /// Campaign key generation failed; creation aborts
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Token is unknown or already consumed
    #[error("token is invalid or already used")]
    TokenInvalid,

    /// Token belongs to a different campaign
    #[error("token is not valid for campaign {requested}")]
    TokenScope { requested: CampaignId },

    /// Lost the race to consume a token
    #[error("token already used")]
    TokenAlreadyUsed,

    /// Answer too large for OAEP under the campaign key
    #[error("payload is {len} bytes, maximum is {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Ciphertext did not decrypt
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Plaintext does not hash to its commitment
    #[error("commitment mismatch for {0}")]
    CommitmentMismatch(String),

    /// Operation not legal in the campaign's current state
    #[error("cannot {operation} campaign {campaign_id} in state {status}")]
    InvalidTransition {
        campaign_id: CampaignId,
        operation: &'static str,
        status: CampaignStatus,
    },

    /// Another writer updated the campaign first; the operation may be retried
    #[error("campaign {campaign_id} changed during {operation}")]
    ConcurrentUpdate {
        campaign_id: CampaignId,
        operation: &'static str,
    },

    /// State is right but a requirement is unmet
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("campaign already exists: {0}")]
    DuplicateCampaign(CampaignId),

    /// Same email listed twice, or already holding a token
    #[error("duplicate respondent: {0}")]
    DuplicateRespondent(String),

    /// Commitment already anchored for the campaign
    #[error("duplicate commitment: {0}")]
    DuplicateCommitment(String),

    #[error("commitment not found: {0}")]
    CommitmentNotFound(String),

    #[error("university root not found: {0}")]
    UniversityNotFound(String),

    /// Malformed caller input
    #[error("validation error: {0}")]
    Validation(String),

    /// Any other cryptographic failure
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SurveyError {
    /// The respondent can fix their input and try again
    pub fn is_retryable_by_respondent(&self) -> bool {
        matches!(
            self,
            SurveyError::PayloadTooLarge { .. }
                | SurveyError::TokenScope { .. }
                | SurveyError::Validation(_)
        )
    }

    /// Concerns a single anchored response and never aborts a batch
    pub fn is_per_response(&self) -> bool {
        matches!(
            self,
            SurveyError::Decryption(_)
                | SurveyError::CommitmentMismatch(_)
                | SurveyError::DuplicateCommitment(_)
        )
    }
}

impl From<KeyError> for SurveyError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Generation(msg) => SurveyError::KeyGeneration(msg),
            KeyError::InvalidSealingKey => SurveyError::Configuration(err.to_string()),
            other => SurveyError::Crypto(other.to_string()),
        }
    }
}

impl From<EncryptionError> for SurveyError {
    fn from(err: EncryptionError) -> Self {
        match err {
            EncryptionError::PayloadTooLarge { len, max } => {
                SurveyError::PayloadTooLarge { len, max }
            }
            EncryptionError::EncryptionFailed(msg) => SurveyError::Crypto(msg),
            other => SurveyError::Decryption(other.to_string()),
        }
    }
}

impl From<BlindSignatureError> for SurveyError {
    fn from(err: BlindSignatureError) -> Self {
        match err {
            BlindSignatureError::InvalidLength { .. }
            | BlindSignatureError::MessageOutOfRange
            | BlindSignatureError::InvalidEncoding => SurveyError::Validation(err.to_string()),
            other => SurveyError::Crypto(other.to_string()),
        }
    }
}

impl From<HashError> for SurveyError {
    fn from(err: HashError) -> Self {
        SurveyError::Validation(err.to_string())
    }
}

impl From<MalformedAnswer> for SurveyError {
    fn from(err: MalformedAnswer) -> Self {
        SurveyError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SurveyError {
    fn from(err: tokio::task::JoinError) -> Self {
        SurveyError::Internal(format!("blocking task failed: {err}"))
    }
}

/// Result type for survey operations
pub type Result<T> = std::result::Result<T, SurveyError>;
