//! Campaign records and the lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::wire::{bytes_base64, option_hash256_hex};
use super::{CampaignId, CampaignType, Hash256};
use crate::crypto::SealedKey;

/// Campaign lifecycle state.
///
/// Linear: `Draft -> Open -> Launched -> Closed -> Published`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Open,
    Launched,
    Closed,
    Published,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Open => "open",
            CampaignStatus::Launched => "launched",
            CampaignStatus::Closed => "closed",
            CampaignStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "open" => Some(CampaignStatus::Open),
            "launched" => Some(CampaignStatus::Launched),
            "closed" => Some(CampaignStatus::Closed),
            "published" => Some(CampaignStatus::Published),
            _ => None,
        }
    }

    /// Whether respondents may obtain blind signatures
    pub fn accepts_signing(&self) -> bool {
        matches!(self, CampaignStatus::Launched)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Published)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status-changing lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Open,
    Launch,
    Close,
    Publish,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Open => "open",
            LifecycleAction::Launch => "launch",
            LifecycleAction::Close => "close",
            LifecycleAction::Publish => "publish",
        }
    }

    /// The only state this action may start from
    pub fn from_status(&self) -> CampaignStatus {
        match self {
            LifecycleAction::Open => CampaignStatus::Draft,
            LifecycleAction::Launch => CampaignStatus::Open,
            LifecycleAction::Close => CampaignStatus::Launched,
            LifecycleAction::Publish => CampaignStatus::Closed,
        }
    }

    /// The state this action leads to
    pub fn to_status(&self) -> CampaignStatus {
        match self {
            LifecycleAction::Open => CampaignStatus::Open,
            LifecycleAction::Launch => CampaignStatus::Launched,
            LifecycleAction::Close => CampaignStatus::Closed,
            LifecycleAction::Publish => CampaignStatus::Published,
        }
    }

    /// Apply to `current`, returning the next state if legal
    pub fn apply(&self, current: CampaignStatus) -> Option<CampaignStatus> {
        (current == self.from_status()).then(|| self.to_status())
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator input for creating a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub campaign_id: CampaignId,
    pub semester: String,
    pub campaign_type: CampaignType,
    /// Number of scored questions for templated surveys
    #[serde(default)]
    pub question_count: Option<u8>,
}

/// Persisted campaign record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub semester: String,
    pub campaign_type: CampaignType,
    pub question_count: Option<u8>,
    pub status: CampaignStatus,

    /// SubjectPublicKeyInfo DER of the blind-signing key
    #[serde(with = "bytes_base64")]
    pub blind_signing_public_key: Vec<u8>,
    /// SubjectPublicKeyInfo DER of the encryption key
    #[serde(with = "bytes_base64")]
    pub encryption_public_key: Vec<u8>,
    pub blind_signing_private_key: SealedKey,
    pub encryption_private_key: SealedKey,

    /// Verified responses ingested so far
    pub total_responses: u32,
    pub ingested_at: Option<DateTime<Utc>>,

    /// Set when the response set stops accepting ingested responses
    pub frozen_at: Option<DateTime<Utc>>,
    /// Root over the frozen commitment set, staged until publication
    #[serde(with = "option_hash256_hex")]
    pub computed_root: Option<Hash256>,
    pub root_leaf_count: Option<u32>,

    #[serde(with = "option_hash256_hex")]
    pub merkle_root: Option<Hash256>,
    pub published_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Incremented by every stored update
    #[serde(default)]
    pub revision: u32,
}

impl Campaign {
    /// Once frozen, no further responses may be ingested
    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    pub fn is_published(&self) -> bool {
        self.status == CampaignStatus::Published
    }

    pub fn public_keys(&self) -> CampaignPublicKeys {
        CampaignPublicKeys {
            campaign_id: self.id.clone(),
            blind_signing_public_key: self.blind_signing_public_key.clone(),
            encryption_public_key: self.encryption_public_key.clone(),
        }
    }
}

/// Public half of a campaign's keys, handed to respondents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPublicKeys {
    pub campaign_id: CampaignId,
    #[serde(with = "bytes_base64")]
    pub blind_signing_public_key: Vec<u8>,
    #[serde(with = "bytes_base64")]
    pub encryption_public_key: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_is_linear() {
        let mut status = CampaignStatus::Draft;
        for action in [
            LifecycleAction::Open,
            LifecycleAction::Launch,
            LifecycleAction::Close,
            LifecycleAction::Publish,
        ] {
            status = action.apply(status).unwrap();
        }
        assert_eq!(status, CampaignStatus::Published);
        assert!(status.is_terminal());
    }

    #[test]
    fn test_no_skipping_or_repeating() {
        assert_eq!(LifecycleAction::Launch.apply(CampaignStatus::Draft), None);
        assert_eq!(LifecycleAction::Launch.apply(CampaignStatus::Launched), None);
        assert_eq!(LifecycleAction::Publish.apply(CampaignStatus::Launched), None);
        assert_eq!(LifecycleAction::Open.apply(CampaignStatus::Published), None);
    }

    #[test]
    fn test_only_launched_accepts_signing() {
        assert!(CampaignStatus::Launched.accepts_signing());
        assert!(!CampaignStatus::Open.accepts_signing());
        assert!(!CampaignStatus::Closed.accepts_signing());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Open,
            CampaignStatus::Launched,
            CampaignStatus::Closed,
            CampaignStatus::Published,
        ] {
            assert_eq!(CampaignStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CampaignStatus::parse("archived"), None);
    }
}
