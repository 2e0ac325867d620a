//! Core type definitions shared across the survey core

use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::crypto::Hash256;

/// Longest campaign id the anchor program accepts
pub const MAX_CAMPAIGN_ID_LEN: usize = 50;

/// Longest semester label the anchor program accepts
pub const MAX_SEMESTER_LEN: usize = 20;

/// Longest university id for final-root records
pub const MAX_UNIVERSITY_ID_LEN: usize = 50;

/// Campaign identifier (non-empty, at most 50 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the length rules enforced by the anchor program
    pub fn validate(&self) -> Result<(), String> {
        if self.0.trim().is_empty() {
            return Err("campaign id must not be empty".to_string());
        }
        if self.0.len() > MAX_CAMPAIGN_ID_LEN {
            return Err(format!(
                "campaign id is {} bytes, limit is {MAX_CAMPAIGN_ID_LEN}",
                self.0.len()
            ));
        }
        Ok(())
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CampaignId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of survey a campaign runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    /// End-of-course evaluation
    Course,
    /// One-off event feedback
    Event,
}

impl CampaignType {
    pub fn as_u8(&self) -> u8 {
        match self {
            CampaignType::Course => 0,
            CampaignType::Event => 1,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CampaignType::Course),
            1 => Some(CampaignType::Event),
            _ => None,
        }
    }
}
