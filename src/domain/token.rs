//! Single-use respondent tokens

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::CampaignId;

/// Random bytes behind every token secret
pub const TOKEN_BYTES: usize = 32;

/// A per-student credential that authorizes exactly one blind signature.
///
/// Monotone: unused -> used -> completed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token: String,
    pub campaign_id: CampaignId,
    pub student_email: String,
    pub used: bool,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Issue a fresh unused token for an already normalized email
    pub fn issue(campaign_id: CampaignId, student_email: String) -> Self {
        Self {
            token: generate_token_secret(),
            campaign_id,
            student_email,
            used: false,
            is_completed: false,
            created_at: Utc::now(),
            used_at: None,
            completed_at: None,
        }
    }

    /// Read-only view of the token against `campaign_id`
    pub fn validation(&self, campaign_id: &CampaignId) -> TokenValidation {
        TokenValidation {
            valid: !self.used && &self.campaign_id == campaign_id,
            used: self.used,
            completed: self.is_completed,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token", &"<redacted>")
            .field("campaign_id", &self.campaign_id)
            .field("used", &self.used)
            .field("is_completed", &self.is_completed)
            .finish()
    }
}

/// Result of a token lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenValidation {
    /// Token exists, belongs to the campaign, and is unused
    pub valid: bool,
    pub used: bool,
    pub completed: bool,
}

impl TokenValidation {
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// 32 random bytes, base64url without padding
pub fn generate_token_secret() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Trim and lowercase an email; `None` if it cannot be an address
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || normalized.contains(char::is_whitespace) {
        return None;
    }
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_secret_shape() {
        let a = generate_token_secret();
        let b = generate_token_secret();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), TOKEN_BYTES);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Alice@Example.EDU "),
            Some("alice@example.edu".to_string())
        );
        assert_eq!(normalize_email("no-at-sign"), None);
        assert_eq!(normalize_email("@example.edu"), None);
        assert_eq!(normalize_email("a b@example.edu"), None);
    }

    #[test]
    fn test_validation_scope() {
        let campaign = CampaignId::new("CSE101");
        let mut token = Token::issue(campaign.clone(), "a@x.edu".into());

        assert!(token.validation(&campaign).valid);
        assert!(!token.validation(&CampaignId::new("CSE102")).valid);

        token.used = true;
        let v = token.validation(&campaign);
        assert!(!v.valid);
        assert!(v.used);
        assert!(!v.completed);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = Token::issue(CampaignId::new("CSE101"), "a@x.edu".into());
        let debug = format!("{token:?}");
        assert!(!debug.contains(&token.token));
        assert!(!debug.contains("a@x.edu"));
    }
}
