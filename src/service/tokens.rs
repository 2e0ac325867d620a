//! Launch, respondent tokens and blind signing

use chrono::Utc;
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};

use crate::crypto::{self, decode_public_key, BlindSignature, BlindedMessage};
use crate::domain::{
    normalize_email, Campaign, CampaignId, CampaignStatus, LifecycleAction, Token,
    TokenValidation,
};
use crate::infra::{Result, SurveyError};

use super::SurveyService;

impl SurveyService {
    /// Open -> Launched, issuing a token to every listed student.
    ///
    /// Students already holding a token for the campaign are skipped. If
    /// token issuance fails the campaign is put back to `Open`.
    #[instrument(skip_all, fields(campaign_id = %campaign_id))]
    pub async fn launch(&self, campaign_id: &CampaignId, emails: &[String]) -> Result<Vec<Token>> {
        let mut campaign = self.get_campaign(campaign_id).await?;
        let action = LifecycleAction::Launch;
        let next = self.next_status(&campaign, action)?;

        let emails = normalize_emails(emails)?;
        let existing: HashSet<String> = self
            .stores
            .tokens
            .list_tokens(campaign_id)
            .await?
            .into_iter()
            .map(|t| t.student_email)
            .collect();
        let tokens: Vec<Token> = emails
            .into_iter()
            .filter(|email| !existing.contains(email))
            .map(|email| Token::issue(campaign_id.clone(), email))
            .collect();
        if tokens.is_empty() && existing.is_empty() {
            return Err(SurveyError::Precondition(
                "launch requires at least one eligible student".to_string(),
            ));
        }

        let expected = campaign.status;
        campaign.status = next;
        campaign.updated_at = Utc::now();
        self.save(&mut campaign, expected, action.as_str()).await?;

        if let Err(e) = self.stores.tokens.insert_tokens(&tokens).await {
            warn!(error = %e, "Token issuance failed, reverting launch");
            campaign.status = expected;
            campaign.updated_at = Utc::now();
            if !self.stores.campaigns.update_campaign(&campaign, next).await? {
                error!(error = %e, "Launch revert lost to a concurrent update");
                return Err(SurveyError::ConcurrentUpdate {
                    campaign_id: campaign.id,
                    operation: "revert launch",
                });
            }
            return Err(e);
        }

        info!(issued = tokens.len(), "Campaign launched");
        Ok(tokens)
    }

    /// Issue tokens for additional students while the campaign is open or launched
    #[instrument(skip_all, fields(campaign_id = %campaign_id))]
    pub async fn generate_tokens(
        &self,
        campaign_id: &CampaignId,
        emails: &[String],
    ) -> Result<Vec<Token>> {
        let campaign = self.get_campaign(campaign_id).await?;
        if !matches!(
            campaign.status,
            CampaignStatus::Open | CampaignStatus::Launched
        ) {
            return Err(SurveyError::InvalidTransition {
                campaign_id: campaign.id,
                operation: "generate tokens",
                status: campaign.status,
            });
        }

        let emails = normalize_emails(emails)?;
        if emails.is_empty() {
            return Err(SurveyError::Validation("no emails given".to_string()));
        }
        let tokens: Vec<Token> = emails
            .into_iter()
            .map(|email| Token::issue(campaign_id.clone(), email))
            .collect();
        self.stores.tokens.insert_tokens(&tokens).await?;

        info!(issued = tokens.len(), "Tokens generated");
        Ok(tokens)
    }

    /// Read-only token check
    pub async fn validate_token(
        &self,
        token: &str,
        campaign_id: &CampaignId,
    ) -> Result<TokenValidation> {
        Ok(self
            .stores
            .tokens
            .get_token(token)
            .await?
            .map(|t| t.validation(campaign_id))
            .unwrap_or_else(TokenValidation::unknown))
    }

    pub async fn mark_token_used(&self, token: &str) -> Result<()> {
        self.stores.tokens.mark_used(token).await
    }

    pub async fn mark_token_completed(&self, token: &str) -> Result<()> {
        self.stores.tokens.mark_completed(token).await
    }

    /// Sign a blinded message, consuming the respondent's token.
    ///
    /// The token is only checked until the signature exists. It is consumed
    /// last, conditional on the campaign still being launched, so a request
    /// that fails or races a close never burns a token.
    #[instrument(skip_all, fields(campaign_id = %campaign_id))]
    pub async fn sign_blinded(
        &self,
        campaign_id: &CampaignId,
        token: &str,
        blinded: BlindedMessage,
    ) -> Result<BlindSignature> {
        let campaign = self.get_campaign(campaign_id).await?;
        if !campaign.status.accepts_signing() {
            return Err(SurveyError::InvalidTransition {
                campaign_id: campaign.id,
                operation: "sign",
                status: campaign.status,
            });
        }

        let public_key = decode_public_key(&campaign.blind_signing_public_key)?;
        crypto::blind::check_blinded_message(&blinded, &public_key)?;
        self.check_token(&campaign, token).await?;

        let key = self
            .unseal(&campaign.id, campaign.blind_signing_private_key.clone())
            .await?;
        let signature =
            tokio::task::spawn_blocking(move || crypto::blind::blind_sign(&blinded, &key))
                .await??;

        match self
            .stores
            .tokens
            .mark_used_while_launched(token, &campaign.id)
            .await
        {
            Ok(()) => {}
            // lost the race to a concurrent request with the same token
            Err(SurveyError::TokenAlreadyUsed) => return Err(SurveyError::TokenInvalid),
            Err(e) => return Err(e),
        }

        info!("Blind signature issued");
        Ok(signature)
    }

    /// Read-only check that `token` can still be spent on `campaign`
    async fn check_token(&self, campaign: &Campaign, token: &str) -> Result<()> {
        let record = self
            .stores
            .tokens
            .get_token(token)
            .await?
            .ok_or(SurveyError::TokenInvalid)?;

        if record.campaign_id != campaign.id {
            return Err(SurveyError::TokenScope {
                requested: campaign.id.clone(),
            });
        }
        if record.used {
            return Err(SurveyError::TokenInvalid);
        }
        Ok(())
    }
}

/// Normalize and reject duplicates within one request
fn normalize_emails(emails: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::with_capacity(emails.len());
    let mut normalized = Vec::with_capacity(emails.len());
    for raw in emails {
        let email = normalize_email(raw)
            .ok_or_else(|| SurveyError::Validation(format!("invalid email: {}", raw.trim())))?;
        if !seen.insert(email.clone()) {
            return Err(SurveyError::DuplicateRespondent(email));
        }
        normalized.push(email);
    }
    Ok(normalized)
}
