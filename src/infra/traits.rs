//! Trait definitions for the collaborators the survey core consumes

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{
    AnchoredResponse, Campaign, CampaignId, CampaignStatus, DecryptedResponse, Hash256, Token,
    UniversityRoot,
};

use super::Result;

/// Persistence for campaign records.
///
/// Invariant: an update is only written over the exact record it was
/// computed from.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Insert a new campaign; fails with `DuplicateCampaign` if the id exists
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<()>;

    async fn get_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>>;

    /// Overwrite the record if its stored status is still `expected` and
    /// its stored revision is still `campaign.revision`.
    ///
    /// The stored revision becomes `campaign.revision + 1`. Returns `false`
    /// when another writer got there first.
    async fn update_campaign(&self, campaign: &Campaign, expected: CampaignStatus)
        -> Result<bool>;
}

/// Single-use respondent tokens.
///
/// Invariant: `mark_used` succeeds for exactly one caller per token.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Insert all tokens or none.
    ///
    /// Fails with `DuplicateRespondent` if any email already holds a token
    /// for its campaign.
    async fn insert_tokens(&self, tokens: &[Token]) -> Result<()>;

    async fn get_token(&self, token: &str) -> Result<Option<Token>>;

    /// Flip `used` from false to true.
    ///
    /// `TokenInvalid` for unknown tokens, `TokenAlreadyUsed` if it was
    /// already consumed.
    async fn mark_used(&self, token: &str) -> Result<()>;

    /// Flip `used` from false to true only while the token's campaign is
    /// `Launched`, in the same atomic step.
    ///
    /// Besides the `mark_used` errors: `TokenScope` if the token belongs to
    /// another campaign, `InvalidTransition` if the campaign has left
    /// `Launched`.
    async fn mark_used_while_launched(&self, token: &str, campaign_id: &CampaignId)
        -> Result<()>;

    /// Mark a used token completed; a no-op if already completed
    async fn mark_completed(&self, token: &str) -> Result<()>;

    async fn list_tokens(&self, campaign_id: &CampaignId) -> Result<Vec<Token>>;
}

/// Decrypted, verified responses
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Store a response; returns `false` if its commitment was already stored.
    ///
    /// Fails with `Precondition` once the campaign's response set is frozen.
    async fn store_response(&self, response: &DecryptedResponse) -> Result<bool>;

    async fn has_response(&self, campaign_id: &CampaignId, commitment: &Hash256)
        -> Result<bool>;

    /// All responses for a campaign, in anchor order
    async fn list_responses(&self, campaign_id: &CampaignId) -> Result<Vec<DecryptedResponse>>;
}

/// Append-only public store holding anchored `(commitment, ciphertext)` pairs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AnchorStore: Send + Sync {
    /// Anchor a batch of responses.
    ///
    /// Rejects mismatched lengths, commitments already anchored for the
    /// campaign, and campaigns that have been pruned. Returns the number
    /// anchored.
    async fn submit_batch(
        &self,
        campaign_id: &CampaignId,
        commitments: Vec<Hash256>,
        ciphertexts: Vec<Vec<u8>>,
    ) -> Result<usize>;

    /// All anchored pairs for a campaign, in anchor order
    async fn read_responses(&self, campaign_id: &CampaignId) -> Result<Vec<AnchoredResponse>>;

    /// Drop ciphertexts after publication and refuse further submissions.
    ///
    /// Commitments stay readable. Returns the number of ciphertexts cleared.
    async fn prune_ciphertexts(&self, campaign_id: &CampaignId) -> Result<u64>;
}

/// Final roots over published campaign roots
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UniversityRootStore: Send + Sync {
    /// Insert or replace, keeping the original `created_at`
    async fn upsert_university_root(&self, root: &UniversityRoot) -> Result<()>;

    async fn get_university_root(&self, university_id: &str) -> Result<Option<UniversityRoot>>;
}
