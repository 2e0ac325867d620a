//! SQLite-backed campaign, token, response and root store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, FromRow};

use crate::crypto::{hash_from_hex, hash_to_hex, KeyPurpose, SealedKey};
use crate::domain::{
    Campaign, CampaignId, CampaignStatus, CampaignType, DecryptedResponse, Hash256, Token,
    UniversityRoot,
};
use crate::infra::{
    CampaignStore, ResponseStore, Result, SurveyError, TokenLedger, UniversityRootStore,
};

/// SQLite store implementing every persistence trait
#[derive(Clone)]
pub struct SqliteSurveyStore {
    pool: SqlitePool,
}

impl SqliteSurveyStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run embedded migrations
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool)
            .await
            .map_err(|e| SurveyError::Internal(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SurveyError::Internal(format!("invalid {field}: {e}")))
}

fn parse_optional_timestamp(field: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(field, &s)).transpose()
}

fn parse_optional_hash(field: &str, value: Option<String>) -> Result<Option<Hash256>> {
    value
        .map(|s| hash_from_hex(&s))
        .transpose()
        .map_err(|e| SurveyError::Internal(format!("invalid {field}: {e}")))
}

#[async_trait]
impl CampaignStore for SqliteSurveyStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, semester, campaign_type, question_count, status,
                blind_signing_public_key, encryption_public_key,
                blind_signing_private_key, encryption_private_key,
                total_responses, ingested_at, frozen_at, computed_root,
                root_leaf_count, merkle_root, published_at, created_at,
                updated_at, revision
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(campaign.id.as_str())
        .bind(&campaign.semester)
        .bind(campaign.campaign_type.as_u8() as i64)
        .bind(campaign.question_count.map(i64::from))
        .bind(campaign.status.as_str())
        .bind(&campaign.blind_signing_public_key)
        .bind(&campaign.encryption_public_key)
        .bind(campaign.blind_signing_private_key.as_bytes())
        .bind(campaign.encryption_private_key.as_bytes())
        .bind(campaign.total_responses as i64)
        .bind(campaign.ingested_at.map(|t| t.to_rfc3339()))
        .bind(campaign.frozen_at.map(|t| t.to_rfc3339()))
        .bind(campaign.computed_root.as_ref().map(hash_to_hex))
        .bind(campaign.root_leaf_count.map(i64::from))
        .bind(campaign.merkle_root.as_ref().map(hash_to_hex))
        .bind(campaign.published_at.map(|t| t.to_rfc3339()))
        .bind(campaign.created_at.to_rfc3339())
        .bind(campaign.updated_at.to_rfc3339())
        .bind(i64::from(campaign.revision))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(SurveyError::DuplicateCampaign(campaign.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT id, semester, campaign_type, question_count, status,
                   blind_signing_public_key, encryption_public_key,
                   blind_signing_private_key, encryption_private_key,
                   total_responses, ingested_at, frozen_at, computed_root,
                   root_leaf_count, merkle_root, published_at, created_at,
                   updated_at, revision
            FROM campaigns
            WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Campaign::try_from).transpose()
    }

    async fn update_campaign(
        &self,
        campaign: &Campaign,
        expected: CampaignStatus,
    ) -> Result<bool> {
        // keys and creation time never change after insert
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                status = ?, total_responses = ?, ingested_at = ?,
                frozen_at = ?, computed_root = ?, root_leaf_count = ?,
                merkle_root = ?, published_at = ?, updated_at = ?,
                revision = revision + 1
            WHERE id = ? AND status = ? AND revision = ?
            "#,
        )
        .bind(campaign.status.as_str())
        .bind(campaign.total_responses as i64)
        .bind(campaign.ingested_at.map(|t| t.to_rfc3339()))
        .bind(campaign.frozen_at.map(|t| t.to_rfc3339()))
        .bind(campaign.computed_root.as_ref().map(hash_to_hex))
        .bind(campaign.root_leaf_count.map(i64::from))
        .bind(campaign.merkle_root.as_ref().map(hash_to_hex))
        .bind(campaign.published_at.map(|t| t.to_rfc3339()))
        .bind(campaign.updated_at.to_rfc3339())
        .bind(campaign.id.as_str())
        .bind(expected.as_str())
        .bind(i64::from(campaign.revision))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM campaigns WHERE id = ?")
            .bind(campaign.id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(SurveyError::CampaignNotFound(campaign.id.clone())),
        }
    }
}

#[async_trait]
impl TokenLedger for SqliteSurveyStore {
    async fn insert_tokens(&self, tokens: &[Token]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for token in tokens {
            let result = sqlx::query(
                r#"
                INSERT INTO tokens (
                    token, campaign_id, student_email, used, is_completed,
                    created_at, used_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&token.token)
            .bind(token.campaign_id.as_str())
            .bind(&token.student_email)
            .bind(token.used)
            .bind(token.is_completed)
            .bind(token.created_at.to_rfc3339())
            .bind(token.used_at.map(|t| t.to_rfc3339()))
            .bind(token.completed_at.map(|t| t.to_rfc3339()))
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(SurveyError::DuplicateRespondent(token.student_email.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_token(&self, token: &str) -> Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT token, campaign_id, student_email, used, is_completed,
                   created_at, used_at, completed_at
            FROM tokens
            WHERE token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Token::try_from).transpose()
    }

    async fn mark_used(&self, token: &str) -> Result<()> {
        let result = sqlx::query("UPDATE tokens SET used = 1, used_at = ? WHERE token = ? AND used = 0")
            .bind(Utc::now().to_rfc3339())
            .bind(token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: Option<(String,)> = sqlx::query_as("SELECT token FROM tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Err(SurveyError::TokenAlreadyUsed),
            None => Err(SurveyError::TokenInvalid),
        }
    }

    async fn mark_used_while_launched(
        &self,
        token: &str,
        campaign_id: &CampaignId,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tokens SET used = 1, used_at = ?
            WHERE token = ? AND campaign_id = ? AND used = 0
              AND EXISTS (SELECT 1 FROM campaigns WHERE id = ? AND status = ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(token)
        .bind(campaign_id.as_str())
        .bind(campaign_id.as_str())
        .bind(CampaignStatus::Launched.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let record = self.get_token(token).await?.ok_or(SurveyError::TokenInvalid)?;
        if &record.campaign_id != campaign_id {
            return Err(SurveyError::TokenScope {
                requested: campaign_id.clone(),
            });
        }
        if record.used {
            return Err(SurveyError::TokenAlreadyUsed);
        }
        let campaign = self
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| SurveyError::CampaignNotFound(campaign_id.clone()))?;
        Err(SurveyError::InvalidTransition {
            campaign_id: campaign_id.clone(),
            operation: "sign",
            status: campaign.status,
        })
    }

    async fn mark_completed(&self, token: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tokens SET is_completed = 1, completed_at = ?
            WHERE token = ? AND used = 1 AND is_completed = 0
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_token(token).await? {
            None => Err(SurveyError::TokenInvalid),
            Some(t) if t.is_completed => Ok(()),
            Some(_) => Err(SurveyError::Precondition(
                "token must be used before it is completed".to_string(),
            )),
        }
    }

    async fn list_tokens(&self, campaign_id: &CampaignId) -> Result<Vec<Token>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT token, campaign_id, student_email, used, is_completed,
                   created_at, used_at, completed_at
            FROM tokens
            WHERE campaign_id = ?
            ORDER BY student_email ASC
            "#,
        )
        .bind(campaign_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Token::try_from).collect()
    }
}

#[async_trait]
impl ResponseStore for SqliteSurveyStore {
    async fn store_response(&self, response: &DecryptedResponse) -> Result<bool> {
        let parsed = response
            .parsed_answers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| SurveyError::Internal(e.to_string()))?;

        // the frozen check and the insert are one statement
        let result = sqlx::query(
            r#"
            INSERT INTO decrypted_responses (
                campaign_id, commitment, plaintext_answer, parsed_answers,
                position, ingested_at
            )
            SELECT ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM campaigns WHERE id = ? AND frozen_at IS NOT NULL
            )
            ON CONFLICT(campaign_id, commitment) DO NOTHING
            "#,
        )
        .bind(response.campaign_id.as_str())
        .bind(hash_to_hex(&response.commitment))
        .bind(&response.plaintext_answer)
        .bind(parsed)
        .bind(response.position as i64)
        .bind(response.ingested_at.to_rfc3339())
        .bind(response.campaign_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let frozen: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM campaigns WHERE id = ? AND frozen_at IS NOT NULL",
        )
        .bind(response.campaign_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        if frozen.0 > 0 {
            return Err(SurveyError::Precondition(format!(
                "response set of {} is frozen",
                response.campaign_id
            )));
        }
        Ok(false)
    }

    async fn has_response(
        &self,
        campaign_id: &CampaignId,
        commitment: &Hash256,
    ) -> Result<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM decrypted_responses WHERE campaign_id = ? AND commitment = ?",
        )
        .bind(campaign_id.as_str())
        .bind(hash_to_hex(commitment))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 > 0)
    }

    async fn list_responses(&self, campaign_id: &CampaignId) -> Result<Vec<DecryptedResponse>> {
        let rows = sqlx::query_as::<_, ResponseRow>(
            r#"
            SELECT campaign_id, commitment, plaintext_answer, parsed_answers,
                   position, ingested_at
            FROM decrypted_responses
            WHERE campaign_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(campaign_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DecryptedResponse::try_from).collect()
    }
}

#[async_trait]
impl UniversityRootStore for SqliteSurveyStore {
    async fn upsert_university_root(&self, root: &UniversityRoot) -> Result<()> {
        let campaign_ids = serde_json::to_string(&root.campaign_ids)
            .map_err(|e| SurveyError::Internal(e.to_string()))?;
        let final_root = hash_to_hex(&root.final_merkle_root);
        let updated_at = root.updated_at.to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO university_roots (
                university_id, campaign_ids, total_campaigns, final_merkle_root,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(university_id) DO UPDATE SET
                campaign_ids = ?, total_campaigns = ?, final_merkle_root = ?, updated_at = ?
            "#,
        )
        .bind(&root.university_id)
        .bind(&campaign_ids)
        .bind(root.total_campaigns as i64)
        .bind(&final_root)
        .bind(root.created_at.to_rfc3339())
        .bind(&updated_at)
        .bind(&campaign_ids)
        .bind(root.total_campaigns as i64)
        .bind(&final_root)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_university_root(&self, university_id: &str) -> Result<Option<UniversityRoot>> {
        let row = sqlx::query_as::<_, UniversityRootRow>(
            r#"
            SELECT university_id, campaign_ids, total_campaigns, final_merkle_root,
                   created_at, updated_at
            FROM university_roots
            WHERE university_id = ?
            "#,
        )
        .bind(university_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UniversityRoot::try_from).transpose()
    }
}

/// Raw row from the campaigns table
#[derive(Debug, FromRow)]
struct CampaignRow {
    id: String,
    semester: String,
    campaign_type: i64,
    question_count: Option<i64>,
    status: String,
    blind_signing_public_key: Vec<u8>,
    encryption_public_key: Vec<u8>,
    blind_signing_private_key: Vec<u8>,
    encryption_private_key: Vec<u8>,
    total_responses: i64,
    ingested_at: Option<String>,
    frozen_at: Option<String>,
    computed_root: Option<String>,
    root_leaf_count: Option<i64>,
    merkle_root: Option<String>,
    published_at: Option<String>,
    created_at: String,
    updated_at: String,
    revision: i64,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = SurveyError;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let campaign_type = u8::try_from(row.campaign_type)
            .ok()
            .and_then(CampaignType::from_u8)
            .ok_or_else(|| {
                SurveyError::Internal(format!("invalid campaign_type: {}", row.campaign_type))
            })?;

        let status = CampaignStatus::parse(&row.status)
            .ok_or_else(|| SurveyError::Internal(format!("invalid status: {}", row.status)))?;

        let question_count = row
            .question_count
            .map(u8::try_from)
            .transpose()
            .map_err(|e| SurveyError::Internal(format!("invalid question_count: {e}")))?;

        let root_leaf_count = row
            .root_leaf_count
            .map(u32::try_from)
            .transpose()
            .map_err(|e| SurveyError::Internal(format!("invalid root_leaf_count: {e}")))?;

        let revision = u32::try_from(row.revision)
            .map_err(|e| SurveyError::Internal(format!("invalid revision: {e}")))?;

        Ok(Campaign {
            id: CampaignId::new(row.id),
            semester: row.semester,
            campaign_type,
            question_count,
            status,
            blind_signing_public_key: row.blind_signing_public_key,
            encryption_public_key: row.encryption_public_key,
            blind_signing_private_key: SealedKey::from_parts(
                KeyPurpose::BlindSigning,
                row.blind_signing_private_key,
            ),
            encryption_private_key: SealedKey::from_parts(
                KeyPurpose::Encryption,
                row.encryption_private_key,
            ),
            total_responses: row.total_responses as u32,
            ingested_at: parse_optional_timestamp("ingested_at", row.ingested_at)?,
            frozen_at: parse_optional_timestamp("frozen_at", row.frozen_at)?,
            computed_root: parse_optional_hash("computed_root", row.computed_root)?,
            root_leaf_count,
            merkle_root: parse_optional_hash("merkle_root", row.merkle_root)?,
            published_at: parse_optional_timestamp("published_at", row.published_at)?,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
            revision,
        })
    }
}

/// Raw row from the tokens table
#[derive(Debug, FromRow)]
struct TokenRow {
    token: String,
    campaign_id: String,
    student_email: String,
    used: bool,
    is_completed: bool,
    created_at: String,
    used_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<TokenRow> for Token {
    type Error = SurveyError;

    fn try_from(row: TokenRow) -> Result<Self> {
        Ok(Token {
            token: row.token,
            campaign_id: CampaignId::new(row.campaign_id),
            student_email: row.student_email,
            used: row.used,
            is_completed: row.is_completed,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            used_at: parse_optional_timestamp("used_at", row.used_at)?,
            completed_at: parse_optional_timestamp("completed_at", row.completed_at)?,
        })
    }
}

/// Raw row from the decrypted_responses table
#[derive(FromRow)]
struct ResponseRow {
    campaign_id: String,
    commitment: String,
    plaintext_answer: String,
    parsed_answers: Option<String>,
    position: i64,
    ingested_at: String,
}

impl TryFrom<ResponseRow> for DecryptedResponse {
    type Error = SurveyError;

    fn try_from(row: ResponseRow) -> Result<Self> {
        let commitment = hash_from_hex(&row.commitment)
            .map_err(|e| SurveyError::Internal(format!("invalid commitment: {e}")))?;

        let parsed_answers = row
            .parsed_answers
            .map(|s| serde_json::from_str::<Vec<u8>>(&s))
            .transpose()
            .map_err(|e| SurveyError::Internal(format!("invalid parsed_answers: {e}")))?;

        Ok(DecryptedResponse {
            campaign_id: CampaignId::new(row.campaign_id),
            commitment,
            plaintext_answer: row.plaintext_answer,
            parsed_answers,
            position: row.position as u32,
            ingested_at: parse_timestamp("ingested_at", &row.ingested_at)?,
        })
    }
}

/// Raw row from the university_roots table
#[derive(Debug, FromRow)]
struct UniversityRootRow {
    university_id: String,
    campaign_ids: String,
    total_campaigns: i64,
    final_merkle_root: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<UniversityRootRow> for UniversityRoot {
    type Error = SurveyError;

    fn try_from(row: UniversityRootRow) -> Result<Self> {
        let campaign_ids: Vec<CampaignId> = serde_json::from_str(&row.campaign_ids)
            .map_err(|e| SurveyError::Internal(format!("invalid campaign_ids: {e}")))?;

        let final_merkle_root = hash_from_hex(&row.final_merkle_root)
            .map_err(|e| SurveyError::Internal(format!("invalid final_merkle_root: {e}")))?;

        Ok(UniversityRoot {
            university_id: row.university_id,
            campaign_ids,
            total_campaigns: row.total_campaigns as u32,
            final_merkle_root,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_db() -> SqliteSurveyStore {
        // one connection so every query sees the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteSurveyStore::new(pool);
        store.initialize().await.unwrap();
        store
    }

    fn test_campaign(id: &str) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: CampaignId::new(id),
            semester: "2025S1".into(),
            campaign_type: CampaignType::Course,
            question_count: Some(5),
            status: CampaignStatus::Draft,
            blind_signing_public_key: vec![1, 2, 3],
            encryption_public_key: vec![4, 5, 6],
            blind_signing_private_key: SealedKey::from_parts(KeyPurpose::BlindSigning, vec![7; 40]),
            encryption_private_key: SealedKey::from_parts(KeyPurpose::Encryption, vec![8; 40]),
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
        }
    }

    #[tokio::test]
    async fn test_campaign_roundtrip_and_duplicate() {
        let store = create_test_db().await;
        let campaign = test_campaign("CSE101");
        store.insert_campaign(&campaign).await.unwrap();

        let loaded = store.get_campaign(&campaign.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CampaignStatus::Draft);
        assert_eq!(loaded.question_count, Some(5));
        assert_eq!(loaded.blind_signing_private_key, campaign.blind_signing_private_key);
        assert_eq!(loaded.encryption_private_key.purpose(), KeyPurpose::Encryption);

        assert!(matches!(
            store.insert_campaign(&campaign).await,
            Err(SurveyError::DuplicateCampaign(_))
        ));
        assert!(store
            .get_campaign(&CampaignId::new("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_campaign_is_compare_and_set() {
        let store = create_test_db().await;
        let mut campaign = test_campaign("CSE101");
        store.insert_campaign(&campaign).await.unwrap();

        campaign.status = CampaignStatus::Open;
        assert!(store
            .update_campaign(&campaign, CampaignStatus::Draft)
            .await
            .unwrap());
        // a second writer that also read Draft loses
        assert!(!store
            .update_campaign(&campaign, CampaignStatus::Draft)
            .await
            .unwrap());

        // right status but a stale revision also loses
        campaign.computed_root = Some([9u8; 32]);
        campaign.root_leaf_count = Some(3);
        assert!(!store
            .update_campaign(&campaign, CampaignStatus::Open)
            .await
            .unwrap());

        campaign.revision = 1;
        campaign.frozen_at = Some(Utc::now());
        assert!(store
            .update_campaign(&campaign, CampaignStatus::Open)
            .await
            .unwrap());
        let loaded = store.get_campaign(&campaign.id).await.unwrap().unwrap();
        assert_eq!(loaded.computed_root, Some([9u8; 32]));
        assert_eq!(loaded.root_leaf_count, Some(3));
        assert_eq!(loaded.revision, 2);
        assert!(loaded.is_frozen());

        let ghost = test_campaign("ghost");
        assert!(matches!(
            store.update_campaign(&ghost, CampaignStatus::Draft).await,
            Err(SurveyError::CampaignNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_token_lifecycle() {
        let store = create_test_db().await;
        store.insert_campaign(&test_campaign("CSE101")).await.unwrap();
        let token = Token::issue(CampaignId::new("CSE101"), "a@x.edu".into());
        store.insert_tokens(&[token.clone()]).await.unwrap();

        assert!(matches!(
            store.mark_completed(&token.token).await,
            Err(SurveyError::Precondition(_))
        ));
        store.mark_used(&token.token).await.unwrap();
        assert!(matches!(
            store.mark_used(&token.token).await,
            Err(SurveyError::TokenAlreadyUsed)
        ));
        assert!(matches!(
            store.mark_used("unknown").await,
            Err(SurveyError::TokenInvalid)
        ));

        store.mark_completed(&token.token).await.unwrap();
        store.mark_completed(&token.token).await.unwrap();

        let loaded = store.get_token(&token.token).await.unwrap().unwrap();
        assert!(loaded.used && loaded.is_completed);
        assert!(loaded.used_at.is_some() && loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_used_while_launched() {
        let store = create_test_db().await;
        let mut campaign = test_campaign("CSE101");
        campaign.status = CampaignStatus::Launched;
        store.insert_campaign(&campaign).await.unwrap();
        let first = Token::issue(campaign.id.clone(), "a@x.edu".into());
        let second = Token::issue(campaign.id.clone(), "b@x.edu".into());
        store
            .insert_tokens(&[first.clone(), second.clone()])
            .await
            .unwrap();

        assert!(matches!(
            store
                .mark_used_while_launched(&first.token, &CampaignId::new("CSE102"))
                .await,
            Err(SurveyError::TokenScope { .. })
        ));
        store
            .mark_used_while_launched(&first.token, &campaign.id)
            .await
            .unwrap();
        assert!(matches!(
            store.mark_used_while_launched(&first.token, &campaign.id).await,
            Err(SurveyError::TokenAlreadyUsed)
        ));
        assert!(matches!(
            store.mark_used_while_launched("unknown", &campaign.id).await,
            Err(SurveyError::TokenInvalid)
        ));

        campaign.status = CampaignStatus::Closed;
        assert!(store
            .update_campaign(&campaign, CampaignStatus::Launched)
            .await
            .unwrap());
        assert!(matches!(
            store.mark_used_while_launched(&second.token, &campaign.id).await,
            Err(SurveyError::InvalidTransition {
                status: CampaignStatus::Closed,
                ..
            })
        ));
        assert!(!store.get_token(&second.token).await.unwrap().unwrap().used);
    }

    #[tokio::test]
    async fn test_insert_tokens_rolls_back_on_duplicate() {
        let store = create_test_db().await;
        store.insert_campaign(&test_campaign("CSE101")).await.unwrap();
        let id = CampaignId::new("CSE101");

        store
            .insert_tokens(&[Token::issue(id.clone(), "a@x.edu".into())])
            .await
            .unwrap();
        let batch = [
            Token::issue(id.clone(), "b@x.edu".into()),
            Token::issue(id.clone(), "a@x.edu".into()),
        ];
        assert!(matches!(
            store.insert_tokens(&batch).await,
            Err(SurveyError::DuplicateRespondent(_))
        ));

        let tokens = store.list_tokens(&id).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].student_email, "a@x.edu");
    }

    #[tokio::test]
    async fn test_responses_ordered_and_idempotent() {
        let store = create_test_db().await;
        store.insert_campaign(&test_campaign("CSE101")).await.unwrap();
        let id = CampaignId::new("CSE101");

        for (position, commitment) in [(1u32, [2u8; 32]), (0, [1u8; 32])] {
            let response = DecryptedResponse {
                campaign_id: id.clone(),
                commitment,
                plaintext_answer: "[5,4]".into(),
                parsed_answers: Some(vec![5, 4]),
                position,
                ingested_at: Utc::now(),
            };
            assert!(store.store_response(&response).await.unwrap());
            assert!(!store.store_response(&response).await.unwrap());
        }

        let responses = store.list_responses(&id).await.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].commitment, [1u8; 32]);
        assert_eq!(responses[0].parsed_answers, Some(vec![5, 4]));
        assert!(store.has_response(&id, &[2u8; 32]).await.unwrap());
        assert!(!store.has_response(&id, &[3u8; 32]).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_response_refused_once_frozen() {
        let store = create_test_db().await;
        let mut campaign = test_campaign("CSE101");
        campaign.status = CampaignStatus::Closed;
        store.insert_campaign(&campaign).await.unwrap();

        let response = |commitment: Hash256| DecryptedResponse {
            campaign_id: campaign.id.clone(),
            commitment,
            plaintext_answer: "[1]".into(),
            parsed_answers: Some(vec![1]),
            position: 0,
            ingested_at: Utc::now(),
        };
        assert!(store.store_response(&response([1u8; 32])).await.unwrap());

        let mut frozen = campaign.clone();
        frozen.frozen_at = Some(Utc::now());
        assert!(store
            .update_campaign(&frozen, CampaignStatus::Closed)
            .await
            .unwrap());

        assert!(matches!(
            store.store_response(&response([2u8; 32])).await,
            Err(SurveyError::Precondition(_))
        ));
        assert_eq!(store.list_responses(&campaign.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_university_root_upsert_keeps_created_at() {
        let store = create_test_db().await;
        let created = Utc::now() - chrono::Duration::days(1);
        let mut root = UniversityRoot {
            university_id: "UNI".into(),
            campaign_ids: vec![CampaignId::new("CSE101")],
            total_campaigns: 1,
            final_merkle_root: [1u8; 32],
            created_at: created,
            updated_at: created,
        };
        store.upsert_university_root(&root).await.unwrap();

        root.campaign_ids.push(CampaignId::new("CSE102"));
        root.total_campaigns = 2;
        root.final_merkle_root = [2u8; 32];
        root.created_at = Utc::now();
        root.updated_at = Utc::now();
        store.upsert_university_root(&root).await.unwrap();

        let loaded = store.get_university_root("UNI").await.unwrap().unwrap();
        assert_eq!(loaded.total_campaigns, 2);
        assert_eq!(loaded.final_merkle_root, [2u8; 32]);
        assert_eq!(loaded.created_at.timestamp(), created.timestamp());
    }
}
