//! SQLite implementations of the persistence traits
//!
//! Campaigns, tokens, decrypted responses and university roots live in one
//! database. Token consumption is a single conditional `UPDATE`.

mod store;

pub use store::*;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

use crate::infra::{Result, SurveyError};

/// Open a pool, creating the database file if needed
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| SurveyError::Configuration(format!("invalid DATABASE_URL: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;
    Ok(pool)
}
