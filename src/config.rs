//! Runtime configuration loaded from the environment

use std::fmt;

use crate::crypto::KeySealer;
use crate::infra::{Result, SurveyError};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://survey.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Survey core configuration.
#[derive(Clone)]
pub struct Config {
    /// SQLite connection URL.
    pub database_url: String,
    /// Maximum database connections.
    pub max_connections: u32,
    /// Server-held key that seals campaign private keys (64 hex chars or base64).
    pub key_sealing_key: String,
    /// Log filter directive.
    pub log_level: String,
    /// Emit JSON logs.
    pub log_json: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("max_connections", &self.max_connections)
            .field("key_sealing_key", &"<redacted>")
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let max_connections = match lookup("MAX_DB_CONNECTIONS") {
            Some(raw) => parse_positive("MAX_DB_CONNECTIONS", &raw)?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let key_sealing_key = lookup("KEY_SEALING_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SurveyError::Configuration("KEY_SEALING_KEY is required".into()))?;
        KeySealer::from_encoded(&key_sealing_key).map_err(|_| {
            SurveyError::Configuration(
                "KEY_SEALING_KEY must be 32 bytes as 64 hex chars or base64".into(),
            )
        })?;

        let log_level = lookup("LOG_LEVEL")
            .or_else(|| lookup("RUST_LOG"))
            .unwrap_or_else(|| "info".to_string());

        let log_json = lookup("LOG_JSON")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            database_url,
            max_connections,
            key_sealing_key,
            log_level,
            log_json,
        })
    }

    pub fn sealer(&self) -> Result<KeySealer> {
        KeySealer::from_encoded(&self.key_sealing_key)
            .map_err(|e| SurveyError::Configuration(e.to_string()))
    }
}

fn parse_positive(name: &str, raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(SurveyError::Configuration(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}
