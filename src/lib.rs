//! Anonymous Survey Core
//!
//! Anonymous, verifiable course and event surveys: eligible respondents get
//! single-use tokens, exchange them for blind signatures, submit encrypted
//! answers with public commitments, and the aggregated commitments are
//! published as Merkle roots that chain into a per-university final root.
//!
//! ## Modules
//!
//! - [`crypto`] - Commitments, answer encryption, blind signatures, key sealing
//! - [`domain`] - Core domain types (campaigns, tokens, responses, proofs)
//! - [`infra`] - Error taxonomy, store traits, Merkle engine, SQLite and in-memory stores
//! - [`service`] - Campaign lifecycle, token ledger, ingestion, and proof operations
//! - [`config`] - Environment configuration
//! - [`telemetry`] - Structured logging setup

pub mod config;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod migrations;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    AccreditationProof, Campaign, CampaignId, CampaignStatus, CampaignType, Hash256,
    IngestionReport, MerkleProof, NewCampaign, Token, UniversityRoot,
};

pub use infra::{MerkleTree, Result, SurveyError};
pub use service::{SurveyService, SurveyStores};
