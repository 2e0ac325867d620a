//! Infrastructure layer for the survey core
//!
//! Contains:
//! - Error taxonomy
//! - Store trait definitions (campaigns, tokens, responses, anchors, roots)
//! - Merkle engine
//! - In-memory and SQLite store implementations

pub mod commitment;
mod error;
mod memory;
pub mod sqlite;
mod traits;

pub use commitment::{MerkleError, MerkleTree};
pub use error::*;
pub use memory::{InMemoryAnchorStore, InMemoryStore};
pub use sqlite::SqliteSurveyStore;
pub use traits::*;
