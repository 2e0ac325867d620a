//! Domain models for the anonymous survey core
//!
//! Campaign lifecycle, respondent tokens, anchored and decrypted responses,
//! and Merkle proof types. Serde helpers for boundary encodings live in
//! [`wire`].

mod campaign;
mod commitment;
mod response;
mod token;
mod types;
pub mod wire;

pub use campaign::*;
pub use commitment::*;
pub use response::*;
pub use token::*;
pub use types::*;
