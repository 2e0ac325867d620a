//! Cryptographic building blocks for anonymous surveys
//!
//! Provides:
//! - Answer commitments and Merkle node hashing (SHA-256)
//! - Answer encryption (RSA-OAEP / SHA-256)
//! - Blind signature issuance (RSABSSA, SHA-384 / PSS)
//! - Campaign key generation and sealing at rest (AES-256-GCM)

pub mod blind;
mod encrypt;
mod hash;
mod keys;

pub use blind::{
    BlindSignature, BlindSignatureError, BlindedMessage, BlindingInverse, BlindingResult,
    PreparedMessage, Signature,
};
pub use encrypt::*;
pub use hash::*;
pub use keys::*;

#[cfg(test)]
pub(crate) use keys::test_keys;
