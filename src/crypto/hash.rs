//! Answer commitments and Merkle node hashing
//!
//! All hashes here are plain SHA-256 with no domain prefix, so that roots and
//! commitments computed off-chain match what respondents compute in the
//! browser and what the anchor program stores:
//! - `commitment = SHA256(UTF8(plaintext_answer))`
//! - `node = SHA256(left(32) || right(32))`

use sha2::{Digest, Sha256};

/// 32-byte SHA-256 hash
pub type Hash256 = [u8; 32];

/// Length of a hash rendered as hex
pub const HASH_HEX_LEN: usize = 64;

/// Error type for hash decoding
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Hash raw bytes with SHA-256
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the commitment for a plaintext answer.
///
/// Deterministic and keyless: anyone holding the plaintext can recompute it.
pub fn commit(plaintext: &str) -> Hash256 {
    sha256(plaintext.as_bytes())
}

/// Check that `commitment` opens to `plaintext`.
///
/// The comparison touches every byte regardless of where the first
/// difference is.
pub fn verify_commitment(plaintext: &str, commitment: &Hash256) -> bool {
    let computed = commit(plaintext);
    computed
        .iter()
        .zip(commitment.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Combine two child hashes into their parent node
pub fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Render a hash as 64 lowercase hex characters
pub fn hash_to_hex(hash: &Hash256) -> String {
    hex::encode(hash)
}

/// Parse a hash from hex (with or without 0x prefix)
pub fn hash_from_hex(hex_str: &str) -> Result<Hash256, HashError> {
    let hex_str = hex_str.trim();
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str).map_err(|e| HashError::InvalidHex(e.to_string()))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| HashError::InvalidLength(len))
}
