//! Answer encryption (RSAES-OAEP / SHA-256)
//!
//! Respondents encrypt their plaintext answer to the campaign's encryption
//! key before anchoring it; the server decrypts during ingestion. OAEP caps
//! the plaintext at `k - 2*hLen - 2` bytes (190 for RSA-2048), and callers
//! get [`EncryptionError::PayloadTooLarge`] instead of an opaque primitive
//! failure when they exceed it.

use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// OAEP hash output length (SHA-256)
const OAEP_HASH_LEN: usize = 32;

/// Error type for answer encryption
#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("payload is {len} bytes, maximum for this key is {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("invalid ciphertext length: expected {expected}, got {actual}")]
    InvalidCiphertextLength { expected: usize, actual: usize },

    #[error("invalid base64 ciphertext")]
    InvalidEncoding,
}

/// Largest plaintext OAEP/SHA-256 accepts for a key of `modulus_len` bytes
pub fn max_plaintext_len(modulus_len: usize) -> usize {
    modulus_len.saturating_sub(2 * OAEP_HASH_LEN + 2)
}

/// Encrypt a plaintext answer to a campaign encryption key
pub fn encrypt_answer(plaintext: &str, key: &RsaPublicKey) -> Result<Vec<u8>, EncryptionError> {
    let max = max_plaintext_len(key.size());
    let len = plaintext.len();
    if len > max {
        return Err(EncryptionError::PayloadTooLarge { len, max });
    }

    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext.as_bytes())
        .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))
}

/// Decrypt an anchored ciphertext back to the plaintext answer.
///
/// Fails on wrong length, wrong key, padding errors, and non-UTF-8 output.
pub fn decrypt_answer(ciphertext: &[u8], key: &RsaPrivateKey) -> Result<String, EncryptionError> {
    let expected = key.size();
    if ciphertext.len() != expected {
        return Err(EncryptionError::InvalidCiphertextLength {
            expected,
            actual: ciphertext.len(),
        });
    }

    let plaintext = key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| EncryptionError::DecryptionFailed("plaintext is not UTF-8".to_string()))
}

/// Encode ciphertext as standard base64
pub fn ciphertext_to_base64(ciphertext: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, ciphertext)
}

/// Decode standard base64 ciphertext
pub fn ciphertext_from_base64(s: &str) -> Result<Vec<u8>, EncryptionError> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s.trim())
        .map_err(|_| EncryptionError::InvalidEncoding)
}
