//! Campaign key lifecycle
//!
//! Every campaign owns two RSA-2048 keypairs (e = 65537), generated once at
//! creation and never rotated:
//! - a blind-signing key (RSASSA-PSS / SHA-384)
//! - an encryption key (RSAES-OAEP / SHA-256)
//!
//! Public keys travel as SubjectPublicKeyInfo DER. Private keys never leave
//! this module in the clear: they are sealed with AES-256-GCM into a
//! [`SealedKey`] whose AAD binds the campaign id and the key purpose, and only
//! [`KeySealer::unseal`] turns them back into usable keys.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::hash::Hash256;

/// Modulus size for both campaign keypairs
pub const RSA_KEY_BITS: usize = 2048;

/// Public exponent for both campaign keypairs
pub const RSA_PUBLIC_EXPONENT: u32 = 65_537;

/// Upper bound on an encoded public key, as reserved by the anchor program
pub const MAX_PUBLIC_KEY_DER_LEN: usize = 300;

/// AES-256 key used to seal campaign private keys
pub type SealingKeyBytes = [u8; 32];

/// Magic prefix for sealed key blobs (v1)
pub const SEALED_KEY_MAGIC_V1: &[u8; 4] = b"SVK1";

/// Domain prefix for sealed-key AAD
pub const DOMAIN_SEALED_KEY_AAD_V1: &[u8] = b"ANON_SURVEY_SEALED_KEY_AAD_V1";

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Error type for key lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    Generation(String),

    #[error("key encoding failed: {0}")]
    Encoding(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("encoded public key is {0} bytes, limit is {MAX_PUBLIC_KEY_DER_LEN}")]
    PublicKeyTooLong(usize),

    #[error("invalid sealing key")]
    InvalidSealingKey,

    #[error("sealing failed: {0}")]
    Sealing(String),

    #[error("unsealing failed: {0}")]
    Unsealing(String),
}

// ============================================================================
// Key purpose
// ============================================================================

/// What a campaign keypair is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    BlindSigning,
    Encryption,
}

impl KeyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::BlindSigning => "blind-signing",
            KeyPurpose::Encryption => "encryption",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Key generation
// ============================================================================

/// Freshly generated private keys for one campaign.
///
/// Exists only between generation and sealing.
pub struct CampaignKeys {
    pub blind_signing: RsaPrivateKey,
    pub encryption: RsaPrivateKey,
}

impl CampaignKeys {
    pub fn blind_signing_public(&self) -> RsaPublicKey {
        self.blind_signing.to_public_key()
    }

    pub fn encryption_public(&self) -> RsaPublicKey {
        self.encryption.to_public_key()
    }
}

impl fmt::Debug for CampaignKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CampaignKeys")
            .field("blind_signing_bits", &(self.blind_signing.size() * 8))
            .field("encryption_bits", &(self.encryption.size() * 8))
            .finish_non_exhaustive()
    }
}

/// Source of campaign keypairs.
///
/// Production uses [`OsKeySource`]; tests may hand out pre-generated keys.
pub trait KeySource: Send + Sync {
    fn generate(&self) -> Result<CampaignKeys, KeyError>;
}

/// Generates keys from the operating system's entropy source
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeySource;

impl KeySource for OsKeySource {
    fn generate(&self) -> Result<CampaignKeys, KeyError> {
        create_campaign_keys()
    }
}

/// Generate a single RSA-2048 private key with e = 65537
pub fn generate_rsa_key() -> Result<RsaPrivateKey, KeyError> {
    let exponent = BigUint::from(RSA_PUBLIC_EXPONENT);
    RsaPrivateKey::new_with_exp(&mut OsRng, RSA_KEY_BITS, &exponent)
        .map_err(|e| KeyError::Generation(e.to_string()))
}

/// Generate both keypairs a new campaign needs
pub fn create_campaign_keys() -> Result<CampaignKeys, KeyError> {
    Ok(CampaignKeys {
        blind_signing: generate_rsa_key()?,
        encryption: generate_rsa_key()?,
    })
}

// ============================================================================
// Public key encoding
// ============================================================================

/// Encode a public key as SubjectPublicKeyInfo DER
pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>, KeyError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| KeyError::Encoding(e.to_string()))?
        .as_bytes()
        .to_vec();
    if der.len() > MAX_PUBLIC_KEY_DER_LEN {
        return Err(KeyError::PublicKeyTooLong(der.len()));
    }
    Ok(der)
}

/// Decode a SubjectPublicKeyInfo DER public key
pub fn decode_public_key(der: &[u8]) -> Result<RsaPublicKey, KeyError> {
    if der.len() > MAX_PUBLIC_KEY_DER_LEN {
        return Err(KeyError::PublicKeyTooLong(der.len()));
    }
    RsaPublicKey::from_public_key_der(der).map_err(|e| KeyError::InvalidPublicKey(e.to_string()))
}

// ============================================================================
// Sealed keys
// ============================================================================

/// A private key encrypted at rest.
///
/// Format: `SVK1 || nonce(12) || AES-256-GCM(PKCS#8 DER)`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    purpose: KeyPurpose,
    blob: Vec<u8>,
}

impl SealedKey {
    /// Rebuild a sealed key from its stored parts
    pub fn from_parts(purpose: KeyPurpose, blob: Vec<u8>) -> Self {
        Self { purpose, blob }
    }

    pub fn purpose(&self) -> KeyPurpose {
        self.purpose
    }

    /// The opaque ciphertext blob, suitable for storage
    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }
}

impl fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedKey")
            .field("purpose", &self.purpose)
            .field("len", &self.blob.len())
            .finish()
    }
}

/// Seals and unseals campaign private keys with a server-held AES-256 key
#[derive(Clone)]
pub struct KeySealer {
    key: SealingKeyBytes,
}

impl KeySealer {
    pub fn new(key: SealingKeyBytes) -> Self {
        Self { key }
    }

    /// Create a sealer with a random key (development and tests)
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Parse a sealing key from 64 hex chars or base64 (standard alphabet)
    pub fn from_encoded(encoded: &str) -> Result<Self, KeyError> {
        let encoded = encoded.trim();
        let bytes = if encoded.len() == 64 {
            hex::decode(encoded).map_err(|_| KeyError::InvalidSealingKey)?
        } else {
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
                .map_err(|_| KeyError::InvalidSealingKey)?
        };
        let key: SealingKeyBytes = bytes.try_into().map_err(|_| KeyError::InvalidSealingKey)?;
        Ok(Self::new(key))
    }

    /// Seal a private key for `campaign_id`
    pub fn seal(
        &self,
        campaign_id: &str,
        purpose: KeyPurpose,
        key: &RsaPrivateKey,
    ) -> Result<SealedKey, KeyError> {
        let der = key
            .to_pkcs8_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?;

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| KeyError::InvalidSealingKey)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = sealed_key_aad(campaign_id, purpose);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: der.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|e| KeyError::Sealing(e.to_string()))?;

        let mut blob =
            Vec::with_capacity(SEALED_KEY_MAGIC_V1.len() + NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(SEALED_KEY_MAGIC_V1);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(SealedKey { purpose, blob })
    }

    /// Recover the private key sealed for `campaign_id`
    pub fn unseal(&self, campaign_id: &str, sealed: &SealedKey) -> Result<RsaPrivateKey, KeyError> {
        let header_len = SEALED_KEY_MAGIC_V1.len() + NONCE_SIZE;
        if sealed.blob.len() < header_len + TAG_SIZE {
            return Err(KeyError::Unsealing("sealed key too short".to_string()));
        }
        if &sealed.blob[..SEALED_KEY_MAGIC_V1.len()] != SEALED_KEY_MAGIC_V1 {
            return Err(KeyError::Unsealing("unknown sealed key format".to_string()));
        }

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| KeyError::InvalidSealingKey)?;
        let nonce = Nonce::from_slice(&sealed.blob[SEALED_KEY_MAGIC_V1.len()..header_len]);
        let aad = sealed_key_aad(campaign_id, sealed.purpose);

        let der = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed.blob[header_len..],
                    aad: &aad,
                },
            )
            .map_err(|_| KeyError::Unsealing("authentication failed".to_string()))?;

        RsaPrivateKey::from_pkcs8_der(&der).map_err(|e| KeyError::Unsealing(e.to_string()))
    }
}

impl fmt::Debug for KeySealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySealer").finish_non_exhaustive()
    }
}

/// AAD binding a sealed key to its campaign and purpose
fn sealed_key_aad(campaign_id: &str, purpose: KeyPurpose) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_SEALED_KEY_AAD_V1);
    hasher.update((campaign_id.len() as u32).to_be_bytes());
    hasher.update(campaign_id.as_bytes());
    hasher.update((purpose.as_str().len() as u32).to_be_bytes());
    hasher.update(purpose.as_str().as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
pub(crate) mod test_keys {
    //! Keys generated once per test binary; RSA-2048 generation is slow.

    use std::sync::OnceLock;

    use super::*;

    pub fn blind_signing() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| generate_rsa_key().unwrap())
    }

    pub fn encryption() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| generate_rsa_key().unwrap())
    }

    /// Key source that hands out clones of the shared test keys
    pub struct FixedKeySource;

    impl KeySource for FixedKeySource {
        fn generate(&self) -> Result<CampaignKeys, KeyError> {
            Ok(CampaignKeys {
                blind_signing: blind_signing().clone(),
                encryption: encryption().clone(),
            })
        }
    }
}
