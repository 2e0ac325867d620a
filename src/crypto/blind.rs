//! RSA blind signatures (RSABSSA-SHA384-PSS-Deterministic)
//!
//! The exchange runs across two trust domains:
//!
//! ```text
//! respondent                                   campaign server
//! ----------                                   ---------------
//! prepared = prepare(msg)
//! (blinded, inv) = blind(prepared, pk)
//!                    ---- blinded ---->
//!                                              blind_sig = blind_sign(blinded, sk)
//!                    <--- blind_sig ----
//! sig = finalize(pk, prepared, blind_sig, inv)
//! verify(pk, sig, prepared) == true
//! ```
//!
//! `inv` never leaves the respondent. The server only ever sees `blinded`,
//! which is `EM * r^e mod n` for a uniformly random `r`, so every blinded
//! message it signed is equally consistent with every `(prepared, sig)` pair
//! revealed later.
//!
//! Parameters: SHA-384, EMSA-PSS with MGF1-SHA-384 and a 48-byte salt.
//! The deterministic variant uses the identity message preparation.
//! Finalized signatures are ordinary RSASSA-PSS signatures.

use std::fmt;

use num_bigint_dig::{BigInt, BigUint, ModInverse, Sign};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha384};

/// SHA-384 output length
pub const HASH_LEN: usize = 48;

/// PSS salt length
pub const SALT_LEN: usize = 48;

/// Attempts at drawing an invertible blinding factor before giving up
const MAX_BLINDING_ATTEMPTS: usize = 64;

/// Error type for the blind signature exchange
#[derive(Debug, thiserror::Error)]
pub enum BlindSignatureError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("value is not smaller than the modulus")]
    MessageOutOfRange,

    #[error("encoded message is not invertible modulo n")]
    MessageNotInvertible,

    #[error("modulus too small for PSS encoding")]
    ModulusTooSmall,

    #[error("could not draw a blinding factor")]
    BlindingFailed,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("finalized signature does not verify")]
    VerificationFailed,

    #[error("invalid base64 encoding")]
    InvalidEncoding,
}

// ============================================================================
// Protocol values
// ============================================================================

macro_rules! protocol_bytes {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name(Vec<u8>);

        impl $name {
            pub fn from_bytes(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn into_bytes(self) -> Vec<u8> {
                self.0
            }

            pub fn to_base64(&self) -> String {
                base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &self.0)
            }

            pub fn from_base64(s: &str) -> Result<Self, BlindSignatureError> {
                base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s.trim())
                    .map(Self)
                    .map_err(|_| BlindSignatureError::InvalidEncoding)
            }
        }
    };
}

protocol_bytes!(
    /// Message after preparation, the exact bytes that get signed
    PreparedMessage
);
protocol_bytes!(
    /// What the respondent sends to the server for signing
    BlindedMessage
);
protocol_bytes!(
    /// Server's signature over a blinded message
    BlindSignature
);
protocol_bytes!(
    /// Final RSASSA-PSS signature over the prepared message
    Signature
);
protocol_bytes!(
    /// `r^-1 mod n`; stays with the respondent
    BlindingInverse
);

impl fmt::Debug for PreparedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PreparedMessage({} bytes)", self.0.len())
    }
}

impl fmt::Debug for BlindedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlindedMessage({})", hex::encode(&self.0))
    }
}

impl fmt::Debug for BlindSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlindSignature({})", hex::encode(&self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0))
    }
}

impl fmt::Debug for BlindingInverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindingInverse(..)")
    }
}

/// Output of [`blind`]: the half that is sent and the half that is kept
#[derive(Debug, Clone)]
pub struct BlindingResult {
    pub blinded_message: BlindedMessage,
    pub inverse: BlindingInverse,
}

// ============================================================================
// Client side
// ============================================================================

/// Prepare a message for signing.
///
/// Deterministic variant: the prepared message is the message itself.
pub fn prepare(message: &[u8]) -> PreparedMessage {
    PreparedMessage(message.to_vec())
}

/// Blind a prepared message under the campaign's blind-signing key
pub fn blind(
    prepared: &PreparedMessage,
    public_key: &RsaPublicKey,
) -> Result<BlindingResult, BlindSignatureError> {
    let n = public_key.n();
    let e = public_key.e();
    let k = public_key.size();

    let encoded = emsa_pss_encode(&prepared.0, n.bits() - 1, &mut OsRng)?;
    let m = BigUint::from_bytes_be(&encoded);
    if mod_inverse(&m, n).is_none() {
        return Err(BlindSignatureError::MessageNotInvertible);
    }

    let (r, r_inv) = draw_blinding_factor(n)?;
    let x = r.modpow(e, n);
    let z = (&m * &x) % n;

    Ok(BlindingResult {
        blinded_message: BlindedMessage(i2osp(&z, k)?),
        inverse: BlindingInverse(i2osp(&r_inv, k)?),
    })
}

/// Unblind the server's signature and check it
pub fn finalize(
    public_key: &RsaPublicKey,
    prepared: &PreparedMessage,
    blind_signature: &BlindSignature,
    inverse: &BlindingInverse,
) -> Result<Signature, BlindSignatureError> {
    let n = public_key.n();
    let k = public_key.size();

    let z = os2ip_checked(&blind_signature.0, n, k)?;
    let r_inv = os2ip_checked(&inverse.0, n, k)?;

    let s = (&z * &r_inv) % n;
    let signature = Signature(i2osp(&s, k)?);

    if !verify(public_key, &signature, prepared) {
        return Err(BlindSignatureError::VerificationFailed);
    }
    Ok(signature)
}

/// Verify a finalized signature (standard RSASSA-PSS, SHA-384, 48-byte salt)
pub fn verify(public_key: &RsaPublicKey, signature: &Signature, prepared: &PreparedMessage) -> bool {
    let digest = Sha384::digest(&prepared.0);
    public_key
        .verify(Pss::new_with_salt::<Sha384>(SALT_LEN), &digest, &signature.0)
        .is_ok()
}

// ============================================================================
// Server side
// ============================================================================

/// Sign a blinded message with the campaign's blind-signing key.
///
/// Uses the CRT private-key operation with base blinding. The result is
/// checked against the public exponent before it is returned.
pub fn blind_sign(
    blinded: &BlindedMessage,
    private_key: &RsaPrivateKey,
) -> Result<BlindSignature, BlindSignatureError> {
    let n = private_key.n();
    let k = private_key.size();

    let m = os2ip_checked(&blinded.0, n, k)?;
    let s = rsa::hazmat::rsa_decrypt_and_check(private_key, Some(&mut OsRng), &m)
        .map_err(|e| BlindSignatureError::SigningFailed(e.to_string()))?;

    Ok(BlindSignature(i2osp(&s, k)?))
}

/// Check that a blinded message is well-formed for this key without signing
pub fn check_blinded_message(
    blinded: &BlindedMessage,
    public_key: &RsaPublicKey,
) -> Result<(), BlindSignatureError> {
    os2ip_checked(&blinded.0, public_key.n(), public_key.size()).map(|_| ())
}

// ============================================================================
// Encoding primitives
// ============================================================================

/// EMSA-PSS-ENCODE (RFC 8017 §9.1.1) with SHA-384 and a random 48-byte salt
fn emsa_pss_encode(
    message: &[u8],
    em_bits: usize,
    rng: &mut impl RngCore,
) -> Result<Vec<u8>, BlindSignatureError> {
    let em_len = em_bits.div_ceil(8);
    if em_len < HASH_LEN + SALT_LEN + 2 {
        return Err(BlindSignatureError::ModulusTooSmall);
    }

    let m_hash = Sha384::digest(message);

    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    let mut hasher = Sha384::new();
    hasher.update([0u8; 8]);
    hasher.update(m_hash);
    hasher.update(salt);
    let h = hasher.finalize();

    let ps_len = em_len - SALT_LEN - HASH_LEN - 2;
    let mut db = vec![0u8; em_len - HASH_LEN - 1];
    db[ps_len] = 0x01;
    db[ps_len + 1..].copy_from_slice(&salt);

    let db_mask = mgf1_sha384(&h, db.len());
    for (byte, mask) in db.iter_mut().zip(db_mask) {
        *byte ^= mask;
    }
    let unused_bits = (8 * em_len - em_bits) as u32;
    db[0] &= 0xffu8.checked_shr(unused_bits).unwrap_or(0);

    let mut em = Vec::with_capacity(em_len);
    em.extend_from_slice(&db);
    em.extend_from_slice(&h);
    em.push(0xbc);
    Ok(em)
}

/// MGF1 with SHA-384
fn mgf1_sha384(seed: &[u8], len: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(len + HASH_LEN);
    let mut counter: u32 = 0;
    while output.len() < len {
        let mut hasher = Sha384::new();
        hasher.update(seed);
        hasher.update(counter.to_be_bytes());
        output.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    output.truncate(len);
    output
}

/// Draw `r` uniformly from `[1, n)` with `gcd(r, n) = 1`; returns `(r, r^-1 mod n)`
fn draw_blinding_factor(n: &BigUint) -> Result<(BigUint, BigUint), BlindSignatureError> {
    let bits = n.bits();
    let len = bits.div_ceil(8);
    let excess_bits = (8 * len - bits) as u32;

    for _ in 0..MAX_BLINDING_ATTEMPTS {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        bytes[0] &= 0xffu8.checked_shr(excess_bits).unwrap_or(0);

        let r = BigUint::from_bytes_be(&bytes);
        if &r >= n {
            continue;
        }
        if let Some(r_inv) = mod_inverse(&r, n) {
            return Ok((r, r_inv));
        }
    }
    Err(BlindSignatureError::BlindingFailed)
}

/// Modular inverse as a non-negative residue; `None` when not coprime
fn mod_inverse(a: &BigUint, n: &BigUint) -> Option<BigUint> {
    let inv = a.clone().mod_inverse(n)?;
    let inv = if inv.sign() == Sign::Minus {
        inv + BigInt::from_biguint(Sign::Plus, n.clone())
    } else {
        inv
    };
    inv.to_biguint()
}

/// Integer to fixed-length big-endian octets
fn i2osp(x: &BigUint, len: usize) -> Result<Vec<u8>, BlindSignatureError> {
    let bytes = x.to_bytes_be();
    if bytes.len() > len {
        return Err(BlindSignatureError::MessageOutOfRange);
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(&bytes);
    Ok(out)
}

/// Octets to integer, requiring exactly `k` bytes and a value below `n`
fn os2ip_checked(bytes: &[u8], n: &BigUint, k: usize) -> Result<BigUint, BlindSignatureError> {
    if bytes.len() != k {
        return Err(BlindSignatureError::InvalidLength {
            expected: k,
            actual: bytes.len(),
        });
    }
    let x = BigUint::from_bytes_be(bytes);
    if &x >= n {
        return Err(BlindSignatureError::MessageOutOfRange);
    }
    Ok(x)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::test_keys;

    fn run_protocol(message: &[u8]) -> (PreparedMessage, BlindingResult, BlindSignature, Signature) {
        let sk = test_keys::blind_signing();
        let pk = sk.to_public_key();

        let prepared = prepare(message);
        let blinding = blind(&prepared, &pk).unwrap();
        let blind_sig = blind_sign(&blinding.blinded_message, sk).unwrap();
        let signature = finalize(&pk, &prepared, &blind_sig, &blinding.inverse).unwrap();
        (prepared, blinding, blind_sig, signature)
    }

    #[test]
    fn test_prepare_is_deterministic() {
        assert_eq!(prepare(b"ballot"), prepare(b"ballot"));
        assert_eq!(prepare(b"ballot").as_bytes(), b"ballot");
    }

    #[test]
    fn test_round_trip_verifies() {
        let pk = test_keys::blind_signing().to_public_key();
        let (prepared, _, _, signature) = run_protocol(b"respondent credential 42");

        assert!(verify(&pk, &signature, &prepared));
        assert_eq!(signature.as_bytes().len(), 256);
    }

    #[test]
    fn test_signature_is_standard_pss() {
        // The finalized signature checks out with the rsa crate's own PSS verifier
        use rsa::pss::{Signature as PssSignature, VerifyingKey};
        use rsa::signature::Verifier;

        let pk = test_keys::blind_signing().to_public_key();
        let (prepared, _, _, signature) = run_protocol(b"interop");

        let verifying_key = VerifyingKey::<Sha384>::new(pk);
        let pss_sig = PssSignature::try_from(signature.as_bytes()).unwrap();
        assert!(verifying_key.verify(prepared.as_bytes(), &pss_sig).is_ok());
    }

    #[test]
    fn test_verify_rejects_other_message() {
        let pk = test_keys::blind_signing().to_public_key();
        let (_, _, _, signature) = run_protocol(b"message one");

        assert!(!verify(&pk, &signature, &prepare(b"message two")));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let other = test_keys::encryption().to_public_key();
        let (prepared, _, _, signature) = run_protocol(b"message");

        assert!(!verify(&other, &signature, &prepared));
    }

    #[test]
    fn test_finalize_with_wrong_inverse_fails() {
        let sk = test_keys::blind_signing();
        let pk = sk.to_public_key();
        let prepared = prepare(b"message");

        let first = blind(&prepared, &pk).unwrap();
        let second = blind(&prepared, &pk).unwrap();
        let blind_sig = blind_sign(&first.blinded_message, sk).unwrap();

        assert!(matches!(
            finalize(&pk, &prepared, &blind_sig, &second.inverse),
            Err(BlindSignatureError::VerificationFailed)
        ));
    }

    #[test]
    fn test_blinding_is_randomized() {
        let pk = test_keys::blind_signing().to_public_key();
        let prepared = prepare(b"same message");

        let a = blind(&prepared, &pk).unwrap();
        let b = blind(&prepared, &pk).unwrap();
        assert_ne!(a.blinded_message, b.blinded_message);
    }

    #[test]
    fn test_blind_sign_rejects_malformed_input() {
        let sk = test_keys::blind_signing();

        assert!(matches!(
            blind_sign(&BlindedMessage::from_bytes(vec![1u8; 12]), sk),
            Err(BlindSignatureError::InvalidLength {
                expected: 256,
                actual: 12
            })
        ));
        assert!(matches!(
            blind_sign(&BlindedMessage::from_bytes(vec![0xff; 256]), sk),
            Err(BlindSignatureError::MessageOutOfRange)
        ));
    }

    #[test]
    fn test_blind_sign_matches_plain_exponentiation() {
        use rsa::traits::PrivateKeyParts;

        let sk = test_keys::blind_signing();
        let pk = sk.to_public_key();
        let blinding = blind(&prepare(b"crt"), &pk).unwrap();

        let m = BigUint::from_bytes_be(blinding.blinded_message.as_bytes());
        let expected = i2osp(&m.modpow(sk.d(), sk.n()), sk.size()).unwrap();

        // randomized base blinding must not change the result
        for _ in 0..3 {
            let signed = blind_sign(&blinding.blinded_message, sk).unwrap();
            assert_eq!(signed.as_bytes(), expected.as_slice());
        }
    }

    #[test]
    fn test_server_transcript_is_unlinkable() {
        // Two respondents go through issuance; the server logs the blinded
        // messages and the blind signatures it returned. Later both reveal
        // (prepared, signature). For every pairing of a logged session with a
        // revealed signature there is a blinding factor that explains it, so
        // the transcript carries no information about which session produced
        // which signature.
        let sk = test_keys::blind_signing();
        let n = sk.n();
        let e = sk.e();

        let sessions: Vec<_> = [b"alice's credential".as_slice(), b"bob's credential".as_slice()]
            .iter()
            .map(|m| run_protocol(m))
            .collect();

        for (_, logged_blinding, logged_blind_sig, _) in &sessions {
            let z = BigUint::from_bytes_be(logged_blinding.blinded_message.as_bytes());
            let blind_s = BigUint::from_bytes_be(logged_blind_sig.as_bytes());

            for (_, _, _, revealed_sig) in &sessions {
                let s = BigUint::from_bytes_be(revealed_sig.as_bytes());
                let encoded = s.modpow(e, n);
                let s_inv = mod_inverse(&s, n).unwrap();
                let candidate_r = (&blind_s * &s_inv) % n;

                let explained = (&encoded * candidate_r.modpow(e, n)) % n;
                assert_eq!(explained, z);
            }
        }

        // Nothing the server saw equals anything revealed later.
        for (prepared, blinding, blind_sig, signature) in &sessions {
            assert_ne!(blinding.blinded_message.as_bytes(), prepared.as_bytes());
            assert_ne!(blind_sig.as_bytes(), signature.as_bytes());
        }
    }

    #[test]
    fn test_pss_encoding_layout() {
        let em = emsa_pss_encode(b"abc", 2047, &mut OsRng).unwrap();
        assert_eq!(em.len(), 256);
        assert_eq!(em[255], 0xbc);
        assert_eq!(em[0] & 0x80, 0);
    }

    #[test]
    fn test_mgf1_length() {
        assert_eq!(mgf1_sha384(b"seed", 207).len(), 207);
        assert_eq!(mgf1_sha384(b"seed", 48), Sha384::digest(b"seed\0\0\0\0").to_vec());
    }

    #[test]
    fn test_base64_encoding() {
        let (_, blinding, _, _) = run_protocol(b"wire");
        let encoded = blinding.blinded_message.to_base64();
        assert_eq!(
            BlindedMessage::from_base64(&encoded).unwrap(),
            blinding.blinded_message
        );
        assert!(matches!(
            BlindedMessage::from_base64("***"),
            Err(BlindSignatureError::InvalidEncoding)
        ));
    }

    #[test]
    fn test_inverse_debug_is_redacted() {
        let (_, blinding, _, _) = run_protocol(b"secret");
        let rendered = format!("{:?}", blinding.inverse);
        assert_eq!(rendered, "BlindingInverse(..)");
    }
}
