//! AES-256-GCM field encryption using the `ring` crate.
//!
//! Each sensitive field is sealed independently under a fresh random 96-bit
//! nonce. The stored form is a single base64 string:
//!
//! ```text
//! base64( [12 bytes: nonce] [ciphertext] [16 bytes: GCM tag] )
//! ```
//!
//! so it survives a round trip through the text-based credentials file.
//!
//! # Security Notes
//!
//! - Every failure on the decrypt path (bad base64, truncated blob, tag
//!   mismatch) is reported as the same [`CredentialError::DecryptionFailed`]
//!   so callers cannot be used as a ciphertext-validity oracle.
//! - [`EncryptionKey`] zeroizes its bytes on drop and never prints them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CredentialError, Result};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// AES-256-GCM algorithm from `ring`.
static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Key type
// ---------------------------------------------------------------------------

/// A 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, rejecting anything that is not exactly
    /// [`KEY_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Generate a fresh key from the system CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| CredentialError::KeyUnavailable {
                reason: "failed to generate random key".into(),
            })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Lowercase hex form, as stored in the keyring.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A single-use nonce sequence that yields exactly one nonce and then errors.
///
/// `ring` requires a [`NonceSequence`] for sealing and opening keys. Each call
/// here builds a new key around one nonce, so the sequence never advances
/// twice.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under `key` and return the base64 blob
/// `nonce || ciphertext || tag`.
///
/// # Errors
///
/// Returns [`CredentialError::EncryptionFailed`] if the nonce cannot be
/// generated or `ring` reports a failure.
pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> Result<String> {
    let rng = SystemRandom::new();

    let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| CredentialError::EncryptionFailed {
            reason: "failed to generate random nonce".into(),
        })?;

    let unbound_key =
        UnboundKey::new(AEAD_ALG, key.as_bytes()).map_err(|_| CredentialError::EncryptionFailed {
            reason: "failed to create AES-256-GCM key".into(),
        })?;

    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    // `ring` encrypts in-place and appends the authentication tag.
    let mut in_out = plaintext.as_bytes().to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| CredentialError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    let mut blob = Vec::with_capacity(NONCE_LEN_BYTES + in_out.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&in_out);

    tracing::trace!(
        plaintext_len = plaintext.len(),
        blob_len = blob.len(),
        "encrypted field"
    );

    Ok(BASE64.encode(blob))
}

/// Decrypt a blob produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`CredentialError::DecryptionFailed`] if the blob is not valid
/// base64, is shorter than a nonce, fails authentication (wrong key or
/// tampered data), or does not decrypt to UTF-8.
pub fn decrypt(blob: &str, key: &EncryptionKey) -> Result<String> {
    let raw = BASE64
        .decode(blob.trim())
        .map_err(|_| CredentialError::DecryptionFailed)?;

    if raw.len() < NONCE_LEN_BYTES {
        return Err(CredentialError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN_BYTES);
    let mut nonce = [0u8; NONCE_LEN_BYTES];
    nonce.copy_from_slice(nonce_bytes);

    let unbound_key =
        UnboundKey::new(AEAD_ALG, key.as_bytes()).map_err(|_| CredentialError::DecryptionFailed)?;
    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce));

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::empty(), &mut in_out)
        .map_err(|_| CredentialError::DecryptionFailed)?;

    let result = String::from_utf8(plaintext.to_vec()).map_err(|_| CredentialError::DecryptionFailed);
    in_out.zeroize();
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
