//! Credential store error types.
//!
//! Every public API in this crate returns [`CredentialError`]. The variants
//! form a closed set so the CLI's authentication path can match on them
//! exhaustively: some mean "ask the user to log in", the rest mean "the
//! stored credentials cannot be used and must be re-created".

use chrono::{DateTime, Utc};

/// Unified error type for the credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    // -- Expected states ----------------------------------------------------
    /// Nothing is stored yet. The caller should prompt for login.
    #[error("no credentials stored, please log in")]
    NoCredentials,

    /// The stored token credential is past its expiry. The caller should
    /// refresh or log in again.
    #[error("stored token expired at {expired_at}")]
    ExpiredToken { expired_at: DateTime<Utc> },

    // -- Corruption ---------------------------------------------------------
    /// The credentials file exists but could not be decoded.
    #[error("invalid credentials file: {reason}")]
    InvalidCredentials { reason: String },

    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (bad key length, RNG failure, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Decryption failed. Malformed base64, a truncated blob and a failed
    /// authentication tag all collapse into this one variant.
    #[error("decryption failed: stored credentials cannot be read with the current key")]
    DecryptionFailed,

    // -- Key provider errors ------------------------------------------------
    /// No encryption key could be produced (keyring unavailable, timed out,
    /// or an override variable is unset/malformed).
    #[error("encryption key unavailable: {reason}")]
    KeyUnavailable { reason: String },

    // -- Environment --------------------------------------------------------
    /// The user's home directory could not be determined and no directory
    /// override was given.
    #[error("cannot locate home directory; set CREDSTORE_CONFIG_DIR")]
    HomeDirUnavailable,

    /// Filesystem failure while reading, writing or removing the store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CredentialError {
    /// Whether this error should send the user through a login or refresh
    /// flow rather than be reported as a hard failure.
    pub fn needs_login(&self) -> bool {
        matches!(self, Self::NoCredentials | Self::ExpiredToken { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CredentialError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
