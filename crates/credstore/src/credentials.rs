//! The credential record and its on-disk TOML encoding.
//!
//! The codec is purely structural: it writes whatever strings are in the
//! secret fields. The [`Store`](crate::store::Store) is responsible for
//! putting ciphertext there before encoding and for decrypting after
//! decoding.
//!
//! # File format
//!
//! ```toml
//! auth_type = "token"
//! token = "base64(nonce || ciphertext || tag)"
//! refresh_token = "base64(...)"
//! expires_at = "2026-01-01T00:00:00Z"
//! server_address = "https://api.example.com"
//! subject = "alice@example.com"
//! last_updated = "2025-12-31T23:00:00Z"
//! ```
//!
//! Absent optional fields are omitted. Unknown keys are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which secret field of a [`Credentials`] record is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Static API key in `api_key`.
    ApiKey,
    /// Bearer token in `token`, optionally with `refresh_token`/`expires_at`.
    Token,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Token => "token",
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication material for one server/user.
///
/// `api_key`, `token` and `refresh_token` hold plaintext in memory and
/// ciphertext on disk. `last_updated` is set by the store on every save;
/// whatever the caller puts there is overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub auth_type: AuthType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// `None` means the credential does not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default)]
    pub last_updated: DateTime<Utc>,
}

impl Credentials {
    /// An API-key credential.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::empty(AuthType::ApiKey).with_api_key(key)
    }

    /// A bearer-token credential.
    pub fn token(token: impl Into<String>) -> Self {
        Self::empty(AuthType::Token).with_token(token)
    }

    fn empty(auth_type: AuthType) -> Self {
        Self {
            auth_type,
            api_key: None,
            token: None,
            refresh_token: None,
            expires_at: None,
            server_address: None,
            subject: None,
            last_updated: DateTime::<Utc>::default(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_server_address(mut self, server_address: impl Into<String>) -> Self {
        self.server_address = Some(server_address.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// The secret that authenticates requests for this credential's type.
    pub fn secret(&self) -> Option<&str> {
        match self.auth_type {
            AuthType::ApiKey => self.api_key.as_deref(),
            AuthType::Token => self.token.as_deref(),
        }
    }

    /// Whether the credential has a non-zero expiry at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Every secret field, labelled for logging.
    pub(crate) fn secret_fields(&self) -> [(&'static str, Option<&str>); 3] {
        [
            ("api_key", self.api_key.as_deref()),
            ("token", self.token.as_deref()),
            ("refresh_token", self.refresh_token.as_deref()),
        ]
    }

    /// Mutable references to every secret field, labelled for logging.
    pub(crate) fn secret_fields_mut(&mut self) -> [(&'static str, &mut Option<String>); 3] {
        [
            ("api_key", &mut self.api_key),
            ("token", &mut self.token),
            ("refresh_token", &mut self.refresh_token),
        ]
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Serialize a record to the TOML file format.
pub fn encode(creds: &Credentials) -> Result<String> {
    toml::to_string(creds).map_err(|e| CredentialError::InvalidCredentials {
        reason: format!("cannot encode credentials: {e}"),
    })
}

/// Parse the TOML file format.
///
/// Empty secret strings decode as `None`, and an `expires_at` at or before
/// the Unix epoch (the zero timestamp older versions wrote) decodes as
/// "does not expire".
///
/// # Errors
///
/// Returns [`CredentialError::InvalidCredentials`] for malformed TOML or a
/// missing/unknown `auth_type`.
pub fn decode(text: &str) -> Result<Credentials> {
    let mut creds: Credentials =
        toml::from_str(text).map_err(|e| CredentialError::InvalidCredentials {
            reason: e.to_string(),
        })?;

    for (_, field) in creds.secret_fields_mut() {
        if field.as_deref().is_some_and(str::is_empty) {
            *field = None;
        }
    }
    if creds.expires_at.is_some_and(|t| t.timestamp() <= 0) {
        creds.expires_at = None;
    }

    Ok(creds)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
