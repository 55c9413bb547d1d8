//! File-backed encrypted credential store.
//!
//! The [`Store`] owns one credentials file inside its storage directory and
//! a [`KeyProvider`] for the encryption key. Secret fields are encrypted
//! field-by-field with AES-256-GCM on [`Store::save`] and decrypted on
//! [`Store::load`]; everything else is written in plaintext.
//!
//! # Legacy migration
//!
//! Older installations encrypted with a key derived from the machine
//! identity (see [`crate::legacy`]). Constructing a store checks once whether
//! the stored file fails to decrypt under the current key and, if so,
//! re-encrypts it from the legacy key. The outcome is recorded in
//! [`Store::migration_outcome`]; a failed migration never prevents
//! construction, so the user can still log in again.
//!
//! # Active credential
//!
//! [`Store::get_active_credential`] resolves, in order: `CREDSTORE_API_KEY`,
//! `CREDSTORE_TOKEN`, then the stored file. Only stored token credentials
//! are expiry-checked; environment values are managed externally.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::cipher::{self, EncryptionKey};
use crate::config::StoreConfig;
use crate::credentials::{self, AuthType, Credentials};
use crate::display;
use crate::error::{CredentialError, Result};
use crate::key_provider::{self, KeyProvider};
use crate::legacy::MachineFingerprint;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of the one-shot legacy migration attempted at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing stored, or the stored file already uses the current key.
    NotNeeded,
    /// The file was re-encrypted under the current key.
    Migrated,
    /// The file could not be decrypted with the legacy key either.
    Failed { reason: String },
}

impl MigrationOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Where an active credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    Store,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Environment => "environment",
            Self::Store => "credentials file",
        })
    }
}

/// Redacted summary of the active credential, safe to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStatus {
    pub auth_type: AuthType,
    pub source: CredentialSource,
    pub masked_secret: Option<String>,
    pub key_id: Option<String>,
    pub has_refresh_token: bool,
    pub expiry: String,
    pub server_address: Option<String>,
    pub subject: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Encrypted credential store rooted at one directory.
///
/// # Example
///
/// ```rust,no_run
/// # use credstore::{Credentials, Store};
/// # fn example() -> credstore::Result<()> {
/// let store = Store::open()?;
///
/// store.save(&Credentials::api_key("cs_0123456789abcdef").with_subject("alice"))?;
///
/// let active = store.get_active_credential()?;
/// println!("authenticating as {:?}", active.subject);
/// # Ok(())
/// # }
/// ```
pub struct Store {
    config: StoreConfig,
    provider: Box<dyn KeyProvider>,
    fingerprint: MachineFingerprint,
    migration: MigrationOutcome,
}

impl Store {
    /// Open the store described by the process environment, using the
    /// default key provider.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::HomeDirUnavailable`] if no storage
    /// directory can be resolved. Migration failures are not errors.
    pub fn open() -> Result<Self> {
        let config = StoreConfig::from_env()?;
        let provider = key_provider::default_provider(&config);
        Ok(Self::new(config, provider))
    }

    /// Build a store with an explicit configuration and key provider.
    pub fn new(config: StoreConfig, provider: Box<dyn KeyProvider>) -> Self {
        Self::with_fingerprint(config, provider, MachineFingerprint::current())
    }

    /// Like [`Store::new`], with the machine identity used for legacy
    /// migration supplied explicitly.
    pub fn with_fingerprint(
        config: StoreConfig,
        provider: Box<dyn KeyProvider>,
        fingerprint: MachineFingerprint,
    ) -> Self {
        let mut store = Self {
            config,
            provider,
            fingerprint,
            migration: MigrationOutcome::NotNeeded,
        };
        store.migration = store.try_migrate();
        store
    }

    pub fn migration_outcome(&self) -> &MigrationOutcome {
        &self.migration
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Full path of the credentials file.
    pub fn path(&self) -> PathBuf {
        self.config.file_path()
    }

    pub fn key_description(&self) -> String {
        self.provider.description()
    }

    // -- Persistence --------------------------------------------------------

    /// Encrypt and persist `creds`, replacing whatever was stored.
    ///
    /// `last_updated` is set to now. Empty secret fields are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::KeyUnavailable`] or
    /// [`CredentialError::EncryptionFailed`] for key/cipher failures and
    /// [`CredentialError::Io`] for filesystem failures.
    pub fn save(&self, creds: &Credentials) -> Result<()> {
        let key = self.provider.get_key()?;
        let mut record = creds.clone();
        encrypt_record(&mut record, &key)?;
        record.last_updated = Utc::now();

        let text = credentials::encode(&record)?;
        self.ensure_dir()?;
        self.write_file(&text)?;

        tracing::info!(
            auth_type = %record.auth_type,
            path = %self.path().display(),
            "saved credentials"
        );
        Ok(())
    }

    /// Read and decrypt the stored credentials.
    ///
    /// Does not migrate: a file written under another key fails with
    /// [`CredentialError::DecryptionFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NoCredentials`] if nothing is stored,
    /// [`CredentialError::InvalidCredentials`] if the file is corrupt, and
    /// [`CredentialError::DecryptionFailed`] if any secret field does not
    /// decrypt under the current key.
    pub fn load(&self) -> Result<Credentials> {
        let record = self.read_record()?;
        let key = self.provider.get_key()?;
        let creds = decrypt_record(record, &key)?;
        tracing::debug!(auth_type = %creds.auth_type, "loaded credentials");
        Ok(creds)
    }

    /// Remove the credentials file. Removing an absent file succeeds.
    ///
    /// The encryption key is left in place.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(self.path()) {
            Ok(()) => {
                tracing::info!(path = %self.path().display(), "deleted credentials");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a credentials file is present. Nothing is decrypted.
    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    // -- Resolution ---------------------------------------------------------

    /// The credential outbound requests should use right now.
    ///
    /// # Errors
    ///
    /// Everything [`Store::load`] returns, plus
    /// [`CredentialError::ExpiredToken`] for a stored token past its expiry.
    pub fn get_active_credential(&self) -> Result<Credentials> {
        self.resolve_at(Utc::now()).map(|(creds, _)| creds)
    }

    /// Resolve the active credential as of `now`, reporting its source.
    pub fn resolve_at(&self, now: DateTime<Utc>) -> Result<(Credentials, CredentialSource)> {
        if let Some(creds) = self.env_credential(now) {
            return Ok((creds, CredentialSource::Environment));
        }

        let creds = self.load()?;
        if creds.auth_type == AuthType::Token && creds.is_expired_at(now) {
            if let Some(expired_at) = creds.expires_at {
                tracing::debug!(%expired_at, "stored token has expired");
                return Err(CredentialError::ExpiredToken { expired_at });
            }
        }
        Ok((creds, CredentialSource::Store))
    }

    /// Redacted description of the active credential. Unlike
    /// [`Store::get_active_credential`], an expired token is reported rather
    /// than rejected.
    pub fn status(&self) -> Result<CredentialStatus> {
        let now = Utc::now();
        let (creds, source) = match self.env_credential(now) {
            Some(creds) => (creds, CredentialSource::Environment),
            None => (self.load()?, CredentialSource::Store),
        };

        let secret = creds.secret();
        let masked_secret = secret.map(|s| match creds.auth_type {
            AuthType::ApiKey => display::mask_api_key(s),
            AuthType::Token => display::mask_token(s),
        });

        Ok(CredentialStatus {
            auth_type: creds.auth_type,
            source,
            masked_secret,
            key_id: secret.map(display::generate_key_id),
            has_refresh_token: creds.refresh_token.is_some(),
            expiry: display::format_expiry_at(creds.expires_at, now),
            server_address: creds.server_address.clone(),
            subject: creds.subject.clone(),
            last_updated: match source {
                CredentialSource::Environment => None,
                CredentialSource::Store => Some(creds.last_updated),
            },
        })
    }

    fn env_credential(&self, now: DateTime<Utc>) -> Option<Credentials> {
        let env = &self.config.env;
        let mut creds = if let Some(api_key) = &env.api_key {
            Credentials::api_key(api_key.clone())
        } else if let Some(token) = &env.token {
            Credentials::token(token.clone())
        } else {
            return None;
        };

        creds.server_address = env.server.clone();
        creds.last_updated = now;
        tracing::debug!(auth_type = %creds.auth_type, "using credential from environment");
        Some(creds)
    }

    // -- Migration ----------------------------------------------------------

    /// True only if a file exists, decodes, and at least one populated
    /// secret field fails to decrypt under the current key.
    pub fn needs_migration(&self) -> bool {
        let Ok(record) = self.read_record() else {
            return false;
        };
        let key = match self.provider.get_key() {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "cannot check stored credentials for migration");
                return false;
            }
        };

        record
            .secret_fields()
            .into_iter()
            .filter_map(|(_, blob)| blob)
            .any(|blob| cipher::decrypt(blob, &key).is_err())
    }

    /// Decrypt the stored file with the legacy machine-derived key and save
    /// it again under the current key.
    ///
    /// # Errors
    ///
    /// Fails as a whole if any populated secret field does not decrypt with
    /// the legacy key; the file is left untouched in that case.
    pub fn migrate_from_legacy_key(&self) -> Result<()> {
        let record = self.read_record()?;
        let legacy_key = self.fingerprint.derive_key();
        let plaintext = decrypt_record(record, &legacy_key)?;

        self.save(&plaintext)?;

        tracing::info!(
            to = %self.provider.description(),
            "migrated stored credentials from machine-derived key"
        );
        Ok(())
    }

    fn try_migrate(&self) -> MigrationOutcome {
        if !self.needs_migration() {
            return MigrationOutcome::NotNeeded;
        }

        tracing::info!(
            path = %self.path().display(),
            "stored credentials do not decrypt with the current key, trying legacy key"
        );
        match self.migrate_from_legacy_key() {
            Ok(()) => MigrationOutcome::Migrated,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "credential migration failed; log in again to replace stored credentials"
                );
                MigrationOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    // -- Internal helpers ---------------------------------------------------

    /// Read and decode the file without decrypting anything.
    fn read_record(&self) -> Result<Credentials> {
        match fs::read_to_string(self.path()) {
            Ok(text) => credentials::decode(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CredentialError::NoCredentials),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the storage directory (owner-only) if needed.
    fn ensure_dir(&self) -> Result<()> {
        let dir = &self.config.dir;

        #[cfg(unix)]
        {
            use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)?;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        }

        #[cfg(not(unix))]
        fs::create_dir_all(dir)?;

        Ok(())
    }

    /// Replace the credentials file atomically: write a 0600 temp file in
    /// the same directory, then rename it over the target.
    fn write_file(&self, text: &str) -> Result<()> {
        let path = self.path();
        let tmp = self
            .config
            .dir
            .join(format!(".{}.tmp-{}", self.config.file_name, std::process::id()));

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let written = (|| -> std::io::Result<()> {
            let mut file = options.open(&tmp)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Replace every populated secret field with its ciphertext; empty fields
/// are dropped.
fn encrypt_record(record: &mut Credentials, key: &EncryptionKey) -> Result<()> {
    for (_, field) in record.secret_fields_mut() {
        match field.take() {
            Some(plain) if !plain.is_empty() => *field = Some(cipher::encrypt(&plain, key)?),
            _ => {}
        }
    }
    Ok(())
}

/// Replace every populated secret field with its plaintext, failing on the
/// first field that does not decrypt.
fn decrypt_record(mut record: Credentials, key: &EncryptionKey) -> Result<Credentials> {
    for (name, field) in record.secret_fields_mut() {
        if let Some(blob) = field.take() {
            let plain = cipher::decrypt(&blob, key).inspect_err(|_| {
                tracing::debug!(field = name, "stored field failed to decrypt");
            })?;
            *field = Some(plain);
        }
    }
    Ok(record)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
