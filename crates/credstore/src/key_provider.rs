//! Encryption key sources.
//!
//! The 256-bit key that protects stored credentials never lives in the
//! credentials file. A [`KeyProvider`] abstracts over where it does live:
//!
//! - **OS keyring** ([`KeyringKeyProvider`]): macOS Keychain, Windows
//!   Credential Manager or the Secret Service, via the `keyring` crate. The
//!   key is created on first access and reused by every later invocation.
//! - **Environment override** ([`EnvKeyProvider`]): 64 hex characters in
//!   `CREDSTORE_ENCRYPTION_KEY`, for CI and automation.
//! - **Static** ([`StaticKeyProvider`]): an explicit in-memory key for
//!   embedding and tests.
//!
//! [`default_provider`] picks the environment override when it is set and
//! the keyring otherwise.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::cipher::{EncryptionKey, KEY_LEN};
use crate::config::{ENV_ENCRYPTION_KEY, StoreConfig};
use crate::error::{CredentialError, Result};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A source of the store's symmetric encryption key.
pub trait KeyProvider: Send + Sync {
    /// Produce the 32-byte key.
    ///
    /// Returns [`CredentialError::KeyUnavailable`] when no key can be
    /// obtained.
    fn get_key(&self) -> Result<EncryptionKey>;

    /// Human-readable name of the key source, used in log messages.
    fn description(&self) -> String;
}

// ---------------------------------------------------------------------------
// Environment override
// ---------------------------------------------------------------------------

/// Reads the key from an environment variable holding 64 hex characters.
///
/// The value is captured once, by [`StoreConfig::from_env`], and handed to
/// the provider; the provider never reads the process environment itself.
pub struct EnvKeyProvider {
    var: String,
    value: Option<String>,
}

impl EnvKeyProvider {
    /// Build a provider around an already-captured value of `var`.
    pub fn with_value(var: impl Into<String>, value: Option<String>) -> Self {
        Self {
            var: var.into(),
            value,
        }
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

impl KeyProvider for EnvKeyProvider {
    fn get_key(&self) -> Result<EncryptionKey> {
        let value = self
            .value
            .as_deref()
            .ok_or_else(|| CredentialError::KeyUnavailable {
                reason: format!("{} is not set", self.var),
            })?;
        parse_hex_key(value).map_err(|e| match e {
            CredentialError::KeyUnavailable { reason } => CredentialError::KeyUnavailable {
                reason: format!("{}: {reason}", self.var),
            },
            other => other,
        })
    }

    fn description(&self) -> String {
        format!("environment variable {}", self.var)
    }
}

/// Parse a 64-character hex string into a key.
///
/// # Errors
///
/// Returns [`CredentialError::KeyUnavailable`] for the wrong length or
/// non-hex characters. The offending value is never echoed.
pub fn parse_hex_key(value: &str) -> Result<EncryptionKey> {
    let value = value.trim();
    if value.len() != KEY_LEN * 2 {
        return Err(CredentialError::KeyUnavailable {
            reason: format!(
                "expected {} hex characters, got {}",
                KEY_LEN * 2,
                value.len()
            ),
        });
    }

    let bytes = hex::decode(value).map_err(|_| CredentialError::KeyUnavailable {
        reason: "value is not valid hex".into(),
    })?;

    EncryptionKey::from_slice(&bytes).ok_or_else(|| CredentialError::KeyUnavailable {
        reason: format!("key must be {KEY_LEN} bytes"),
    })
}

// ---------------------------------------------------------------------------
// Static key
// ---------------------------------------------------------------------------

/// A provider that always returns the same in-memory key.
pub struct StaticKeyProvider {
    key: EncryptionKey,
    label: String,
}

impl StaticKeyProvider {
    pub fn new(key: EncryptionKey) -> Self {
        Self {
            key,
            label: "static key".into(),
        }
    }

    pub fn with_label(key: EncryptionKey, label: impl Into<String>) -> Self {
        Self {
            key,
            label: label.into(),
        }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn get_key(&self) -> Result<EncryptionKey> {
        Ok(self.key.clone())
    }

    fn description(&self) -> String {
        self.label.clone()
    }
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

/// The single secret slot a [`KeyringKeyProvider`] reads and writes.
///
/// Split out from the provider so the create-if-absent logic can be driven
/// against an in-memory slot in tests.
pub trait SecretBackend: Send + Sync {
    /// Read the stored secret, `Ok(None)` if the slot is empty.
    fn read(&self) -> Result<Option<String>>;

    /// Store `secret`, replacing any previous value.
    fn write(&self, secret: &str) -> Result<()>;

    fn describe(&self) -> String;
}

/// [`SecretBackend`] over one OS keyring entry.
pub struct KeyringBackend {
    service: String,
    account: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account).map_err(|e| {
            CredentialError::KeyUnavailable {
                reason: format!("cannot open keyring entry: {e}"),
            }
        })
    }
}

impl SecretBackend for KeyringBackend {
    fn read(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::KeyUnavailable {
                reason: format!("keyring read failed: {e}"),
            }),
        }
    }

    fn write(&self, secret: &str) -> Result<()> {
        self.entry()?
            .set_password(secret)
            .map_err(|e| CredentialError::KeyUnavailable {
                reason: format!("keyring write failed: {e}"),
            })
    }

    fn describe(&self) -> String {
        format!("OS keyring ({}/{})", self.service, self.account)
    }
}

/// Keeps the key in the OS keyring, creating it on first access.
///
/// Every backend call runs on a helper thread bounded by `timeout`, since
/// some keyring daemons block indefinitely when locked. The key is cached
/// for the lifetime of the provider once obtained.
pub struct KeyringKeyProvider {
    backend: Arc<dyn SecretBackend>,
    timeout: Duration,
    cache: OnceLock<EncryptionKey>,
}

impl KeyringKeyProvider {
    /// Provider over the OS keyring entry `service`/`account`.
    pub fn new(service: &str, account: &str, timeout: Duration) -> Self {
        Self::with_backend(Arc::new(KeyringBackend::new(service, account)), timeout)
    }

    pub fn with_backend(backend: Arc<dyn SecretBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            cache: OnceLock::new(),
        }
    }

    fn read_key(&self) -> Result<Option<EncryptionKey>> {
        let backend = Arc::clone(&self.backend);
        let stored = with_timeout(self.timeout, move || backend.read())?;
        stored.as_deref().map(parse_hex_key).transpose()
    }

    /// Fetch the stored key, or create and persist one.
    ///
    /// If another process creates the entry concurrently, the write may fail
    /// or be overwritten. Either way the key is re-read after the write and
    /// only the persisted value is ever returned, so a locally generated key
    /// that never reached the keyring is never used to encrypt anything.
    fn load_or_create(&self) -> Result<EncryptionKey> {
        if let Some(key) = self.read_key()? {
            tracing::debug!(source = %self.backend.describe(), "loaded encryption key");
            return Ok(key);
        }

        tracing::info!(
            source = %self.backend.describe(),
            "no encryption key found, creating one"
        );
        let fresh = EncryptionKey::generate()?;
        let encoded = fresh.to_hex();

        let backend = Arc::clone(&self.backend);
        let write_result = with_timeout(self.timeout, move || backend.write(&encoded));

        match (write_result, self.read_key()?) {
            (_, Some(stored)) => {
                if stored != fresh {
                    tracing::info!(
                        source = %self.backend.describe(),
                        "encryption key was created concurrently, using the stored one"
                    );
                }
                Ok(stored)
            }
            (Err(e), None) => Err(e),
            (Ok(()), None) => Err(CredentialError::KeyUnavailable {
                reason: format!(
                    "{} accepted the new key but did not return it",
                    self.backend.describe()
                ),
            }),
        }
    }
}

impl KeyProvider for KeyringKeyProvider {
    fn get_key(&self) -> Result<EncryptionKey> {
        if let Some(key) = self.cache.get() {
            return Ok(key.clone());
        }
        let key = self.load_or_create()?;
        let _ = self.cache.set(key.clone());
        Ok(key)
    }

    fn description(&self) -> String {
        self.backend.describe()
    }
}

/// Run `op` on a helper thread and give up after `timeout`.
///
/// A timed-out thread is left to finish on its own; its result is dropped.
fn with_timeout<T, F>(timeout: Duration, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("credstore-keyring".into())
        .spawn(move || {
            let _ = tx.send(op());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "keyring call timed out");
            Err(CredentialError::KeyUnavailable {
                reason: format!("keyring did not respond within {}ms", timeout.as_millis()),
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(CredentialError::KeyUnavailable {
            reason: "keyring call aborted".into(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Returns the key provider a store should use under `config`.
///
/// - `CREDSTORE_ENCRYPTION_KEY` set: [`EnvKeyProvider`]
/// - otherwise: [`KeyringKeyProvider`] on the configured keyring entry
pub fn default_provider(config: &StoreConfig) -> Box<dyn KeyProvider> {
    if let Some(value) = config.env.encryption_key.clone() {
        tracing::debug!("using encryption key from {ENV_ENCRYPTION_KEY}");
        return Box::new(EnvKeyProvider::with_value(ENV_ENCRYPTION_KEY, Some(value)));
    }

    Box::new(KeyringKeyProvider::new(
        &config.keyring_service,
        &config.keyring_account,
        config.keyring_timeout,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
