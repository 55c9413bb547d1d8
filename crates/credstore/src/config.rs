//! Store configuration.
//!
//! [`StoreConfig`] captures everything the store needs from its surroundings:
//! where the credentials file lives, which keyring entry holds the key, and a
//! snapshot of the environment overrides. The environment is read exactly
//! once, in [`StoreConfig::from_env`], so a constructed store never consults
//! ambient process state again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CredentialError, Result};

/// Overrides the storage directory.
pub const ENV_CONFIG_DIR: &str = "CREDSTORE_CONFIG_DIR";
/// 64 hex characters; replaces the keyring-held encryption key.
pub const ENV_ENCRYPTION_KEY: &str = "CREDSTORE_ENCRYPTION_KEY";
/// API key that bypasses the stored file.
pub const ENV_API_KEY: &str = "CREDSTORE_API_KEY";
/// Bearer token that bypasses the stored file.
pub const ENV_TOKEN: &str = "CREDSTORE_TOKEN";
/// Server address attached to environment-sourced credentials.
pub const ENV_SERVER: &str = "CREDSTORE_SERVER";

/// Directory under `$HOME` used when no override is set.
pub const DEFAULT_DIR_NAME: &str = ".credstore";
/// Name of the credentials file inside the storage directory.
pub const DEFAULT_FILE_NAME: &str = "credentials.toml";
/// Keyring service holding the encryption key.
pub const DEFAULT_KEYRING_SERVICE: &str = "credstore";
/// Keyring account holding the encryption key.
pub const DEFAULT_KEYRING_ACCOUNT: &str = "encryption-key";
/// Upper bound on a single keyring call.
pub const DEFAULT_KEYRING_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment overrides captured at configuration time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub server: Option<String>,
    pub encryption_key: Option<String>,
}

impl EnvOverrides {
    /// Read the overrides from the process environment. Empty values count
    /// as unset.
    pub fn capture() -> Self {
        Self {
            api_key: non_empty_var(ENV_API_KEY),
            token: non_empty_var(ENV_TOKEN),
            server: non_empty_var(ENV_SERVER),
            encryption_key: non_empty_var(ENV_ENCRYPTION_KEY),
        }
    }
}

/// Configuration for a [`Store`](crate::store::Store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub dir: PathBuf,
    pub file_name: String,
    pub keyring_service: String,
    pub keyring_account: String,
    pub keyring_timeout: Duration,
    pub env: EnvOverrides,
}

impl StoreConfig {
    /// A configuration rooted at `dir` with default names and no
    /// environment overrides.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            keyring_account: DEFAULT_KEYRING_ACCOUNT.to_string(),
            keyring_timeout: DEFAULT_KEYRING_TIMEOUT,
            env: EnvOverrides::default(),
        }
    }

    /// Resolve the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::HomeDirUnavailable`] if neither
    /// `CREDSTORE_CONFIG_DIR` nor a home directory is available.
    pub fn from_env() -> Result<Self> {
        let dir = resolve_dir(non_empty_var(ENV_CONFIG_DIR), dirs::home_dir())?;
        tracing::debug!(dir = %dir.display(), "resolved credential store directory");
        Ok(Self::new(dir).with_env(EnvOverrides::capture()))
    }

    pub fn with_env(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_keyring_entry(
        mut self,
        service: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        self.keyring_service = service.into();
        self.keyring_account = account.into();
        self
    }

    pub fn with_keyring_timeout(mut self, timeout: Duration) -> Self {
        self.keyring_timeout = timeout;
        self
    }

    /// Full path of the credentials file.
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Pick the storage directory: the override wins, else `~/.credstore`.
fn resolve_dir(override_dir: Option<String>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(PathBuf::from(dir));
    }
    home.map(|h| default_dir_in(&h))
        .ok_or(CredentialError::HomeDirUnavailable)
}

fn default_dir_in(home: &Path) -> PathBuf {
    home.join(DEFAULT_DIR_NAME)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
