//! Encrypted local credential store for command-line tools.
//!
//! This crate persists API keys, bearer tokens and refresh tokens between
//! CLI invocations. Secret fields are encrypted at rest with AES-256-GCM
//! under a key held in the OS keyring (or supplied through
//! `CREDSTORE_ENCRYPTION_KEY`), and credentials written by older versions
//! under a machine-derived key are migrated transparently.
//!
//! # Modules
//!
//! - [`cipher`]: AES-256-GCM field encryption, the [`EncryptionKey`] type.
//! - [`key_provider`]: keyring, environment and static key sources.
//! - [`legacy`]: machine-fingerprint key derivation for migration.
//! - [`credentials`]: the [`Credentials`] record and its TOML codec.
//! - [`store`]: the file-backed [`Store`], migration, active credential.
//! - [`display`]: secret masking, expiry formatting, key ids.
//! - [`config`]: [`StoreConfig`] and environment variable names.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use credstore::{Credentials, Store};
//!
//! # fn example() -> credstore::Result<()> {
//! let store = Store::open()?;
//!
//! match store.get_active_credential() {
//!     Ok(creds) => println!("using {} credential", creds.auth_type),
//!     Err(e) if e.needs_login() => println!("please log in"),
//!     Err(e) => return Err(e),
//! }
//!
//! store.save(&Credentials::token("eyJhbGciOi...").with_subject("alice"))?;
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod config;
pub mod credentials;
pub mod display;
pub mod error;
pub mod key_provider;
pub mod legacy;
pub mod store;

// Re-export the most commonly used types at the crate root for convenience.
pub use cipher::EncryptionKey;
pub use config::{EnvOverrides, StoreConfig};
pub use credentials::{AuthType, Credentials};
pub use display::{format_expiry, generate_key_id, mask_api_key, mask_credential, mask_token};
pub use error::{CredentialError, Result};
pub use key_provider::{EnvKeyProvider, KeyProvider, KeyringKeyProvider, StaticKeyProvider};
pub use legacy::MachineFingerprint;
pub use store::{CredentialSource, CredentialStatus, MigrationOutcome, Store};
