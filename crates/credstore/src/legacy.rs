//! Machine-fingerprint key derivation used by older installations.
//!
//! Earlier versions never stored their key anywhere; they rebuilt it on every
//! run from the machine identity. This module reproduces that derivation so
//! existing ciphertext can be migrated to the keyring-backed key. It must
//! never be used for new encryptions.
//!
//! The key is `SHA-256(hostname || username || os || arch || home_dir)` with
//! the parts concatenated as raw UTF-8, no separators. `os` and `arch` use the
//! identifiers older installations wrote (`darwin`, `amd64`, `arm64`, ...),
//! not Rust's target names; see [`legacy_os`] and [`legacy_arch`].

use ring::digest;

use crate::cipher::{EncryptionKey, KEY_LEN};

/// The machine identity the legacy key was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineFingerprint {
    pub hostname: String,
    pub username: String,
    pub os: String,
    pub arch: String,
    pub home_dir: String,
}

impl MachineFingerprint {
    /// Capture the identity of the machine this process runs on.
    ///
    /// Parts that cannot be determined are left empty, which is what the
    /// older derivation did as well.
    pub fn current() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Effective user from the account database, not `$USER`.
        let username = whoami::username();
        let home_dir = dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            hostname,
            username,
            os: legacy_os(std::env::consts::OS).to_string(),
            arch: legacy_arch(std::env::consts::ARCH, cfg!(target_endian = "little")).to_string(),
            home_dir,
        }
    }

    /// Derive the deterministic legacy key for this fingerprint.
    pub fn derive_key(&self) -> EncryptionKey {
        let mut material = Vec::with_capacity(
            self.hostname.len()
                + self.username.len()
                + self.os.len()
                + self.arch.len()
                + self.home_dir.len(),
        );
        material.extend_from_slice(self.hostname.as_bytes());
        material.extend_from_slice(self.username.as_bytes());
        material.extend_from_slice(self.os.as_bytes());
        material.extend_from_slice(self.arch.as_bytes());
        material.extend_from_slice(self.home_dir.as_bytes());

        let hash = digest::digest(&digest::SHA256, &material);
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(hash.as_ref());
        EncryptionKey::from_bytes(key)
    }
}

/// Operating system name as older installations spelled it.
///
/// Rust and the older builds agree on everything except macOS.
pub fn legacy_os(rust_os: &str) -> &str {
    match rust_os {
        "macos" => "darwin",
        other => other,
    }
}

/// CPU architecture name as older installations spelled it.
///
/// `little_endian` only matters for the 64-bit PowerPC and MIPS families,
/// whose legacy names carry the byte order.
pub fn legacy_arch(rust_arch: &str, little_endian: bool) -> &str {
    match (rust_arch, little_endian) {
        ("x86_64", _) => "amd64",
        ("x86", _) => "386",
        ("aarch64", _) => "arm64",
        ("loongarch64", _) => "loong64",
        ("powerpc64", true) => "ppc64le",
        ("powerpc64", false) => "ppc64",
        ("mips", true) => "mipsle",
        ("mips64", true) => "mips64le",
        (other, _) => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
