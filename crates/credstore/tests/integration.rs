//! Integration tests for the credstore crate.
//!
//! These tests exercise the full store lifecycle on a real temporary
//! directory: save/load, at-rest encryption, environment precedence, expiry
//! and legacy-key migration.

use std::fs;
use std::path::Path;

use chrono::{Duration, Utc};
use credstore::cipher::{self, EncryptionKey, KEY_LEN};
use credstore::credentials::{self, AuthType, Credentials};
use credstore::{
    CredentialError, EnvOverrides, MachineFingerprint, MigrationOutcome, StaticKeyProvider, Store,
    StoreConfig,
};
use tempfile::TempDir;

/// A fixed current key so two stores over one directory agree.
fn current_key() -> EncryptionKey {
    EncryptionKey::from_bytes([0x42; KEY_LEN])
}

fn old_machine() -> MachineFingerprint {
    MachineFingerprint {
        hostname: "old-laptop".into(),
        username: "alice".into(),
        os: "linux".into(),
        arch: "x86_64".into(),
        home_dir: "/home/alice".into(),
    }
}

fn open_store(dir: &Path, env: EnvOverrides, fingerprint: MachineFingerprint) -> Store {
    Store::with_fingerprint(
        StoreConfig::new(dir).with_env(env),
        Box::new(StaticKeyProvider::new(current_key())),
        fingerprint,
    )
}

fn test_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), EnvOverrides::default(), old_machine());
    (dir, store)
}

/// Write a credentials file the way an older installation would have: every
/// secret encrypted under the machine-derived key.
fn write_legacy_file(dir: &Path, fingerprint: &MachineFingerprint, plain: &Credentials) {
    let legacy_key = fingerprint.derive_key();
    let mut record = plain.clone();
    for field in [
        &mut record.api_key,
        &mut record.token,
        &mut record.refresh_token,
    ] {
        if let Some(value) = field.take() {
            *field = Some(cipher::encrypt(&value, &legacy_key).unwrap());
        }
    }
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("credentials.toml"),
        credentials::encode(&record).unwrap(),
    )
    .unwrap();
}

// ═══════════════════════════════════════════════════════════════════════
//  Save / load
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn save_load_roundtrip_preserves_fields() {
    let (_dir, store) = test_store();
    let expires = Utc::now() + Duration::hours(1);
    let creds = Credentials::token("bearer-token-abcdef")
        .with_refresh_token("refresh-token-123456")
        .with_expires_at(expires)
        .with_server_address("https://api.example.com")
        .with_subject("alice@example.com");

    store.save(&creds).unwrap();
    let loaded = store.load().unwrap();

    assert_eq!(loaded.auth_type, AuthType::Token);
    assert_eq!(loaded.token.as_deref(), Some("bearer-token-abcdef"));
    assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-token-123456"));
    assert_eq!(loaded.expires_at, Some(expires));
    assert_eq!(
        loaded.server_address.as_deref(),
        Some("https://api.example.com")
    );
    assert_eq!(loaded.subject.as_deref(), Some("alice@example.com"));
    assert!(loaded.api_key.is_none());
}

#[test]
fn api_key_roundtrip() {
    let (_dir, store) = test_store();
    store
        .save(&Credentials::api_key("cs_live_0123456789"))
        .unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded.auth_type, AuthType::ApiKey);
    assert_eq!(loaded.api_key.as_deref(), Some("cs_live_0123456789"));
}

#[test]
fn no_plaintext_at_rest() {
    let (_dir, store) = test_store();
    store
        .save(
            &Credentials::api_key("super-secret-api-key")
                .with_refresh_token("super-secret-refresh")
                .with_subject("alice"),
        )
        .unwrap();

    let raw = fs::read(store.path()).unwrap();
    let text = String::from_utf8_lossy(&raw);
    assert!(!text.contains("super-secret-api-key"));
    assert!(!text.contains("super-secret-refresh"));
    // Non-secret fields stay readable.
    assert!(text.contains("subject = \"alice\""));
}

#[test]
fn stored_blobs_differ_for_identical_secrets() {
    let (_dir, store) = test_store();
    let creds = Credentials::api_key("same-secret-value");

    store.save(&creds).unwrap();
    let first = fs::read_to_string(store.path()).unwrap();
    store.save(&creds).unwrap();
    let second = fs::read_to_string(store.path()).unwrap();

    let blob = |text: &str| credentials::decode(text).unwrap().api_key.unwrap();
    assert_ne!(blob(&first), blob(&second));
    assert_eq!(store.load().unwrap().api_key.as_deref(), Some("same-secret-value"));
}

#[test]
fn tampered_file_fails_to_load() {
    let (_dir, store) = test_store();
    store.save(&Credentials::api_key("tamper-me-please")).unwrap();

    let mut record = credentials::decode(&fs::read_to_string(store.path()).unwrap()).unwrap();
    let blob = record.api_key.take().unwrap();
    // Swap one base64 character in the middle of the blob.
    let mut chars: Vec<char> = blob.chars().collect();
    let mid = chars.len() / 2;
    chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
    record.api_key = Some(chars.into_iter().collect());
    fs::write(store.path(), credentials::encode(&record).unwrap()).unwrap();

    assert!(matches!(
        store.load(),
        Err(CredentialError::DecryptionFailed)
    ));
}

#[test]
fn save_replaces_previous_credentials() {
    let (_dir, store) = test_store();
    store
        .save(&Credentials::token("first-token").with_refresh_token("first-refresh"))
        .unwrap();
    store.save(&Credentials::api_key("second-key")).unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded.auth_type, AuthType::ApiKey);
    assert_eq!(loaded.api_key.as_deref(), Some("second-key"));
    assert!(loaded.token.is_none());
    assert!(loaded.refresh_token.is_none());
}

#[test]
fn missing_file_is_no_credentials() {
    let (_dir, store) = test_store();
    assert!(!store.exists());
    assert!(matches!(store.load(), Err(CredentialError::NoCredentials)));
}

#[test]
fn missing_directory_is_no_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(
        &dir.path().join("never-created"),
        EnvOverrides::default(),
        old_machine(),
    );
    assert!(matches!(store.load(), Err(CredentialError::NoCredentials)));
}

#[test]
fn wrong_key_is_decryption_failure() {
    let (dir, store) = test_store();
    store.save(&Credentials::api_key("written-under-key-a")).unwrap();

    let other = Store::with_fingerprint(
        StoreConfig::new(dir.path()),
        Box::new(StaticKeyProvider::new(EncryptionKey::from_bytes([0x01; KEY_LEN]))),
        old_machine(),
    );
    assert!(matches!(other.load(), Err(CredentialError::DecryptionFailed)));
}

// ═══════════════════════════════════════════════════════════════════════
//  Delete / exists
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn delete_is_idempotent() {
    let (_dir, store) = test_store();
    store.save(&Credentials::api_key("to-be-deleted")).unwrap();
    assert!(store.exists());

    store.delete().unwrap();
    assert!(!store.exists());
    store.delete().unwrap();

    assert!(matches!(store.load(), Err(CredentialError::NoCredentials)));
}

#[test]
fn exists_does_not_decrypt() {
    let (dir, _store) = test_store();
    fs::write(dir.path().join("credentials.toml"), "garbage").unwrap();

    let store = open_store(dir.path(), EnvOverrides::default(), old_machine());
    assert!(store.exists());
}

// ═══════════════════════════════════════════════════════════════════════
//  Active credential resolution
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn api_key_env_wins_over_token_env_and_file() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvOverrides {
        api_key: Some("env-api-key".into()),
        token: Some("env-token".into()),
        ..Default::default()
    };
    let store = open_store(dir.path(), env, old_machine());
    store.save(&Credentials::token("stored-token")).unwrap();

    let active = store.get_active_credential().unwrap();
    assert_eq!(active.auth_type, AuthType::ApiKey);
    assert_eq!(active.api_key.as_deref(), Some("env-api-key"));
    assert!(active.token.is_none());
}

#[test]
fn token_env_wins_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvOverrides {
        token: Some("env-token".into()),
        ..Default::default()
    };
    let store = open_store(dir.path(), env, old_machine());
    store.save(&Credentials::api_key("stored-key")).unwrap();

    let active = store.get_active_credential().unwrap();
    assert_eq!(active.auth_type, AuthType::Token);
    assert_eq!(active.token.as_deref(), Some("env-token"));
}

#[test]
fn env_credential_needs_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvOverrides {
        api_key: Some("env-api-key".into()),
        ..Default::default()
    };
    let store = open_store(dir.path(), env, old_machine());
    assert!(store.get_active_credential().is_ok());
    assert!(!store.exists());
}

#[test]
fn falls_back_to_stored_credential() {
    let (_dir, store) = test_store();
    store.save(&Credentials::api_key("stored-key")).unwrap();

    let active = store.get_active_credential().unwrap();
    assert_eq!(active.api_key.as_deref(), Some("stored-key"));
}

#[test]
fn no_env_and_no_file_is_no_credentials() {
    let (_dir, store) = test_store();
    let err = store.get_active_credential().unwrap_err();
    assert!(matches!(err, CredentialError::NoCredentials));
    assert!(err.needs_login());
}

#[test]
fn token_expired_one_second_ago_is_rejected() {
    let (_dir, store) = test_store();
    store
        .save(&Credentials::token("stale-token").with_expires_at(Utc::now() - Duration::seconds(1)))
        .unwrap();

    let err = store.get_active_credential().unwrap_err();
    assert!(matches!(err, CredentialError::ExpiredToken { .. }));
    assert!(err.needs_login());
}

#[test]
fn token_expiring_in_one_second_is_accepted() {
    let (_dir, store) = test_store();
    let now = Utc::now();
    store
        .save(&Credentials::token("fresh-token").with_expires_at(now + Duration::seconds(1)))
        .unwrap();

    // Resolve against the instant the token was written so the boundary is
    // exact regardless of how long the save took.
    let (active, _) = store.resolve_at(now).unwrap();
    assert_eq!(active.token.as_deref(), Some("fresh-token"));
}

#[test]
fn token_without_expiry_never_expires() {
    let (_dir, store) = test_store();
    store.save(&Credentials::token("forever-token")).unwrap();
    assert!(store.get_active_credential().is_ok());
}

#[test]
fn api_key_is_not_expiry_checked() {
    let (_dir, store) = test_store();
    store
        .save(&Credentials::api_key("old-key").with_expires_at(Utc::now() - Duration::days(1)))
        .unwrap();
    assert!(store.get_active_credential().is_ok());
}

#[test]
fn env_token_is_not_expiry_checked() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvOverrides {
        token: Some("env-token".into()),
        ..Default::default()
    };
    let store = open_store(dir.path(), env, old_machine());
    store
        .save(&Credentials::token("stale").with_expires_at(Utc::now() - Duration::hours(1)))
        .unwrap();

    let active = store.get_active_credential().unwrap();
    assert_eq!(active.token.as_deref(), Some("env-token"));
    assert!(active.expires_at.is_none());
}

// ═══════════════════════════════════════════════════════════════════════
//  Legacy migration
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn legacy_file_is_migrated_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let plain = Credentials::token("legacy-token-value")
        .with_refresh_token("legacy-refresh-value")
        .with_subject("alice");
    write_legacy_file(dir.path(), &old_machine(), &plain);

    let store = open_store(dir.path(), EnvOverrides::default(), old_machine());
    assert_eq!(store.migration_outcome(), &MigrationOutcome::Migrated);
    assert!(!store.needs_migration());

    let loaded = store.load().unwrap();
    assert_eq!(loaded.token.as_deref(), Some("legacy-token-value"));
    assert_eq!(loaded.refresh_token.as_deref(), Some("legacy-refresh-value"));
    assert_eq!(loaded.subject.as_deref(), Some("alice"));

    // A fresh store over the same directory sees nothing left to migrate.
    let reopened = open_store(dir.path(), EnvOverrides::default(), old_machine());
    assert_eq!(reopened.migration_outcome(), &MigrationOutcome::NotNeeded);
    assert_eq!(
        reopened.load().unwrap().token.as_deref(),
        Some("legacy-token-value")
    );
}

#[test]
fn migrated_file_no_longer_opens_with_legacy_key() {
    let dir = tempfile::tempdir().unwrap();
    write_legacy_file(dir.path(), &old_machine(), &Credentials::api_key("legacy-key"));
    let _store = open_store(dir.path(), EnvOverrides::default(), old_machine());

    let record = credentials::decode(&fs::read_to_string(dir.path().join("credentials.toml")).unwrap())
        .unwrap();
    let blob = record.api_key.unwrap();
    assert!(cipher::decrypt(&blob, &old_machine().derive_key()).is_err());
    assert_eq!(cipher::decrypt(&blob, &current_key()).unwrap(), "legacy-key");
}

#[test]
fn changed_machine_identity_fails_migration_but_store_opens() {
    let dir = tempfile::tempdir().unwrap();
    write_legacy_file(dir.path(), &old_machine(), &Credentials::api_key("legacy-key"));
    let before = fs::read_to_string(dir.path().join("credentials.toml")).unwrap();

    let mut renamed = old_machine();
    renamed.hostname = "new-laptop".into();
    let store = open_store(dir.path(), EnvOverrides::default(), renamed);

    assert!(store.migration_outcome().is_failed());
    assert!(store.needs_migration());
    assert!(matches!(store.load(), Err(CredentialError::DecryptionFailed)));
    // The unreadable file is left as it was.
    assert_eq!(
        fs::read_to_string(dir.path().join("credentials.toml")).unwrap(),
        before
    );

    // Logging in again replaces it.
    store.save(&Credentials::api_key("fresh-key")).unwrap();
    assert_eq!(store.load().unwrap().api_key.as_deref(), Some("fresh-key"));
    assert!(!store.needs_migration());
}

#[test]
fn explicit_migration_call_on_current_file_fails_cleanly() {
    let (_dir, store) = test_store();
    store.save(&Credentials::api_key("current-key")).unwrap();

    assert!(!store.needs_migration());
    assert!(matches!(
        store.migrate_from_legacy_key(),
        Err(CredentialError::DecryptionFailed)
    ));
    assert_eq!(store.load().unwrap().api_key.as_deref(), Some("current-key"));
}

#[test]
fn secretless_file_needs_no_migration() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("credentials.toml"),
        "auth_type = \"token\"\nsubject = \"alice\"\n",
    )
    .unwrap();

    let store = open_store(dir.path(), EnvOverrides::default(), old_machine());
    assert_eq!(store.migration_outcome(), &MigrationOutcome::NotNeeded);
    assert_eq!(store.load().unwrap().subject.as_deref(), Some("alice"));
}
