//! Unit tests for session stores
//!
//! These tests verify:
//! - Save, load, overwrite and idempotent delete on both backends
//! - Listing owners from sealed files
//! - Rejection of corrupted and tampered records

use chrono::{TimeZone, Utc};
use gasless_session_core::config::EngineConfig;
use gasless_session_core::store::{
    FileSessionStore, MemorySessionStore, SealedRecord, SessionStore, generate_sealing_key,
};
use gasless_session_core::{Address, Error, OwnerId, SessionKey};
use std::path::PathBuf;

fn session(account: u8) -> SessionKey {
    SessionKey::generate(
        &EngineConfig::default(),
        Address::repeat_byte(account),
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    )
    .unwrap()
}

struct TempDir(PathBuf);

impl TempDir {
    fn new() -> Self {
        Self(std::env::temp_dir().join(format!(
            "gasless-store-test-{}",
            rand::random::<u64>()
        )))
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.0).ok();
    }
}

fn record_file(store: &FileSessionStore, owner: &str) -> PathBuf {
    store.record_path(&OwnerId::new(owner))
}

// ============================================================================
// Both Backends
// ============================================================================

async fn exercise(store: &dyn SessionStore) {
    let alice = OwnerId::new("alice");
    let bob = OwnerId::new("bob@example.com");

    assert!(store.load(&alice).await.unwrap().is_none());
    assert!(store.list().await.unwrap().is_empty());

    let first = session(1);
    store.save(&alice, &first).await.unwrap();
    store.save(&bob, &session(2)).await.unwrap();
    assert_eq!(store.load(&alice).await.unwrap(), Some(first));
    assert_eq!(store.list().await.unwrap(), vec![alice.clone(), bob.clone()]);

    // Overwrite keeps a single record per owner
    let mut second = session(3);
    second.daily_spent = 42;
    store.save(&alice, &second).await.unwrap();
    assert_eq!(store.load(&alice).await.unwrap(), Some(second));
    assert_eq!(store.list().await.unwrap().len(), 2);

    store.delete(&alice).await.unwrap();
    store.delete(&alice).await.unwrap();
    assert!(store.load(&alice).await.unwrap().is_none());
    assert_eq!(store.list().await.unwrap(), vec![bob]);
}

#[tokio::test]
async fn test_memory_store_contract() {
    exercise(&MemorySessionStore::new()).await;
}

#[tokio::test]
async fn test_file_store_contract() {
    let dir = TempDir::new();
    let store = FileSessionStore::new(&dir.0, generate_sealing_key()).unwrap();
    exercise(&store).await;
}

// ============================================================================
// File Store
// ============================================================================

#[tokio::test]
async fn test_file_store_creates_directory() {
    let dir = TempDir::new();
    let nested = dir.0.join("a").join("b");
    let store = FileSessionStore::new(&nested, generate_sealing_key()).unwrap();

    assert!(nested.is_dir());
    assert_eq!(store.base_path(), &nested);
}

#[tokio::test]
async fn test_file_store_ignores_foreign_files() {
    let dir = TempDir::new();
    let store = FileSessionStore::new(&dir.0, generate_sealing_key()).unwrap();
    let owner = OwnerId::new("alice");
    store.save(&owner, &session(1)).await.unwrap();

    std::fs::write(dir.0.join("notes.txt"), b"hello").unwrap();
    std::fs::write(dir.0.join("zz-not-hex.session"), b"{}").unwrap();

    assert_eq!(store.list().await.unwrap(), vec![owner]);
}

#[tokio::test]
async fn test_file_store_owner_with_path_characters() {
    let dir = TempDir::new();
    let store = FileSessionStore::new(&dir.0, generate_sealing_key()).unwrap();
    let owner = OwnerId::new("../../etc/passwd");

    store.save(&owner, &session(1)).await.unwrap();
    assert!(record_file(&store, owner.as_str()).exists());
    assert_eq!(store.list().await.unwrap(), vec![owner]);
}

#[tokio::test]
async fn test_file_store_long_owner_id() {
    let dir = TempDir::new();
    let store = FileSessionStore::new(&dir.0, generate_sealing_key()).unwrap();
    let owner = OwnerId::new(format!("did:pkh:eip155:8453:0x{}", "ab".repeat(200)));
    let record = session(1);

    store.save(&owner, &record).await.unwrap();
    assert_eq!(store.load(&owner).await.unwrap(), Some(record));
    assert_eq!(store.list().await.unwrap(), vec![owner.clone()]);

    let name = record_file(&store, owner.as_str());
    assert!(name.file_name().unwrap().len() < 80);

    store.delete(&owner).await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_store_rejects_record_of_other_owner() {
    let dir = TempDir::new();
    let store = FileSessionStore::new(&dir.0, generate_sealing_key()).unwrap();
    let alice = OwnerId::new("alice");
    let bob = OwnerId::new("bob");
    store.save(&alice, &session(1)).await.unwrap();

    std::fs::copy(record_file(&store, "alice"), record_file(&store, "bob")).unwrap();

    assert!(matches!(store.load(&bob).await, Err(Error::Deserialization(_))));
}

#[tokio::test]
async fn test_file_store_corrupted_record() {
    let dir = TempDir::new();
    let store = FileSessionStore::new(&dir.0, generate_sealing_key()).unwrap();
    let owner = OwnerId::new("alice");

    store.save(&owner, &session(1)).await.unwrap();
    std::fs::write(record_file(&store, "alice"), b"not json").unwrap();

    assert!(matches!(
        store.load(&owner).await,
        Err(Error::Deserialization(_))
    ));
}

#[tokio::test]
async fn test_file_store_tampered_ciphertext() {
    let dir = TempDir::new();
    let store = FileSessionStore::new(&dir.0, generate_sealing_key()).unwrap();
    let owner = OwnerId::new("alice");
    store.save(&owner, &session(1)).await.unwrap();

    let path = record_file(&store, "alice");
    let mut sealed: SealedRecord =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    sealed.ciphertext[0] ^= 0xff;
    std::fs::write(&path, serde_json::to_vec(&sealed).unwrap()).unwrap();

    assert!(matches!(store.load(&owner).await, Err(Error::Encryption(_))));
}

#[test]
fn test_sealed_record_version() {
    let key = generate_sealing_key();
    let mut sealed = SealedRecord::seal(&OwnerId::new("alice"), &session(1), &key).unwrap();
    assert_eq!(sealed.version, SealedRecord::CURRENT_VERSION);

    sealed.version = 99;
    assert!(matches!(sealed.open(&key), Err(Error::Deserialization(_))));
}

#[test]
fn test_sealing_uses_fresh_nonces() {
    let key = generate_sealing_key();
    let owner = OwnerId::new("alice");
    let record = session(1);

    let a = SealedRecord::seal(&owner, &record, &key).unwrap();
    let b = SealedRecord::seal(&owner, &record, &key).unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[cfg(unix)]
#[tokio::test]
async fn test_file_store_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new();
    let store = FileSessionStore::new(&dir.0, generate_sealing_key()).unwrap();
    store.save(&OwnerId::new("alice"), &session(1)).await.unwrap();

    let mode = std::fs::metadata(record_file(&store, "alice"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}
