//! Session Record Storage
//!
//! Session records are keyed by owner identity. Two backends are provided:
//!
//! - **MemorySessionStore**: process-local map (tests, single-node demos)
//! - **FileSessionStore**: one sealed file per owner on local disk
//!
//! ## Security Considerations
//!
//! - Records hold the session private key, so the file backend seals the
//!   whole record with ChaCha20-Poly1305 before it touches disk
//! - Files are written with `0o600` permissions on Unix
//! - Deleted files are overwritten with zeros before removal
//!
//! ## Example
//!
//! ```rust,ignore
//! use gasless_session_core::store::{FileSessionStore, SessionStore};
//!
//! let store = FileSessionStore::new("/var/lib/sessions", sealing_key)?;
//! store.save(&owner, &session).await?;
//! let session = store.load(&owner).await?;
//! ```

use crate::session::SessionKey;
use crate::types::{OwnerId, keccak256};
use crate::{Error, Result};
use async_trait::async_trait;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;
use zeroize::Zeroizing;

const RECORD_EXTENSION: &str = "session";

/// Trait for session record backends
///
/// Operations are atomic per record. Callers serialize read-modify-write
/// sequences on the same owner themselves.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the record for `owner`
    async fn load(&self, owner: &OwnerId) -> Result<Option<SessionKey>>;

    /// Insert or overwrite the record for `owner`
    async fn save(&self, owner: &OwnerId, session: &SessionKey) -> Result<()>;

    /// Remove the record for `owner`; removing nothing is not an error
    async fn delete(&self, owner: &OwnerId) -> Result<()>;

    /// Owners with a stored record
    async fn list(&self) -> Result<Vec<OwnerId>>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<OwnerId, SessionKey>>>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, owner: &OwnerId) -> Result<Option<SessionKey>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(owner).cloned())
    }

    async fn save(&self, owner: &OwnerId, session: &SessionKey) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(owner.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, owner: &OwnerId) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(owner);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<OwnerId>> {
        let sessions = self.sessions.read().await;
        let mut owners: Vec<_> = sessions.keys().cloned().collect();
        owners.sort();
        Ok(owners)
    }
}

/// Plaintext of a sealed record
#[derive(Serialize)]
struct StoredRef<'a> {
    owner: &'a OwnerId,
    session: &'a SessionKey,
}

#[derive(Deserialize)]
struct Stored {
    owner: OwnerId,
    session: SessionKey,
}

/// Session record sealed for disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedRecord {
    /// Format version
    pub version: u32,
    /// Nonce used for sealing (12 bytes)
    pub nonce: [u8; 12],
    /// Sealed JSON of the owner and session record
    #[serde(with = "crate::types::bytes_hex")]
    pub ciphertext: Vec<u8>,
}

impl SealedRecord {
    /// Current record format
    pub const CURRENT_VERSION: u32 = 2;

    /// Seal `owner`'s session record under `key`
    pub fn seal(owner: &OwnerId, session: &SessionKey, key: &[u8; 32]) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new(key.into());
        let nonce_bytes: [u8; 12] = rand::random();

        let plaintext = Zeroizing::new(serde_json::to_vec(&StoredRef { owner, session })?);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|e| Error::Encryption(e.to_string()))?;

        Ok(Self {
            version: Self::CURRENT_VERSION,
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Open the record with `key`, returning its owner and session
    pub fn open(&self, key: &[u8; 32]) -> Result<(OwnerId, SessionKey)> {
        if self.version != Self::CURRENT_VERSION {
            return Err(Error::Deserialization(format!(
                "Unsupported session record version {}",
                self.version
            )));
        }

        let cipher = ChaCha20Poly1305::new(key.into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_ref())
            .map(Zeroizing::new)
            .map_err(|_| {
                Error::Encryption("Decryption failed - invalid key or corrupted data".into())
            })?;

        let stored: Stored =
            serde_json::from_slice(&plaintext).map_err(|e| Error::Deserialization(e.to_string()))?;
        Ok((stored.owner, stored.session))
    }
}

/// File-backed store, one sealed file per owner
///
/// Files are named by the keccak256 hash of the owner id, so any id maps
/// to a short, path-safe name. The owner id itself is inside the sealed
/// record.
pub struct FileSessionStore {
    base_path: PathBuf,
    sealing_key: Zeroizing<[u8; 32]>,
}

impl FileSessionStore {
    /// Open (creating if needed) a store rooted at `base_path`
    pub fn new(base_path: impl Into<PathBuf>, sealing_key: [u8; 32]) -> Result<Self> {
        let base_path = base_path.into();

        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }

        Ok(Self {
            base_path,
            sealing_key: Zeroizing::new(sealing_key),
        })
    }

    /// Directory holding the records
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    /// File holding `owner`'s record
    pub fn record_path(&self, owner: &OwnerId) -> PathBuf {
        let name = hex::encode(keccak256(owner.as_str().as_bytes()));
        self.base_path.join(format!("{}.{}", name, RECORD_EXTENSION))
    }

    async fn read_record(&self, path: &Path) -> Result<Option<(OwnerId, SessionKey)>> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sealed: SealedRecord =
            serde_json::from_slice(&data).map_err(|e| Error::Deserialization(e.to_string()))?;

        sealed.open(&self.sealing_key).map(Some)
    }
}

impl std::fmt::Debug for FileSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSessionStore")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, owner: &OwnerId) -> Result<Option<SessionKey>> {
        let Some((stored_owner, session)) = self.read_record(&self.record_path(owner)).await?
        else {
            return Ok(None);
        };

        if &stored_owner != owner {
            return Err(Error::Deserialization(format!(
                "Record for {} holds a session of {}",
                owner, stored_owner
            )));
        }
        Ok(Some(session))
    }

    async fn save(&self, owner: &OwnerId, session: &SessionKey) -> Result<()> {
        let path = self.record_path(owner);
        let sealed = SealedRecord::seal(owner, session, &self.sealing_key)?;
        let data = serde_json::to_vec_pretty(&sealed)?;

        // Write then rename
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, perms).await?;
        }

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, owner: &OwnerId) -> Result<()> {
        let path = self.record_path(owner);

        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                let zeros = vec![0u8; meta.len() as usize];
                tokio::fs::write(&path, zeros).await?;
                tokio::fs::remove_file(&path).await?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<OwnerId>> {
        let mut owners = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match self.read_record(&path).await {
                Ok(Some((owner, _))) => owners.push(owner),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
            }
        }

        owners.sort();
        Ok(owners)
    }
}

/// Generate a random sealing key
pub fn generate_sealing_key() -> [u8; 32] {
    rand::random()
}
