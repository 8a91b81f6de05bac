//! Session key lifecycle
//!
//! A session key is a short-lived secp256k1 key the backend may sign with on
//! an owner's behalf, bounded by an allow-list of contracts and selectors and
//! a daily spending limit. Each owner has at most one active session.
//!
//! ```text
//! NonExistent --create--> Active --revoke--> Revoked  --+
//!                           |                           |--> NonExistent
//!                           +--expiration--> Expired  --+    (on next lookup)
//! ```
//!
//! Expired sessions are evicted lazily by the next lookup, so no background
//! sweeper is needed. The daily counter resets on the first lookup after the
//! UTC calendar date changes.

use crate::clock::Clock;
use crate::config::{ConfigHandle, EngineConfig, RegistrationPolicy};
use crate::events::{EngineEvent, EventBus};
use crate::provider::ProviderRegistry;
use crate::store::SessionStore;
use crate::types::{
    Amount, ChainId, OwnerId, ProviderId, Selector, amount_string, keccak256, selector_list,
};
use crate::{Error, Result};
use alloy_primitives::Address;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Private half of a session key
///
/// Never printed; wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret([u8; 32]);

impl SessionSecret {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&key.to_bytes());
        Self(bytes)
    }

    /// Wrap raw scalar bytes, rejecting invalid keys
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        SigningKey::from_slice(&bytes)
            .map_err(|e| Error::Crypto(format!("Invalid session key: {}", e)))?;
        Ok(Self(bytes))
    }

    /// ECDSA signing key
    pub fn signing_key(&self) -> Result<SigningKey> {
        SigningKey::from_slice(&self.0)
            .map_err(|e| Error::Crypto(format!("Invalid session key: {}", e)))
    }

    /// Ethereum address of the public key
    pub fn public_address(&self) -> Result<Address> {
        let key = self.signing_key()?;
        let encoded = key.verifying_key().to_encoded_point(false);

        // Skip the 0x04 prefix and take the last 20 bytes of the hash
        let hash = keccak256(&encoded.as_bytes()[1..]);
        Ok(Address::from_slice(&hash[12..]))
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecret([REDACTED])")
    }
}

impl Serialize for SessionSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for SessionSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s))
            .map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Session key must be 32 bytes"))?;
        SessionSecret::from_bytes(bytes).map_err(serde::de::Error::custom)
    }
}

/// Persisted session record, one per owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    /// Session private key
    pub private_material: SessionSecret,
    /// Session key address
    pub public_address: Address,
    /// Expiration (unix seconds)
    pub expiration: i64,
    /// Daily spending limit in base units
    #[serde(with = "amount_string")]
    pub spending_limit: Amount,
    /// Contracts the session may call
    pub allowed_contracts: BTreeSet<Address>,
    /// Selectors the session may call
    #[serde(with = "selector_list")]
    pub allowed_method_selectors: BTreeSet<Selector>,
    /// Amount spent on `last_reset_date`
    #[serde(with = "amount_string")]
    pub daily_spent: Amount,
    /// UTC date the daily counter belongs to
    pub last_reset_date: NaiveDate,
    /// Smart account the session acts for
    #[serde(default)]
    pub account_address: Option<Address>,
    /// Provider the session was registered with
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    /// Chain the session was registered on
    #[serde(default)]
    pub chain_id: Option<ChainId>,
    /// Creation time (unix seconds)
    #[serde(default)]
    pub created_at: i64,
}

impl SessionKey {
    /// New session with the configured default policy
    pub fn generate(config: &EngineConfig, account: Address, now: DateTime<Utc>) -> Result<Self> {
        let private_material = SessionSecret::generate();
        let public_address = private_material.public_address()?;
        let ttl = i64::try_from(config.session_ttl_secs)
            .map_err(|_| Error::InvalidConfig("Session TTL out of range".into()))?;

        Ok(Self {
            private_material,
            public_address,
            expiration: now.timestamp() + ttl,
            spending_limit: config.default_spending_limit,
            allowed_contracts: config.default_allowed_contracts.clone(),
            allowed_method_selectors: config.default_allowed_selectors.clone(),
            daily_spent: 0,
            last_reset_date: now.date_naive(),
            account_address: Some(account),
            provider_id: Some(config.active_provider),
            chain_id: Some(config.chain_id),
            created_at: now.timestamp(),
        })
    }

    /// Whether the session expired strictly before `now`
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration < now
    }

    /// Spend still available today
    pub fn remaining_allowance(&self) -> Amount {
        self.spending_limit.saturating_sub(self.daily_spent)
    }

    /// Public view without private material
    pub fn handle(&self, owner: &OwnerId) -> SessionHandle {
        SessionHandle {
            owner: owner.clone(),
            public_address: self.public_address,
            account_address: self.account_address,
            provider_id: self.provider_id,
            chain_id: self.chain_id,
            expiration: self.expiration,
            spending_limit: self.spending_limit,
            daily_spent: self.daily_spent,
            allowed_contracts: self.allowed_contracts.clone(),
            allowed_method_selectors: self.allowed_method_selectors.clone(),
        }
    }
}

/// Session as seen by callers outside the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub owner: OwnerId,
    pub public_address: Address,
    pub account_address: Option<Address>,
    pub provider_id: Option<ProviderId>,
    pub chain_id: Option<ChainId>,
    pub expiration: i64,
    #[serde(with = "amount_string")]
    pub spending_limit: Amount,
    #[serde(with = "amount_string")]
    pub daily_spent: Amount,
    pub allowed_contracts: BTreeSet<Address>,
    #[serde(with = "selector_list")]
    pub allowed_method_selectors: BTreeSet<Selector>,
}

/// Per-owner async mutexes
///
/// Every read-modify-write of an owner's record holds that owner's lock.
/// An entry lives only while someone holds or waits on it.
#[derive(Debug, Clone, Default)]
pub struct OwnerLocks {
    locks: Arc<DashMap<OwnerId, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and hold `owner`'s lock
    pub async fn lock(&self, owner: &OwnerId) -> OwnerGuard {
        let mutex = self.locks.entry(owner.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        OwnerGuard {
            guard: Some(guard),
            owner: owner.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of tracked owners
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Check if no owner is tracked
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held owner lock; removes the table entry on drop when nobody else
/// holds or waits on it
#[derive(Debug)]
pub struct OwnerGuard {
    guard: Option<OwnedMutexGuard<()>>,
    owner: OwnerId,
    locks: Arc<DashMap<OwnerId, Arc<Mutex<()>>>>,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // New waiters clone under the shard lock, so the count is exact here
        self.locks
            .remove_if(&self.owner, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Outcome of reading an owner's record
#[derive(Debug)]
pub(crate) enum Lookup {
    Missing,
    /// Evicted during this lookup
    Expired(SessionKey),
    Active(SessionKey),
}

/// Owns session creation, lookup and revocation
pub struct SessionKeyManager {
    config: ConfigHandle,
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    locks: OwnerLocks,
}

impl SessionKeyManager {
    /// Create a session manager
    pub fn new(
        config: ConfigHandle,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            clock,
            events,
            locks: OwnerLocks::new(),
        }
    }

    /// Create a session for `owner`, or return the active one unchanged
    ///
    /// The private key never leaves the engine; callers get a
    /// [`SessionHandle`].
    pub async fn create(&self, owner: &OwnerId) -> Result<SessionHandle> {
        let config = self.config.snapshot();
        let adapter = self.registry.get(config.active_provider)?;
        let account = adapter.derive_address(owner, config.chain_id)?;

        let _guard = self.locks.lock(owner).await;
        let now = self.clock.now();

        if let Some(existing) = self.load_active(owner, now).await? {
            debug!(%owner, session = %existing.public_address, "Reusing active session");
            return Ok(existing.handle(owner));
        }

        let session = SessionKey::generate(&config, account, now)?;
        self.store.save(owner, &session).await?;

        let registration = adapter
            .create_session(
                config.chain_id,
                account,
                session.public_address,
                session.spending_limit,
                session.expiration,
            )
            .await;
        let failure = match registration {
            Ok(true) => None,
            Ok(false) => Some("provider declined session".to_string()),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            match config.registration_policy {
                RegistrationPolicy::Rollback => {
                    warn!(%owner, provider = %adapter.id(), %reason, "Session registration failed, rolling back");
                    self.store.delete(owner).await?;
                    return Err(Error::AdapterRegistrationFailed(reason));
                }
                RegistrationPolicy::BestEffort => {
                    warn!(%owner, provider = %adapter.id(), %reason, "Session registration failed, keeping local session");
                }
            }
        }

        info!(
            %owner,
            session = %session.public_address,
            %account,
            provider = %adapter.id(),
            expiration = session.expiration,
            "Session created"
        );
        self.events.publish(
            now,
            EngineEvent::SessionCreated {
                owner: owner.clone(),
                public_address: session.public_address,
                expiration: session.expiration,
            },
        );

        Ok(session.handle(owner))
    }

    /// Active session for `owner`, if any
    pub async fn get(&self, owner: &OwnerId) -> Result<Option<SessionKey>> {
        let _guard = self.locks.lock(owner).await;
        self.load_active(owner, self.clock.now()).await
    }

    /// Delete `owner`'s session; succeeds whether or not one existed
    pub async fn revoke(&self, owner: &OwnerId) -> Result<bool> {
        let _guard = self.locks.lock(owner).await;
        let existing = self.store.load(owner).await?;
        self.store.delete(owner).await?;

        if let Some(session) = existing {
            info!(%owner, session = %session.public_address, "Session revoked");
            self.events.publish(
                self.clock.now(),
                EngineEvent::SessionRevoked {
                    owner: owner.clone(),
                    public_address: session.public_address,
                },
            );
        }

        Ok(true)
    }

    /// Classify `owner`'s record, evicting it if expired and rolling the
    /// daily counter if the UTC date changed. Caller holds the owner lock.
    pub(crate) async fn lookup(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<Lookup> {
        let Some(mut session) = self.store.load(owner).await? else {
            return Ok(Lookup::Missing);
        };

        if session.is_expired(now.timestamp()) {
            self.store.delete(owner).await?;
            info!(%owner, session = %session.public_address, "Session expired");
            self.events.publish(
                now,
                EngineEvent::SessionExpired {
                    owner: owner.clone(),
                    public_address: session.public_address,
                    expiration: session.expiration,
                },
            );
            return Ok(Lookup::Expired(session));
        }

        let today = now.date_naive();
        if session.last_reset_date != today {
            debug!(%owner, from = %session.last_reset_date, to = %today, "Resetting daily spend");
            session.daily_spent = 0;
            session.last_reset_date = today;
            self.store.save(owner, &session).await?;
        }

        Ok(Lookup::Active(session))
    }

    /// Active session only; caller holds the owner lock
    pub(crate) async fn load_active(
        &self,
        owner: &OwnerId,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionKey>> {
        match self.lookup(owner, now).await? {
            Lookup::Active(session) => Ok(Some(session)),
            Lookup::Missing | Lookup::Expired(_) => Ok(None),
        }
    }

    pub(crate) fn locks(&self) -> &OwnerLocks {
        &self.locks
    }

    pub(crate) fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }
}

impl std::fmt::Debug for SessionKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyManager")
            .field("registry", &self.registry)
            .field("tracked_owners", &self.locks.len())
            .finish()
    }
}
