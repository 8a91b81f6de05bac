//! Unit tests for the session lifecycle
//!
//! These tests verify:
//! - Idempotent creation and the public handle
//! - Lazy expiration and the expired event
//! - Calendar-day reset of the daily counter
//! - Revocation
//! - Registration failure policies

use chrono::{Duration, TimeZone, Utc};
use gasless_session_core::config::{ConfigHandle, EngineConfig, RegistrationPolicy};
use gasless_session_core::provider::{ProviderRegistry, SimulatedBundler};
use gasless_session_core::store::{MemorySessionStore, SessionStore};
use gasless_session_core::{
    ChainId, Clock, Error, EventBus, ManualClock, OwnerId, ProviderId, SessionKeyManager,
};
use std::sync::Arc;

struct Fixture {
    manager: SessionKeyManager,
    store: Arc<MemorySessionStore>,
    bundler: Arc<SimulatedBundler>,
    clock: Arc<ManualClock>,
    config: ConfigHandle,
    events: EventBus,
}

fn fixture_with(config: EngineConfig) -> Fixture {
    let store = Arc::new(MemorySessionStore::new());
    let bundler = Arc::new(SimulatedBundler::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap(),
    ));
    let registry = ProviderRegistry::with_default_providers(
        bundler.clone(),
        config.sponsorship.clone(),
    );
    let config = ConfigHandle::new(config).unwrap();
    let events = EventBus::default();

    let manager = SessionKeyManager::new(
        config.clone(),
        Arc::new(registry),
        store.clone(),
        clock.clone(),
        events.clone(),
    );

    Fixture {
        manager,
        store,
        bundler,
        clock,
        config,
        events,
    }
}

fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_create_applies_default_policy() {
    let f = fixture_with(EngineConfig::default().with_session_ttl(60));
    let owner = OwnerId::new("alice");

    let handle = f.manager.create(&owner).await.unwrap();
    let config = f.config.snapshot();

    assert_eq!(handle.expiration, f.clock.unix_now() + 60);
    assert_eq!(handle.spending_limit, config.default_spending_limit);
    assert_eq!(handle.daily_spent, 0);
    assert_eq!(handle.allowed_contracts, config.default_allowed_contracts);
    assert_eq!(handle.allowed_method_selectors, config.default_allowed_selectors);
    assert_eq!(handle.provider_id, Some(ProviderId::ZeroDev));
    assert_eq!(handle.chain_id, Some(ChainId::BASE_SEPOLIA));
}

#[tokio::test]
async fn test_handle_carries_no_private_material() {
    let f = fixture();
    let handle = f.manager.create(&OwnerId::new("alice")).await.unwrap();

    let json = serde_json::to_value(&handle).unwrap();
    assert!(json.get("privateMaterial").is_none());
    assert!(json.get("publicAddress").is_some());
}

#[tokio::test]
async fn test_create_twice_returns_same_session() {
    let f = fixture();
    let owner = OwnerId::new("alice");

    let first = f.manager.create(&owner).await.unwrap();
    f.clock.advance(Duration::minutes(10));
    let second = f.manager.create(&owner).await.unwrap();

    assert_eq!(first.public_address, second.public_address);
    assert_eq!(first.expiration, second.expiration);
    assert_eq!(f.bundler.registrations().len(), 1);
}

#[tokio::test]
async fn test_create_registers_with_provider() {
    let f = fixture();
    let owner = OwnerId::new("alice");
    let handle = f.manager.create(&owner).await.unwrap();

    let registrations = f.bundler.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].session_key, handle.public_address);
    assert_eq!(registrations[0].spending_limit, handle.spending_limit);
    assert_eq!(registrations[0].valid_until, handle.expiration);
    assert_eq!(Some(registrations[0].account), handle.account_address);
    assert!(!registrations[0].payload.is_empty());
}

#[tokio::test]
async fn test_create_reads_provider_per_operation() {
    let f = fixture();
    let alice = f.manager.create(&OwnerId::new("alice")).await.unwrap();

    f.config
        .update(f.config.snapshot().with_provider(ProviderId::Alchemy))
        .unwrap();
    let bob = f.manager.create(&OwnerId::new("bob")).await.unwrap();

    assert_eq!(alice.provider_id, Some(ProviderId::ZeroDev));
    assert_eq!(bob.provider_id, Some(ProviderId::Alchemy));
}

#[tokio::test]
async fn test_create_on_unsupported_chain_stores_nothing() {
    let f = fixture_with(EngineConfig::default().with_chain(ChainId(999)));
    let owner = OwnerId::new("alice");

    let result = f.manager.create(&owner).await;
    assert!(matches!(result, Err(Error::UnsupportedChain { .. })));
    assert!(f.store.load(&owner).await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_publishes_event() {
    let f = fixture();
    let mut rx = f.events.subscribe();

    let handle = f.manager.create(&OwnerId::new("alice")).await.unwrap();
    let envelope = rx.recv().await.unwrap();

    assert_eq!(envelope.event.name(), "session.created");
    assert_eq!(envelope.timestamp, f.clock.now());
    let json = serde_json::to_value(&envelope).unwrap();
    assert_eq!(
        json["data"]["publicAddress"],
        serde_json::json!(handle.public_address)
    );
}

// ============================================================================
// Registration Failure Policy
// ============================================================================

#[tokio::test]
async fn test_rollback_on_registration_error() {
    let f = fixture();
    let owner = OwnerId::new("alice");
    f.bundler.set_fail_registration(true);

    let result = f.manager.create(&owner).await;
    assert!(matches!(result, Err(Error::AdapterRegistrationFailed(_))));
    assert!(f.store.load(&owner).await.unwrap().is_none());

    // Recovers once the provider does
    f.bundler.set_fail_registration(false);
    assert!(f.manager.create(&owner).await.is_ok());
}

#[tokio::test]
async fn test_rollback_on_declined_registration() {
    let f = fixture();
    let owner = OwnerId::new("alice");
    f.bundler.set_decline_registration(true);

    assert!(matches!(
        f.manager.create(&owner).await,
        Err(Error::AdapterRegistrationFailed(_))
    ));
    assert!(f.manager.get(&owner).await.unwrap().is_none());
}

#[tokio::test]
async fn test_best_effort_keeps_local_session() {
    let f = fixture_with(
        EngineConfig::default().with_registration_policy(RegistrationPolicy::BestEffort),
    );
    let owner = OwnerId::new("alice");
    f.bundler.set_fail_registration(true);

    let handle = f.manager.create(&owner).await.unwrap();
    let stored = f.manager.get(&owner).await.unwrap().unwrap();
    assert_eq!(stored.public_address, handle.public_address);
}

// ============================================================================
// Expiration
// ============================================================================

#[tokio::test]
async fn test_expired_session_is_evicted() {
    let f = fixture();
    let owner = OwnerId::new("alice");
    f.manager.create(&owner).await.unwrap();

    // Force expiration = now - 1
    let mut record = f.store.load(&owner).await.unwrap().unwrap();
    record.expiration = f.clock.unix_now() - 1;
    f.store.save(&owner, &record).await.unwrap();

    assert!(f.manager.get(&owner).await.unwrap().is_none());
    assert!(f.store.load(&owner).await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_alive_at_exact_expiration() {
    let f = fixture();
    let owner = OwnerId::new("alice");
    let handle = f.manager.create(&owner).await.unwrap();

    f.clock
        .set(Utc.timestamp_opt(handle.expiration, 0).unwrap());
    assert!(f.manager.get(&owner).await.unwrap().is_some());

    f.clock.advance(Duration::seconds(1));
    assert!(f.manager.get(&owner).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expiration_is_monotonic() {
    let f = fixture();
    let owner = OwnerId::new("alice");
    f.manager.create(&owner).await.unwrap();

    f.clock.advance(Duration::minutes(31));
    assert!(f.manager.get(&owner).await.unwrap().is_none());

    for _ in 0..3 {
        f.clock.advance(Duration::minutes(1));
        assert!(f.manager.get(&owner).await.unwrap().is_none());
    }

    // Only a new create brings a session back
    let fresh = f.manager.create(&owner).await.unwrap();
    assert!(f.manager.get(&owner).await.unwrap().is_some());
    assert_eq!(fresh.expiration, f.clock.unix_now() + 1800);
}

#[tokio::test]
async fn test_expired_event_published_once() {
    let f = fixture();
    let owner = OwnerId::new("alice");
    f.manager.create(&owner).await.unwrap();
    let mut rx = f.events.subscribe();

    f.clock.advance(Duration::hours(1));
    f.manager.get(&owner).await.unwrap();
    f.manager.get(&owner).await.unwrap();

    assert_eq!(rx.recv().await.unwrap().event.name(), "session.expired");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_create_replaces_expired_session() {
    let f = fixture();
    let owner = OwnerId::new("alice");
    let first = f.manager.create(&owner).await.unwrap();

    f.clock.advance(Duration::hours(1));
    let second = f.manager.create(&owner).await.unwrap();
    assert_ne!(first.public_address, second.public_address);
}

// ============================================================================
// Daily Reset
// ============================================================================

#[tokio::test]
async fn test_daily_reset_on_calendar_day_change() {
    let f = fixture_with(EngineConfig::default().with_session_ttl(2 * 86_400));
    let owner = OwnerId::new("alice");

    // Created at 23:59:00, yesterday from the next lookup's point of view
    f.clock
        .set(Utc.with_ymd_and_hms(2024, 6, 15, 23, 59, 0).unwrap());
    f.manager.create(&owner).await.unwrap();

    let mut record = f.store.load(&owner).await.unwrap().unwrap();
    record.daily_spent = 500;
    f.store.save(&owner, &record).await.unwrap();

    // Two minutes later it is a new UTC day
    f.clock.advance(Duration::minutes(2));
    let session = f.manager.get(&owner).await.unwrap().unwrap();
    assert_eq!(session.daily_spent, 0);
    assert_eq!(session.last_reset_date, f.clock.today());

    // Reset was persisted
    let stored = f.store.load(&owner).await.unwrap().unwrap();
    assert_eq!(stored.daily_spent, 0);
}

#[tokio::test]
async fn test_no_reset_within_same_day() {
    let f = fixture_with(EngineConfig::default().with_session_ttl(86_400));
    let owner = OwnerId::new("alice");

    f.clock
        .set(Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 1).unwrap());
    f.manager.create(&owner).await.unwrap();

    let mut record = f.store.load(&owner).await.unwrap().unwrap();
    record.daily_spent = 500;
    f.store.save(&owner, &record).await.unwrap();

    // Almost 24 hours later, same date
    f.clock
        .set(Utc.with_ymd_and_hms(2024, 6, 15, 23, 59, 59).unwrap());
    let session = f.manager.get(&owner).await.unwrap().unwrap();
    assert_eq!(session.daily_spent, 500);
}

// ============================================================================
// Revocation
// ============================================================================

#[tokio::test]
async fn test_revoke_nonexistent_returns_true() {
    let f = fixture();
    let mut rx = f.events.subscribe();

    assert!(f.manager.revoke(&OwnerId::new("ghost")).await.unwrap());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_revoke_removes_session() {
    let f = fixture();
    let owner = OwnerId::new("alice");
    f.manager.create(&owner).await.unwrap();
    let mut rx = f.events.subscribe();

    assert!(f.manager.revoke(&owner).await.unwrap());
    assert!(f.manager.get(&owner).await.unwrap().is_none());
    assert!(f.manager.revoke(&owner).await.unwrap());

    assert_eq!(rx.recv().await.unwrap().event.name(), "session.revoked");
    assert!(rx.try_recv().is_err());
}
