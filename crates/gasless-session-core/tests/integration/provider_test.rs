//! Integration tests for provider adapters
//!
//! Submitted UserOperations are inspected on the simulated bundler:
//! - Sender is the derived account of the session's provider
//! - Call data uses the provider's execute encoding
//! - Paymaster sponsorship is attached when configured
//! - The signature recovers to the session key
//! - Undeployed accounts carry factory init code

use alloy_primitives::{U256, address};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use gasless_session_core::config::{DEMO_TOKEN_CONTRACT, ENTRY_POINT_V06, TRANSFER_SELECTOR};
use gasless_session_core::provider::{
    BundlerTransport, SessionRegistration, SimulatedBundler, UserOperation,
};
use gasless_session_core::store::MemorySessionStore;
use gasless_session_core::types::selector_of;
use gasless_session_core::{
    Address, ChainId, EngineConfig, Error, ManualClock, OwnerId, ProviderAdapter, ProviderId,
    Result, SessionEngine, Sponsorship, TxHash, keccak256,
};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use std::sync::Arc;
use tokio::sync::Notify;

const PAYMASTER: Address = address!("9a9a9a9a9a9a9a9a9a9a9a9a9a9a9a9a9a9a9a9a");

fn engine(config: EngineConfig) -> (SessionEngine, Arc<SimulatedBundler>) {
    let bundler = Arc::new(SimulatedBundler::new());
    let engine = SessionEngine::with_clock(
        config,
        Arc::new(MemorySessionStore::new()),
        bundler.clone(),
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        )),
    )
    .unwrap();
    (engine, bundler)
}

fn sponsored(provider: ProviderId) -> EngineConfig {
    EngineConfig::default()
        .with_provider(provider)
        .with_chain(ChainId::BASE_SEPOLIA)
        .with_spending_limit(1_000)
        .with_sponsorship(Sponsorship::default().with_paymaster(PAYMASTER))
}

fn transfer() -> Vec<u8> {
    let mut data = TRANSFER_SELECTOR.to_vec();
    data.extend_from_slice(&[0u8; 64]);
    data
}

fn recover_signer(digest: &[u8; 32], signature: &[u8]) -> Address {
    assert_eq!(signature.len(), 65);
    let sig = Signature::from_slice(&signature[..64]).unwrap();
    let recovery_id = RecoveryId::from_byte(signature[64] - 27).unwrap();
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id).unwrap();

    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

fn execute_selector(provider: ProviderId) -> [u8; 4] {
    match provider {
        ProviderId::ZeroDev => selector_of("execute(address,uint256,bytes,uint8)"),
        ProviderId::Biconomy => selector_of("execute_ncC(address,uint256,bytes)"),
        ProviderId::Alchemy => selector_of("execute(address,uint256,bytes)"),
    }
}

fn enable_selector(provider: ProviderId) -> [u8; 4] {
    match provider {
        ProviderId::ZeroDev => selector_of("enable(bytes)"),
        ProviderId::Biconomy => selector_of("setMerkleRoot(bytes32)"),
        ProviderId::Alchemy => selector_of("addSessionKey(address,uint48,uint256)"),
    }
}

// ============================================================================
// Per-Provider Encoding
// ============================================================================

#[tokio::test]
async fn test_each_provider_builds_its_own_operation() {
    for provider in ProviderId::all() {
        let (engine, bundler) = engine(sponsored(provider));
        let owner = OwnerId::new("alice");

        let account = engine.account(&owner).await.unwrap();
        assert_eq!(account.provider_id, provider);
        engine.create_session(&owner).await.unwrap();
        engine
            .execute(&owner, DEMO_TOKEN_CONTRACT, 25, &transfer())
            .await
            .unwrap();

        let registrations = bundler.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].provider, provider);
        assert_eq!(registrations[0].account, account.address);
        assert_eq!(registrations[0].payload[..4], enable_selector(provider));

        let submitted = bundler.submitted();
        assert_eq!(submitted.len(), 1);
        let op = &submitted[0].user_op;
        assert_eq!(op.sender, account.address);
        assert_eq!(op.call_data[..4], execute_selector(provider), "{}", provider);
        assert_eq!(submitted[0].chain, ChainId::BASE_SEPOLIA);
    }
}

#[tokio::test]
async fn test_inner_call_is_embedded() {
    let (engine, bundler) = engine(sponsored(ProviderId::Alchemy));
    let owner = OwnerId::new("alice");
    engine.create_session(&owner).await.unwrap();

    let call = transfer();
    engine
        .execute(&owner, DEMO_TOKEN_CONTRACT, 7, &call)
        .await
        .unwrap();

    let submitted = bundler.submitted();
    let op = &submitted[0].user_op;
    // execute(address target, uint256 value, bytes data)
    assert_eq!(&op.call_data[16..36], DEMO_TOKEN_CONTRACT.as_slice());
    assert_eq!(op.call_data[67], 7);
    let data_start = 4 + 32 * 4;
    assert_eq!(op.call_data[data_start..data_start + call.len()], call[..]);
}

// ============================================================================
// Sponsorship
// ============================================================================

#[tokio::test]
async fn test_paymaster_attached() {
    let (engine, bundler) = engine(sponsored(ProviderId::ZeroDev));
    let owner = OwnerId::new("alice");
    engine.create_session(&owner).await.unwrap();
    engine
        .execute(&owner, DEMO_TOKEN_CONTRACT, 1, &transfer())
        .await
        .unwrap();

    let submitted = bundler.submitted();
    let submitted = &submitted[0];
    assert!(submitted.user_op.is_sponsored());
    assert_eq!(&submitted.user_op.paymaster_and_data[..20], PAYMASTER.as_slice());
    assert_eq!(submitted.entry_point, ENTRY_POINT_V06);
}

#[tokio::test]
async fn test_self_funded_without_paymaster() {
    let config = EngineConfig::default().with_spending_limit(1_000);
    let (engine, bundler) = engine(config);
    let owner = OwnerId::new("alice");
    engine.create_session(&owner).await.unwrap();
    engine
        .execute(&owner, DEMO_TOKEN_CONTRACT, 1, &transfer())
        .await
        .unwrap();

    let submitted = bundler.submitted();
    let op = &submitted[0].user_op;
    assert!(!op.is_sponsored());
    assert!(op.paymaster_and_data.is_empty());
}

// ============================================================================
// Signing
// ============================================================================

#[tokio::test]
async fn test_signature_recovers_to_session_key() {
    for provider in ProviderId::all() {
        let (engine, bundler) = engine(sponsored(provider));
        let owner = OwnerId::new("0x1111111111111111111111111111111111111111");
        let session = engine.create_session(&owner).await.unwrap();

        engine
            .execute(&owner, DEMO_TOKEN_CONTRACT, 3, &transfer())
            .await
            .unwrap();

        let submitted = bundler.submitted();
        let submitted = &submitted[0];
        let op_hash = submitted
            .user_op
            .hash(submitted.entry_point, submitted.chain);
        let mut message = b"\x19Ethereum Signed Message:\n32".to_vec();
        message.extend_from_slice(&op_hash);
        let digest = keccak256(&message);

        assert_eq!(
            recover_signer(&digest, &submitted.user_op.signature),
            session.public_address
        );
        assert_eq!(submitted.hash.hash, format!("0x{}", hex::encode(op_hash)));
    }
}

#[tokio::test]
async fn test_nonce_advances_per_operation() {
    let (engine, bundler) = engine(sponsored(ProviderId::Biconomy));
    let owner = OwnerId::new("alice");
    engine.create_session(&owner).await.unwrap();

    let first = engine
        .execute(&owner, DEMO_TOKEN_CONTRACT, 1, &transfer())
        .await
        .unwrap();
    let second = engine
        .execute(&owner, DEMO_TOKEN_CONTRACT, 1, &transfer())
        .await
        .unwrap();

    let submitted = bundler.submitted();
    assert_eq!(submitted[0].user_op.nonce, U256::ZERO);
    assert_eq!(submitted[1].user_op.nonce, U256::from(1));
    assert_ne!(first, second);
}

// ============================================================================
// Deployment
// ============================================================================

#[tokio::test]
async fn test_deployment_status_from_bundler() {
    let (engine, bundler) = engine(sponsored(ProviderId::ZeroDev));
    let owner = OwnerId::new("alice");

    let account = engine.account(&owner).await.unwrap();
    assert!(!account.is_deployed);

    bundler.mark_deployed(ChainId::BASE_SEPOLIA, account.address);
    assert!(engine.account(&owner).await.unwrap().is_deployed);
}

#[tokio::test]
async fn test_first_operation_deploys_account() {
    let (engine, bundler) = engine(sponsored(ProviderId::Biconomy));
    let owner = OwnerId::new("alice");
    engine.create_session(&owner).await.unwrap();

    engine
        .execute(&owner, DEMO_TOKEN_CONTRACT, 1, &transfer())
        .await
        .unwrap();
    engine
        .execute(&owner, DEMO_TOKEN_CONTRACT, 1, &transfer())
        .await
        .unwrap();

    let adapter = engine.registry().get(ProviderId::Biconomy).unwrap();
    let mut expected = adapter.deployment().factory.to_vec();
    expected.extend(
        adapter
            .account_init_code(&owner, ChainId::BASE_SEPOLIA)
            .unwrap(),
    );

    let submitted = bundler.submitted();
    assert_eq!(submitted[0].user_op.init_code, expected);
    assert!(submitted[1].user_op.init_code.is_empty());
    assert!(engine.account(&owner).await.unwrap().is_deployed);
}

#[tokio::test]
async fn test_deployed_account_sends_no_init_code() {
    let (engine, bundler) = engine(sponsored(ProviderId::Alchemy));
    let owner = OwnerId::new("alice");
    let account = engine.account(&owner).await.unwrap();
    bundler.mark_deployed(ChainId::BASE_SEPOLIA, account.address);
    engine.create_session(&owner).await.unwrap();

    engine
        .execute(&owner, DEMO_TOKEN_CONTRACT, 1, &transfer())
        .await
        .unwrap();

    let submitted = bundler.submitted();
    assert!(submitted[0].user_op.init_code.is_empty());
    assert_eq!(submitted[0].request["params"][0]["initCode"], "0x");
}

// ============================================================================
// Session Replaced Mid-Flight
// ============================================================================

/// Holds every submission until released by the test
#[derive(Debug, Default)]
struct GatedBundler {
    inner: SimulatedBundler,
    entered: Notify,
    proceed: Notify,
}

#[async_trait]
impl BundlerTransport for GatedBundler {
    async fn get_code(&self, chain: ChainId, address: Address) -> Result<Vec<u8>> {
        self.inner.get_code(chain, address).await
    }

    async fn get_nonce(&self, chain: ChainId, entry_point: Address, sender: Address) -> Result<U256> {
        self.inner.get_nonce(chain, entry_point, sender).await
    }

    async fn register_session(
        &self,
        chain: ChainId,
        registration: &SessionRegistration,
    ) -> Result<bool> {
        self.inner.register_session(chain, registration).await
    }

    async fn send_user_operation(
        &self,
        chain: ChainId,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<TxHash> {
        self.entered.notify_one();
        self.proceed.notified().await;
        self.inner.send_user_operation(chain, user_op, entry_point).await
    }
}

fn gated_engine() -> (Arc<SessionEngine>, Arc<GatedBundler>) {
    let bundler = Arc::new(GatedBundler::default());
    let engine = SessionEngine::with_clock(
        sponsored(ProviderId::ZeroDev),
        Arc::new(MemorySessionStore::new()),
        bundler.clone(),
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        )),
    )
    .unwrap();
    (Arc::new(engine), bundler)
}

#[tokio::test]
async fn test_operation_signed_by_reserving_session() {
    let (engine, bundler) = gated_engine();
    let owner = OwnerId::new("alice");
    let first = engine.create_session(&owner).await.unwrap();

    let pending = {
        let engine = Arc::clone(&engine);
        let owner = owner.clone();
        tokio::spawn(async move {
            engine
                .execute(&owner, DEMO_TOKEN_CONTRACT, 6, &transfer())
                .await
        })
    };
    bundler.entered.notified().await;

    engine.revoke_session(&owner).await.unwrap();
    let second = engine.create_session(&owner).await.unwrap();
    bundler.proceed.notify_one();
    pending.await.unwrap().unwrap();

    let submitted = bundler.inner.submitted();
    let op = &submitted[0];
    let mut message = b"\x19Ethereum Signed Message:\n32".to_vec();
    message.extend_from_slice(&op.user_op.hash(op.entry_point, op.chain));
    let signer = recover_signer(&keccak256(&message), &op.user_op.signature);

    assert_eq!(signer, first.public_address);
    assert_ne!(signer, second.public_address);
    let current = engine.get_session(&owner).await.unwrap().unwrap();
    assert_eq!(current.daily_spent, 0);
}

#[tokio::test]
async fn test_failed_operation_leaves_replacement_session_alone() {
    let (engine, bundler) = gated_engine();
    let owner = OwnerId::new("alice");
    engine.create_session(&owner).await.unwrap();

    let pending = {
        let engine = Arc::clone(&engine);
        let owner = owner.clone();
        tokio::spawn(async move {
            engine
                .execute(&owner, DEMO_TOKEN_CONTRACT, 6, &transfer())
                .await
        })
    };
    bundler.entered.notified().await;

    engine.revoke_session(&owner).await.unwrap();
    engine.create_session(&owner).await.unwrap();
    engine
        .spending()
        .try_reserve(&owner, DEMO_TOKEN_CONTRACT, TRANSFER_SELECTOR, 5)
        .await
        .unwrap();

    bundler.inner.set_fail_submission(true);
    bundler.proceed.notify_one();
    assert!(matches!(pending.await.unwrap(), Err(Error::Transport(_))));

    let current = engine.get_session(&owner).await.unwrap().unwrap();
    assert_eq!(current.daily_spent, 5);
}
