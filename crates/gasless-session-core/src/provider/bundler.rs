//! Bundler transport
//!
//! Adapters reach provider infrastructure (bundler, session-key service,
//! chain state) only through [`BundlerTransport`]. The crate ships a
//! [`SimulatedBundler`] that accepts everything locally, records what it was
//! sent and can be told to fail; production deployments plug in their own
//! network client.

use super::UserOperation;
use crate::types::{Amount, ChainId, ProviderId, TxHash, amount_string, bytes_hex};
use crate::{Error, Result};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Provider-side session registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRegistration {
    /// Provider the session is registered with
    pub provider: ProviderId,
    /// Smart account the session acts for
    pub account: Address,
    /// Session key public address
    pub session_key: Address,
    /// Daily spending limit in base units
    #[serde(with = "amount_string")]
    pub spending_limit: Amount,
    /// Expiration (unix seconds)
    pub valid_until: i64,
    /// Provider-encoded enable call
    #[serde(with = "bytes_hex")]
    pub payload: Vec<u8>,
}

/// Transport to provider infrastructure
#[async_trait]
pub trait BundlerTransport: Send + Sync + std::fmt::Debug {
    /// Deployed bytecode at `address` (empty if none)
    async fn get_code(&self, chain: ChainId, address: Address) -> Result<Vec<u8>>;

    /// EntryPoint nonce for `sender`
    async fn get_nonce(&self, chain: ChainId, entry_point: Address, sender: Address)
    -> Result<U256>;

    /// Register a session key; `Ok(false)` means the provider declined
    async fn register_session(
        &self,
        chain: ChainId,
        registration: &SessionRegistration,
    ) -> Result<bool>;

    /// Submit a signed UserOperation
    async fn send_user_operation(
        &self,
        chain: ChainId,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<TxHash>;
}

/// A UserOperation accepted by the simulated bundler
#[derive(Debug, Clone)]
pub struct SubmittedOperation {
    pub chain: ChainId,
    pub entry_point: Address,
    pub user_op: UserOperation,
    pub hash: TxHash,
    /// JSON-RPC request a network bundler would have received
    pub request: serde_json::Value,
}

/// In-process bundler for tests and local development
#[derive(Debug, Default)]
pub struct SimulatedBundler {
    code: DashMap<(ChainId, Address), Vec<u8>>,
    nonces: DashMap<(ChainId, Address), u64>,
    registrations: Mutex<Vec<SessionRegistration>>,
    submitted: Mutex<Vec<SubmittedOperation>>,
    fail_registration: AtomicBool,
    decline_registration: AtomicBool,
    fail_submission: AtomicBool,
}

impl SimulatedBundler {
    /// Create a new simulated bundler
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend an account has been deployed
    pub fn mark_deployed(&self, chain: ChainId, address: Address) {
        self.code.insert((chain, address), vec![0x60, 0x80, 0x60, 0x40]);
    }

    /// Make `register_session` return a transport error
    pub fn set_fail_registration(&self, fail: bool) {
        self.fail_registration.store(fail, Ordering::SeqCst);
    }

    /// Make `register_session` return `Ok(false)`
    pub fn set_decline_registration(&self, decline: bool) {
        self.decline_registration.store(decline, Ordering::SeqCst);
    }

    /// Make `send_user_operation` return a transport error
    pub fn set_fail_submission(&self, fail: bool) {
        self.fail_submission.store(fail, Ordering::SeqCst);
    }

    /// Registrations received so far
    pub fn registrations(&self) -> Vec<SessionRegistration> {
        self.registrations.lock().clone()
    }

    /// Operations accepted so far
    pub fn submitted(&self) -> Vec<SubmittedOperation> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl BundlerTransport for SimulatedBundler {
    async fn get_code(&self, chain: ChainId, address: Address) -> Result<Vec<u8>> {
        Ok(self
            .code
            .get(&(chain, address))
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn get_nonce(
        &self,
        chain: ChainId,
        _entry_point: Address,
        sender: Address,
    ) -> Result<U256> {
        let nonce = self.nonces.get(&(chain, sender)).map(|n| *n).unwrap_or(0);
        Ok(U256::from(nonce))
    }

    async fn register_session(
        &self,
        _chain: ChainId,
        registration: &SessionRegistration,
    ) -> Result<bool> {
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(Error::Transport("session service unavailable".into()));
        }
        if self.decline_registration.load(Ordering::SeqCst) {
            return Ok(false);
        }

        debug!(
            provider = %registration.provider,
            session_key = %registration.session_key,
            "Simulated session registration"
        );
        self.registrations.lock().push(registration.clone());
        Ok(true)
    }

    async fn send_user_operation(
        &self,
        chain: ChainId,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<TxHash> {
        if self.fail_submission.load(Ordering::SeqCst) {
            return Err(Error::Transport("bundler rejected UserOperation".into()));
        }
        if user_op.signature.len() != 65 {
            return Err(Error::Transport("UserOperation is not signed".into()));
        }

        let hash = TxHash::from_bytes(&user_op.hash(entry_point, chain));
        *self.nonces.entry((chain, user_op.sender)).or_insert(0) += 1;

        // The EntryPoint runs the factory call before validation
        if user_op.init_code.len() >= 20 {
            debug!(account = %user_op.sender, "Simulated account deployment");
            self.mark_deployed(chain, user_op.sender);
        }

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_sendUserOperation",
            "params": [user_op.to_rpc_format(), entry_point.to_string()],
        });
        self.submitted.lock().push(SubmittedOperation {
            chain,
            entry_point,
            user_op: user_op.clone(),
            hash: hash.clone(),
            request,
        });
        Ok(hash)
    }
}
