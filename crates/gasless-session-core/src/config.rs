//! Engine configuration
//!
//! Everything the engine needs to know about its deployment (active
//! provider, chain, session defaults, sponsorship) arrives through
//! [`EngineConfig`]. Services hold a [`ConfigHandle`] and take a fresh
//! snapshot per operation, so an operator can switch the active provider
//! without rebuilding the engine.

use crate::types::{Amount, ChainId, ProviderId, Selector, amount_string, selector_list};
use crate::{Error, Result};
use alloy_primitives::{Address, address};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// ERC-4337 EntryPoint v0.6 address (same on most chains)
pub const ENTRY_POINT_V06: Address = address!("5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");

/// Default session lifetime (30 minutes)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 1800;

/// Default per-session daily spending limit (0.1 ETH in wei)
pub const DEFAULT_SPENDING_LIMIT: Amount = 100_000_000_000_000_000;

/// Demo ERC-20 the default session may call
pub const DEMO_TOKEN_CONTRACT: Address = address!("036CbD53842c5426634e7929541eC2318f3dCF7e");

/// Demo collectible contract the default session may call
pub const DEMO_COLLECTIBLE_CONTRACT: Address =
    address!("1D0c1A3F5A3a5A3b4C2b5c9E9dB1f0E2d7c2A9a1");

/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: Selector = [0xa9, 0x05, 0x9c, 0xbb];

/// `approve(address,uint256)`
pub const APPROVE_SELECTOR: Selector = [0x09, 0x5e, 0xa7, 0xb3];

/// What to do when provider-side session registration fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Delete the local record and surface `AdapterRegistrationFailed`
    #[default]
    Rollback,
    /// Log the failure and keep the local session
    BestEffort,
}

/// Gas sponsorship settings shared by every adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sponsorship {
    /// EntryPoint contract address
    pub entry_point: Address,
    /// Paymaster paying gas on the user's behalf
    pub paymaster: Option<Address>,
}

impl Default for Sponsorship {
    fn default() -> Self {
        Self {
            entry_point: ENTRY_POINT_V06,
            paymaster: None,
        }
    }
}

impl Sponsorship {
    /// Sponsor through a paymaster
    pub fn with_paymaster(mut self, paymaster: Address) -> Self {
        self.paymaster = Some(paymaster);
        self
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Provider new sessions and accounts are bound to
    pub active_provider: ProviderId,
    /// Chain accounts are derived for
    pub chain_id: ChainId,
    /// Session lifetime in seconds
    pub session_ttl_secs: u64,
    /// Daily spending limit attached to new sessions
    #[serde(with = "amount_string")]
    pub default_spending_limit: Amount,
    /// Contracts new sessions may call
    pub default_allowed_contracts: BTreeSet<Address>,
    /// Method selectors new sessions may call
    #[serde(with = "selector_list")]
    pub default_allowed_selectors: BTreeSet<Selector>,
    /// Handling of failed provider registration
    #[serde(default)]
    pub registration_policy: RegistrationPolicy,
    /// Gas sponsorship
    #[serde(default)]
    pub sponsorship: Sponsorship,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            active_provider: ProviderId::ZeroDev,
            chain_id: ChainId::BASE_SEPOLIA,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            default_spending_limit: DEFAULT_SPENDING_LIMIT,
            default_allowed_contracts: [DEMO_TOKEN_CONTRACT, DEMO_COLLECTIBLE_CONTRACT]
                .into_iter()
                .collect(),
            default_allowed_selectors: [TRANSFER_SELECTOR, APPROVE_SELECTOR]
                .into_iter()
                .collect(),
            registration_policy: RegistrationPolicy::Rollback,
            sponsorship: Sponsorship::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the active provider
    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.active_provider = provider;
        self
    }

    /// Set the chain
    pub fn with_chain(mut self, chain: ChainId) -> Self {
        self.chain_id = chain;
        self
    }

    /// Set session lifetime
    pub fn with_session_ttl(mut self, secs: u64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    /// Set the default daily spending limit
    pub fn with_spending_limit(mut self, limit: Amount) -> Self {
        self.default_spending_limit = limit;
        self
    }

    /// Replace the default contract allow-list
    pub fn with_allowed_contracts(mut self, contracts: impl IntoIterator<Item = Address>) -> Self {
        self.default_allowed_contracts = contracts.into_iter().collect();
        self
    }

    /// Replace the default selector allow-list
    pub fn with_allowed_selectors(
        mut self,
        selectors: impl IntoIterator<Item = Selector>,
    ) -> Self {
        self.default_allowed_selectors = selectors.into_iter().collect();
        self
    }

    /// Set registration failure handling
    pub fn with_registration_policy(mut self, policy: RegistrationPolicy) -> Self {
        self.registration_policy = policy;
        self
    }

    /// Set gas sponsorship
    pub fn with_sponsorship(mut self, sponsorship: Sponsorship) -> Self {
        self.sponsorship = sponsorship;
        self
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl_secs == 0 {
            return Err(Error::InvalidConfig("Session TTL must be positive".into()));
        }
        if self.sponsorship.entry_point == Address::ZERO {
            return Err(Error::InvalidConfig("EntryPoint address is zero".into()));
        }
        Ok(())
    }
}

/// Shared, swappable configuration
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<EngineConfig>>,
}

impl ConfigHandle {
    /// Wrap a validated config
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> EngineConfig {
        self.inner.read().clone()
    }

    /// Replace the configuration
    pub fn update(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        *self.inner.write() = config;
        Ok(())
    }
}
