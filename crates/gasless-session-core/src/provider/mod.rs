//! # Provider Adapters
//!
//! Each account-abstraction provider deploys accounts from its own factory
//! with its own init-code encoding, registers session keys its own way and
//! wraps calls in its own `execute` encoding. Those differences live behind
//! the [`ProviderAdapter`] trait; everything else (chain checks, CREATE2
//! derivation, UserOperation building, sponsorship, signing) is shared in the
//! trait's provided methods.
//!
//! Adapters are looked up by [`ProviderId`] in a [`ProviderRegistry`], so
//! adding a provider never touches dispatch call sites.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gasless_session_core::provider::{ProviderRegistry, SimulatedBundler};
//!
//! let registry = ProviderRegistry::with_default_providers(
//!     Arc::new(SimulatedBundler::new()),
//!     Sponsorship::default(),
//! );
//! let adapter = registry.get(ProviderId::ZeroDev)?;
//! let account = adapter.derive_address(&owner, ChainId::BASE)?;
//! ```

pub mod abi;
pub mod alchemy;
pub mod biconomy;
pub mod bundler;
pub mod user_op;
pub mod zerodev;

pub use alchemy::AlchemyAdapter;
pub use biconomy::BiconomyAdapter;
pub use bundler::{BundlerTransport, SessionRegistration, SimulatedBundler, SubmittedOperation};
pub use user_op::UserOperation;
pub use zerodev::ZeroDevAdapter;

use crate::address::{account_salt, create2_address};
use crate::config::Sponsorship;
use crate::session::SessionSecret;
use crate::types::{Amount, ChainId, OwnerId, ProviderId, TxHash};
use crate::{Error, Result};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Chains every bundled provider factory is deployed on
pub const DEFAULT_CHAINS: [ChainId; 7] = [
    ChainId::ETHEREUM_MAINNET,
    ChainId::ETHEREUM_SEPOLIA,
    ChainId::BASE,
    ChainId::BASE_SEPOLIA,
    ChainId::OPTIMISM,
    ChainId::ARBITRUM_ONE,
    ChainId::POLYGON,
];

/// Where a provider's account factory lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryDeployment {
    /// Account factory address (same on every supported chain)
    pub factory: Address,
    /// Chains the factory is deployed on
    pub chains: BTreeSet<ChainId>,
}

impl FactoryDeployment {
    /// Create a deployment record
    pub fn new(factory: Address, chains: impl IntoIterator<Item = ChainId>) -> Self {
        Self {
            factory,
            chains: chains.into_iter().collect(),
        }
    }

    /// Check if the factory is deployed on `chain`
    pub fn supports(&self, chain: ChainId) -> bool {
        self.chains.contains(&chain)
    }
}

/// Capability interface of an account-abstraction provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// Provider identifier
    fn id(&self) -> ProviderId;

    /// Factory deployment
    fn deployment(&self) -> &FactoryDeployment;

    /// Transport to the provider's infrastructure
    fn transport(&self) -> &Arc<dyn BundlerTransport>;

    /// Gas sponsorship settings
    fn sponsorship(&self) -> &Sponsorship;

    /// Factory call data creating an account for `signer`
    fn init_code(&self, signer: Address, salt: &[u8; 32]) -> Vec<u8>;

    /// Account call data executing `target.call{value}(data)`
    fn encode_execute(&self, target: Address, value: U256, data: &[u8]) -> Vec<u8>;

    /// Call data enabling a session key on the account
    fn encode_enable_session(
        &self,
        session_key: Address,
        spending_limit: Amount,
        valid_until: i64,
    ) -> Vec<u8>;

    /// Fail with `UnsupportedChain` unless the factory is on `chain`
    fn ensure_chain(&self, chain: ChainId) -> Result<()> {
        if self.deployment().supports(chain) {
            Ok(())
        } else {
            Err(Error::UnsupportedChain {
                chain: chain.0,
                provider: self.id().to_string(),
            })
        }
    }

    /// Counterfactual account address for `owner` on `chain`
    fn derive_address(&self, owner: &OwnerId, chain: ChainId) -> Result<Address> {
        self.ensure_chain(chain)?;
        let salt = account_salt(owner, chain, self.id().tag());
        let init_code = self.init_code(owner.signer_address(), &salt);
        Ok(create2_address(self.deployment().factory, &salt, &init_code))
    }

    /// Factory call data deploying `owner`'s account on `chain`
    fn account_init_code(&self, owner: &OwnerId, chain: ChainId) -> Result<Vec<u8>> {
        self.ensure_chain(chain)?;
        let salt = account_salt(owner, chain, self.id().tag());
        Ok(self.init_code(owner.signer_address(), &salt))
    }

    /// Whether code is deployed at `account`
    async fn is_deployed(&self, chain: ChainId, account: Address) -> Result<bool> {
        self.ensure_chain(chain)?;
        let code = self.transport().get_code(chain, account).await?;
        Ok(!code.is_empty())
    }

    /// Register a session key with the provider
    async fn create_session(
        &self,
        chain: ChainId,
        account: Address,
        session_key: Address,
        spending_limit: Amount,
        valid_until: i64,
    ) -> Result<bool> {
        self.ensure_chain(chain)?;
        let registration = SessionRegistration {
            provider: self.id(),
            account,
            session_key,
            spending_limit,
            valid_until,
            payload: self.encode_enable_session(session_key, spending_limit, valid_until),
        };
        self.transport().register_session(chain, &registration).await
    }

    /// Execute a sponsored call from `owner`'s account, signed by the
    /// session key
    ///
    /// An account without code gets the factory init code attached, so the
    /// first operation deploys it. Returns once the bundler accepted the
    /// operation; finality is not awaited.
    async fn execute(
        &self,
        chain: ChainId,
        owner: &OwnerId,
        session_secret: &SessionSecret,
        target: Address,
        value: Amount,
        call_data: &[u8],
    ) -> Result<TxHash> {
        let account = self.derive_address(owner, chain)?;
        let signing_key = session_secret.signing_key()?;
        let sponsorship = self.sponsorship();

        let nonce = self
            .transport()
            .get_nonce(chain, sponsorship.entry_point, account)
            .await?;
        let mut user_op = UserOperation::new(
            account,
            nonce,
            self.encode_execute(target, U256::from(value), call_data),
        );
        if !self.is_deployed(chain, account).await? {
            user_op = user_op.with_init_code(
                self.deployment().factory,
                self.account_init_code(owner, chain)?,
            );
        }
        if let Some(paymaster) = sponsorship.paymaster {
            user_op = user_op.with_paymaster(paymaster, vec![]);
        }
        user_op.sign(&signing_key, sponsorship.entry_point, chain)?;

        let hash = self
            .transport()
            .send_user_operation(chain, &user_op, sponsorship.entry_point)
            .await?;

        debug!(
            provider = %self.id(),
            %account,
            %target,
            sponsored = user_op.is_sponsored(),
            deploying = !user_op.init_code.is_empty(),
            tx = %hash,
            "Submitted UserOperation"
        );
        Ok(hash)
    }
}

/// Registered provider adapters, keyed by provider id
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the ZeroDev, Biconomy and Alchemy adapters
    pub fn with_default_providers(
        transport: Arc<dyn BundlerTransport>,
        sponsorship: Sponsorship,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ZeroDevAdapter::new(
            Arc::clone(&transport),
            sponsorship.clone(),
        )));
        registry.register(Arc::new(BiconomyAdapter::new(
            Arc::clone(&transport),
            sponsorship.clone(),
        )));
        registry.register(Arc::new(AlchemyAdapter::new(transport, sponsorship)));
        registry
    }

    /// Register (or replace) an adapter under its own id
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    /// Look up an adapter
    pub fn get(&self, provider: ProviderId) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or_else(|| Error::UnsupportedProvider(provider.to_string()))
    }

    /// Registered provider ids
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.adapters.keys().copied().collect();
        ids.sort();
        ids
    }
}
