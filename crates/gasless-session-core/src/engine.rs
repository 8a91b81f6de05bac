//! Engine facade
//!
//! [`SessionEngine`] wires configuration, the provider registry, the session
//! store, the session manager and the spending enforcer together, and is what
//! a service layer holds on to.

use crate::address::AddressDerivationService;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigHandle, EngineConfig};
use crate::events::{EngineEvent, EventBus, EventEnvelope};
use crate::provider::{BundlerTransport, ProviderRegistry};
use crate::session::{SessionHandle, SessionKey, SessionKeyManager};
use crate::spending::SpendingLimitEnforcer;
use crate::store::SessionStore;
use crate::types::{
    Amount, ChainId, OwnerId, ProviderId, Selector, SmartAccountDescriptor, TxHash,
};
use crate::{Error, Result};
use alloy_primitives::Address;
use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Session-key and spending-policy engine
pub struct SessionEngine {
    config: ConfigHandle,
    registry: Arc<ProviderRegistry>,
    addresses: AddressDerivationService,
    sessions: Arc<SessionKeyManager>,
    spending: SpendingLimitEnforcer,
    events: EventBus,
    clock: Arc<dyn Clock>,
    announced: DashSet<(OwnerId, ChainId, ProviderId)>,
}

impl SessionEngine {
    /// Create an engine with the bundled providers and the wall clock
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn BundlerTransport>,
    ) -> Result<Self> {
        Self::with_clock(config, store, transport, Arc::new(SystemClock))
    }

    /// Create an engine with the bundled providers and a custom clock
    pub fn with_clock(
        config: EngineConfig,
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn BundlerTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let registry =
            ProviderRegistry::with_default_providers(transport, config.sponsorship.clone());
        Self::with_registry(config, store, registry, clock)
    }

    /// Create an engine over an explicit provider registry
    pub fn with_registry(
        config: EngineConfig,
        store: Arc<dyn SessionStore>,
        registry: ProviderRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let config = ConfigHandle::new(config)?;
        let registry = Arc::new(registry);
        let events = EventBus::default();

        let sessions = Arc::new(SessionKeyManager::new(
            config.clone(),
            Arc::clone(&registry),
            store,
            Arc::clone(&clock),
            events.clone(),
        ));
        let spending = SpendingLimitEnforcer::new(Arc::clone(&sessions));

        info!(providers = ?registry.providers(), "Session engine ready");

        Ok(Self {
            config,
            addresses: AddressDerivationService::new(Arc::clone(&registry)),
            registry,
            sessions,
            spending,
            events,
            clock,
            announced: DashSet::new(),
        })
    }

    /// Current configuration
    pub fn config(&self) -> EngineConfig {
        self.config.snapshot()
    }

    /// Replace the configuration; later operations read the new values
    ///
    /// Sponsorship settings are bound to adapters at construction and are
    /// not affected.
    pub fn update_config(&self, config: EngineConfig) -> Result<()> {
        self.config.update(config)?;
        info!("Engine configuration updated");
        Ok(())
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionKeyManager> {
        &self.sessions
    }

    pub fn spending(&self) -> &SpendingLimitEnforcer {
        &self.spending
    }

    /// Deterministic account address for any provider and chain
    pub fn derive_address(
        &self,
        owner: &OwnerId,
        chain: ChainId,
        provider: ProviderId,
    ) -> Result<Address> {
        self.addresses.derive_address(owner, chain, provider)
    }

    /// Owner's account under the active provider and chain
    pub async fn account(&self, owner: &OwnerId) -> Result<SmartAccountDescriptor> {
        let config = self.config.snapshot();
        let adapter = self.registry.get(config.active_provider)?;
        let address = adapter.derive_address(owner, config.chain_id)?;
        let is_deployed = adapter.is_deployed(config.chain_id, address).await?;

        if self
            .announced
            .insert((owner.clone(), config.chain_id, config.active_provider))
        {
            self.events.publish(
                self.clock.now(),
                EngineEvent::AccountCreated {
                    owner: owner.clone(),
                    address,
                    chain_id: config.chain_id,
                    provider_id: config.active_provider,
                },
            );
        }

        Ok(SmartAccountDescriptor {
            address,
            owner_identity: owner.clone(),
            chain_id: config.chain_id,
            provider_id: config.active_provider,
            is_deployed,
        })
    }

    /// Create (or return the active) session for `owner`
    pub async fn create_session(&self, owner: &OwnerId) -> Result<SessionHandle> {
        self.sessions.create(owner).await
    }

    /// Active session for `owner`
    pub async fn get_session(&self, owner: &OwnerId) -> Result<Option<SessionHandle>> {
        Ok(self
            .sessions
            .get(owner)
            .await?
            .map(|session| session.handle(owner)))
    }

    /// Revoke `owner`'s session; always `true`
    pub async fn revoke_session(&self, owner: &OwnerId) -> Result<bool> {
        self.sessions.revoke(owner).await
    }

    /// Spend through `owner`'s session
    ///
    /// The spend is reserved against the session policy first; a denial is
    /// returned as the matching error. The operation is signed with the
    /// session the spend was reserved against, and the reservation is
    /// released if submission fails.
    pub async fn execute(
        &self,
        owner: &OwnerId,
        target: Address,
        value: Amount,
        call_data: &[u8],
    ) -> Result<TxHash> {
        let selector = selector_from_call_data(call_data);

        let reservation = self
            .spending
            .reserve(owner, target, selector, value)
            .await?
            .map_err(Error::from)?;

        match self
            .submit(owner, reservation.session(), target, value, call_data)
            .await
        {
            Ok(tx) => Ok(tx),
            Err(e) => {
                warn!(%owner, error = %e, "Execution failed, releasing reservation");
                self.spending.release(&reservation).await?;
                Err(e)
            }
        }
    }

    async fn submit(
        &self,
        owner: &OwnerId,
        session: &SessionKey,
        target: Address,
        value: Amount,
        call_data: &[u8],
    ) -> Result<TxHash> {
        let config = self.config.snapshot();
        let provider = session.provider_id.unwrap_or(config.active_provider);
        let chain = session.chain_id.unwrap_or(config.chain_id);
        let adapter = self.registry.get(provider)?;

        let tx = adapter
            .execute(
                chain,
                owner,
                &session.private_material,
                target,
                value,
                call_data,
            )
            .await?;

        info!(
            %owner,
            %provider,
            session = %session.public_address,
            %target,
            value,
            %tx,
            "Executed sponsored call"
        );
        Ok(tx)
    }
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .field("spending", &self.spending)
            .finish_non_exhaustive()
    }
}

/// First four bytes of call data; zero for plain value transfers
fn selector_from_call_data(call_data: &[u8]) -> Selector {
    call_data
        .get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .unwrap_or([0u8; 4])
}
