//! Counterfactual account address derivation
//!
//! Every provider deploys accounts through a factory with CREATE2, so an
//! account address is known before deployment:
//!
//! ```text
//! salt     = keccak256(owner || chainId (u64 BE) || providerTag)
//! initCode = provider-specific factory call data
//! address  = keccak256(0xff || factory || salt || keccak256(initCode))[12..]
//! ```
//!
//! Derivation is pure: no I/O, no randomness.

use crate::provider::ProviderRegistry;
use crate::types::{ChainId, OwnerId, ProviderId, keccak256};
use crate::Result;
use alloy_primitives::Address;
use std::sync::Arc;
use tiny_keccak::{Hasher, Keccak};

/// Salt binding an account to its owner, chain and provider
pub fn account_salt(owner: &OwnerId, chain: ChainId, provider_tag: &str) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(owner.as_str().as_bytes());
    hasher.update(&chain.0.to_be_bytes());
    hasher.update(provider_tag.as_bytes());
    let mut salt = [0u8; 32];
    hasher.finalize(&mut salt);
    salt
}

/// CREATE2 address for `factory`, `salt` and `init_code`
pub fn create2_address(factory: Address, salt: &[u8; 32], init_code: &[u8]) -> Address {
    let init_code_hash = keccak256(init_code);

    let mut hasher = Keccak::v256();
    hasher.update(&[0xff]);
    hasher.update(factory.as_slice());
    hasher.update(salt);
    hasher.update(&init_code_hash);

    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);

    // Take last 20 bytes
    Address::from_slice(&hash[12..])
}

/// Derives account addresses through the registered provider adapters
#[derive(Debug, Clone)]
pub struct AddressDerivationService {
    registry: Arc<ProviderRegistry>,
}

impl AddressDerivationService {
    /// Create a derivation service over a provider registry
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Deterministic account address for `(owner, chain, provider)`
    ///
    /// Fails with `UnsupportedProvider` when no adapter is registered for
    /// `provider`, and `UnsupportedChain` when the adapter's factory is not
    /// deployed on `chain`.
    pub fn derive_address(
        &self,
        owner: &OwnerId,
        chain: ChainId,
        provider: ProviderId,
    ) -> Result<Address> {
        self.registry.get(provider)?.derive_address(owner, chain)
    }
}
