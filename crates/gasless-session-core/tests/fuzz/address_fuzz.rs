//! Fuzz tests for address derivation
//!
//! Arbitrary owner identities must derive deterministically and never
//! collide across providers or chains.

use gasless_session_core::address::AddressDerivationService;
use gasless_session_core::config::Sponsorship;
use gasless_session_core::provider::{DEFAULT_CHAINS, ProviderRegistry, SimulatedBundler};
use gasless_session_core::{Address, ChainId, OwnerId, ProviderId};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn service() -> AddressDerivationService {
    AddressDerivationService::new(Arc::new(ProviderRegistry::with_default_providers(
        Arc::new(SimulatedBundler::new()),
        Sponsorship::default(),
    )))
}

/// Emails, hex addresses and arbitrary unicode
fn owner_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("[a-z0-9._]{1,20}@[a-z]{2,10}\\.com").unwrap(),
        prop::string::string_regex("0x[a-fA-F0-9]{40}").unwrap(),
        any::<String>(),
    ]
}

fn chain_strategy() -> impl Strategy<Value = ChainId> {
    prop::sample::select(DEFAULT_CHAINS.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Same inputs always give the same address
    #[test]
    fn derivation_is_deterministic(owner in owner_strategy(), chain in chain_strategy()) {
        let service = service();
        let owner = OwnerId::new(owner);

        for provider in ProviderId::all() {
            let first = service.derive_address(&owner, chain, provider).unwrap();
            let second = service.derive_address(&owner, chain, provider).unwrap();
            prop_assert_eq!(first, second);
            prop_assert_ne!(first, Address::ZERO);
        }
    }

    /// The three providers never share an address for one owner
    #[test]
    fn providers_never_collide(owner in owner_strategy(), chain in chain_strategy()) {
        let service = service();
        let owner = OwnerId::new(owner);

        let addresses: HashSet<Address> = ProviderId::all()
            .iter()
            .map(|p| service.derive_address(&owner, chain, *p).unwrap())
            .collect();
        prop_assert_eq!(addresses.len(), 3);
    }

    /// Distinct owners get distinct accounts
    #[test]
    fn owners_never_collide(a in owner_strategy(), b in owner_strategy()) {
        prop_assume!(a != b);
        let service = service();

        let first = service
            .derive_address(&OwnerId::new(a), ChainId::BASE, ProviderId::ZeroDev)
            .unwrap();
        let second = service
            .derive_address(&OwnerId::new(b), ChainId::BASE, ProviderId::ZeroDev)
            .unwrap();
        prop_assert_ne!(first, second);
    }

    /// Chains outside the deployment set are always rejected
    #[test]
    fn unknown_chains_rejected(owner in owner_strategy(), chain in any::<u64>()) {
        let chain = ChainId(chain);
        prop_assume!(!DEFAULT_CHAINS.contains(&chain));

        for provider in ProviderId::all() {
            prop_assert!(service().derive_address(&OwnerId::new(owner.clone()), chain, provider).is_err());
        }
    }
}
