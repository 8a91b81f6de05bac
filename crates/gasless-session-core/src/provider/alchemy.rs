//! Alchemy light accounts
//!
//! Single-owner accounts created with `createAccount(owner, salt)`; session
//! keys are added directly on the account.

use super::abi::{Token, encode_call};
use super::{BundlerTransport, DEFAULT_CHAINS, FactoryDeployment, ProviderAdapter};
use crate::config::Sponsorship;
use crate::types::{Amount, ProviderId};
use alloy_primitives::{Address, U256, address};
use std::sync::Arc;

/// Light account factory
pub const LIGHT_ACCOUNT_FACTORY: Address = address!("00004EC70002a32400f8ae005A26081065620D20");

/// Alchemy light-account adapter
#[derive(Debug)]
pub struct AlchemyAdapter {
    deployment: FactoryDeployment,
    transport: Arc<dyn BundlerTransport>,
    sponsorship: Sponsorship,
}

impl AlchemyAdapter {
    /// Create an adapter on the default chains
    pub fn new(transport: Arc<dyn BundlerTransport>, sponsorship: Sponsorship) -> Self {
        Self {
            deployment: FactoryDeployment::new(LIGHT_ACCOUNT_FACTORY, DEFAULT_CHAINS),
            transport,
            sponsorship,
        }
    }

    /// Override the factory deployment
    pub fn with_deployment(mut self, deployment: FactoryDeployment) -> Self {
        self.deployment = deployment;
        self
    }
}

impl ProviderAdapter for AlchemyAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Alchemy
    }

    fn deployment(&self) -> &FactoryDeployment {
        &self.deployment
    }

    fn transport(&self) -> &Arc<dyn BundlerTransport> {
        &self.transport
    }

    fn sponsorship(&self) -> &Sponsorship {
        &self.sponsorship
    }

    fn init_code(&self, signer: Address, salt: &[u8; 32]) -> Vec<u8> {
        encode_call(
            "createAccount(address,uint256)",
            &[Token::Address(signer), Token::Uint(U256::from_be_bytes(*salt))],
        )
    }

    fn encode_execute(&self, target: Address, value: U256, data: &[u8]) -> Vec<u8> {
        encode_call(
            "execute(address,uint256,bytes)",
            &[
                Token::Address(target),
                Token::Uint(value),
                Token::Bytes(data.to_vec()),
            ],
        )
    }

    fn encode_enable_session(
        &self,
        session_key: Address,
        spending_limit: Amount,
        valid_until: i64,
    ) -> Vec<u8> {
        encode_call(
            "addSessionKey(address,uint48,uint256)",
            &[
                Token::Address(session_key),
                Token::Uint(U256::from(valid_until.max(0) as u64)),
                Token::Uint(U256::from(spending_limit)),
            ],
        )
    }
}
