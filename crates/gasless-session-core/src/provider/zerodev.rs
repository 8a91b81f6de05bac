//! ZeroDev Kernel accounts
//!
//! Accounts are created through the Kernel factory with an ECDSA validator
//! as root, session keys are enabled on the session-key validator, and calls
//! go through `execute(address,uint256,bytes,uint8)` with call operation 0.

use super::abi::{Token, encode, encode_call};
use super::{BundlerTransport, DEFAULT_CHAINS, FactoryDeployment, ProviderAdapter};
use crate::config::Sponsorship;
use crate::types::{Amount, ProviderId};
use alloy_primitives::{Address, U256, address};
use std::sync::Arc;

/// Kernel account factory
pub const KERNEL_FACTORY: Address = address!("5de4839a76cf55d0c90e2061ef4386d962E15ae3");

/// Kernel account implementation
pub const KERNEL_IMPLEMENTATION: Address = address!("0DA6a956B9488eD4dd761E59f52FDc6c8068E6B5");

/// ECDSA root validator
pub const ECDSA_VALIDATOR: Address = address!("d9AB5096a832b9ce79914329DAEE236f8Eea0390");

/// ZeroDev Kernel adapter
#[derive(Debug)]
pub struct ZeroDevAdapter {
    deployment: FactoryDeployment,
    transport: Arc<dyn BundlerTransport>,
    sponsorship: Sponsorship,
}

impl ZeroDevAdapter {
    /// Create an adapter on the default chains
    pub fn new(transport: Arc<dyn BundlerTransport>, sponsorship: Sponsorship) -> Self {
        Self {
            deployment: FactoryDeployment::new(KERNEL_FACTORY, DEFAULT_CHAINS),
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

impl ProviderAdapter for ZeroDevAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::ZeroDev
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
        let initialize = encode_call(
            "initialize(address,bytes)",
            &[
                Token::Address(ECDSA_VALIDATOR),
                Token::Bytes(signer.to_vec()),
            ],
        );
        encode_call(
            "createAccount(address,bytes,uint256)",
            &[
                Token::Address(KERNEL_IMPLEMENTATION),
                Token::Bytes(initialize),
                Token::Uint(U256::from_be_bytes(*salt)),
            ],
        )
    }

    fn encode_execute(&self, target: Address, value: U256, data: &[u8]) -> Vec<u8> {
        encode_call(
            "execute(address,uint256,bytes,uint8)",
            &[
                Token::Address(target),
                Token::Uint(value),
                Token::Bytes(data.to_vec()),
                Token::Uint(U256::ZERO),
            ],
        )
    }

    fn encode_enable_session(
        &self,
        session_key: Address,
        spending_limit: Amount,
        valid_until: i64,
    ) -> Vec<u8> {
        let enable_data = encode(&[
            Token::Address(session_key),
            Token::Uint(U256::ZERO),
            Token::Uint(U256::from(valid_until.max(0) as u64)),
            Token::Uint(U256::from(spending_limit)),
        ]);
        encode_call("enable(bytes)", &[Token::Bytes(enable_data)])
    }
}
