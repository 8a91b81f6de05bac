//! Biconomy smart accounts
//!
//! Accounts are deployed through `deployCounterFactualAccount` with the ECDSA
//! ownership module as setup module. Sessions are enabled by committing the
//! session leaf to the session-key manager's merkle root.

use super::abi::{Token, encode, encode_call};
use super::{BundlerTransport, DEFAULT_CHAINS, FactoryDeployment, ProviderAdapter};
use crate::config::Sponsorship;
use crate::types::{Amount, ProviderId, keccak256};
use alloy_primitives::{Address, U256, address};
use std::sync::Arc;

/// Smart account factory
pub const ACCOUNT_FACTORY: Address = address!("000000a56Aaca3e9a4C479ea6b6CD0DbcB6634F5");

/// ECDSA ownership module
pub const OWNERSHIP_MODULE: Address = address!("0000001c5b32F37F5beA87BDD5374eB2aC54eA8e");

/// Session validation module bounding value per session
pub const SESSION_VALIDATION_MODULE: Address =
    address!("000000D50C68705bd6897B2d17c7de32FB519fDA");

/// Biconomy adapter
#[derive(Debug)]
pub struct BiconomyAdapter {
    deployment: FactoryDeployment,
    transport: Arc<dyn BundlerTransport>,
    sponsorship: Sponsorship,
}

impl BiconomyAdapter {
    /// Create an adapter on the default chains
    pub fn new(transport: Arc<dyn BundlerTransport>, sponsorship: Sponsorship) -> Self {
        Self {
            deployment: FactoryDeployment::new(ACCOUNT_FACTORY, DEFAULT_CHAINS),
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

impl ProviderAdapter for BiconomyAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Biconomy
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
        let setup = encode_call("initForSmartAccount(address)", &[Token::Address(signer)]);
        encode_call(
            "deployCounterFactualAccount(address,bytes,uint256)",
            &[
                Token::Address(OWNERSHIP_MODULE),
                Token::Bytes(setup),
                Token::Uint(U256::from_be_bytes(*salt)),
            ],
        )
    }

    fn encode_execute(&self, target: Address, value: U256, data: &[u8]) -> Vec<u8> {
        encode_call(
            "execute_ncC(address,uint256,bytes)",
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
        // sessionKeyData = abi.encodePacked(sessionKey, maxValue)
        let mut session_key_data = session_key.to_vec();
        session_key_data.extend_from_slice(&U256::from(spending_limit).to_be_bytes::<32>());

        let leaf = keccak256(&encode(&[
            Token::Uint(U256::from(valid_until.max(0) as u64)),
            Token::Uint(U256::ZERO),
            Token::Address(SESSION_VALIDATION_MODULE),
            Token::Bytes(session_key_data),
        ]));
        encode_call("setMerkleRoot(bytes32)", &[Token::FixedBytes(leaf)])
    }
}
