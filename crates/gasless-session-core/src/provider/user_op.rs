//! ERC-4337 UserOperation (v0.6 format)

use super::abi::{Token, encode};
use crate::types::{ChainId, bytes_hex, keccak256};
use crate::{Error, Result};
use alloy_primitives::{Address, U256};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

/// ERC-4337 UserOperation (v0.6 format)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    /// Smart account address
    pub sender: Address,
    /// Anti-replay nonce
    pub nonce: U256,
    /// Account initialization code (empty if account exists)
    #[serde(with = "bytes_hex")]
    pub init_code: Vec<u8>,
    /// Encoded call to execute
    #[serde(with = "bytes_hex")]
    pub call_data: Vec<u8>,
    /// Gas for the inner call
    pub call_gas_limit: U256,
    /// Gas for verification (and account creation)
    pub verification_gas_limit: U256,
    /// Pre-verification gas
    pub pre_verification_gas: U256,
    /// Maximum fee per gas
    pub max_fee_per_gas: U256,
    /// Maximum priority fee per gas
    pub max_priority_fee_per_gas: U256,
    /// Paymaster and data (empty if self-paying)
    #[serde(with = "bytes_hex")]
    pub paymaster_and_data: Vec<u8>,
    /// Signature
    #[serde(with = "bytes_hex")]
    pub signature: Vec<u8>,
}

impl UserOperation {
    /// Create a new UserOperation
    pub fn new(sender: Address, nonce: U256, call_data: Vec<u8>) -> Self {
        Self {
            sender,
            nonce,
            init_code: vec![],
            call_data,
            call_gas_limit: U256::from(100000),
            verification_gas_limit: U256::from(100000),
            pre_verification_gas: U256::from(21000),
            max_fee_per_gas: U256::ZERO,
            max_priority_fee_per_gas: U256::ZERO,
            paymaster_and_data: vec![],
            signature: vec![],
        }
    }

    /// Set init code for account deployment
    pub fn with_init_code(mut self, factory: Address, init_data: Vec<u8>) -> Self {
        let mut init_code = factory.to_vec();
        init_code.extend(init_data);
        self.init_code = init_code;
        self
    }

    /// Sponsor gas through a paymaster
    pub fn with_paymaster(mut self, paymaster: Address, data: Vec<u8>) -> Self {
        let mut paymaster_and_data = paymaster.to_vec();
        paymaster_and_data.extend(data);
        self.paymaster_and_data = paymaster_and_data;
        self
    }

    /// Whether gas is paid by a paymaster
    pub fn is_sponsored(&self) -> bool {
        self.paymaster_and_data.len() >= 20
    }

    /// UserOperation hash as computed by the EntryPoint
    ///
    /// `keccak256(abi.encode(keccak256(pack(op)), entryPoint, chainId))`
    pub fn hash(&self, entry_point: Address, chain: ChainId) -> [u8; 32] {
        let inner = keccak256(&self.pack_for_hash());
        keccak256(&encode(&[
            Token::FixedBytes(inner),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain.0)),
        ]))
    }

    fn pack_for_hash(&self) -> Vec<u8> {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code)),
            Token::FixedBytes(keccak256(&self.call_data)),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data)),
        ])
    }

    /// Sign the operation hash (EIP-191 personal message) with a session key
    ///
    /// Signature layout is `r || s || v` with `v = 27 + recovery_id`.
    pub fn sign(&mut self, key: &SigningKey, entry_point: Address, chain: ChainId) -> Result<()> {
        let hash = self.hash(entry_point, chain);

        let mut message = b"\x19Ethereum Signed Message:\n32".to_vec();
        message.extend_from_slice(&hash);
        let digest = keccak256(&message);

        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| Error::Crypto(format!("Failed to sign UserOperation: {}", e)))?;

        let mut sig_bytes = Vec::with_capacity(65);
        sig_bytes.extend_from_slice(&signature.to_bytes());
        sig_bytes.push(27 + recovery_id.to_byte());
        self.signature = sig_bytes;
        Ok(())
    }

    /// `eth_sendUserOperation` parameter object
    pub fn to_rpc_format(&self) -> serde_json::Value {
        serde_json::json!({
            "sender": self.sender.to_string(),
            "nonce": format!("0x{:x}", self.nonce),
            "initCode": format!("0x{}", hex::encode(&self.init_code)),
            "callData": format!("0x{}", hex::encode(&self.call_data)),
            "callGasLimit": format!("0x{:x}", self.call_gas_limit),
            "verificationGasLimit": format!("0x{:x}", self.verification_gas_limit),
            "preVerificationGas": format!("0x{:x}", self.pre_verification_gas),
            "maxFeePerGas": format!("0x{:x}", self.max_fee_per_gas),
            "maxPriorityFeePerGas": format!("0x{:x}", self.max_priority_fee_per_gas),
            "paymasterAndData": format!("0x{}", hex::encode(&self.paymaster_and_data)),
            "signature": format!("0x{}", hex::encode(&self.signature)),
        })
    }
}
