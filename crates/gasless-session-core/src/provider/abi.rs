//! Minimal Solidity ABI encoding for factory and account calls

use crate::types::selector_of;
use alloy_primitives::{Address, U256};

/// A single ABI argument
#[derive(Debug, Clone)]
pub enum Token {
    /// `address`
    Address(Address),
    /// Any `uintN` (left-padded to 32 bytes)
    Uint(U256),
    /// `bytes32`
    FixedBytes([u8; 32]),
    /// Dynamic `bytes`
    Bytes(Vec<u8>),
}

/// `abi.encode(tokens...)`
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = 32 * tokens.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Address(address) => {
                head.extend_from_slice(&[0u8; 12]);
                head.extend_from_slice(address.as_slice());
            }
            Token::Uint(value) => head.extend_from_slice(&value.to_be_bytes::<32>()),
            Token::FixedBytes(bytes) => head.extend_from_slice(bytes),
            Token::Bytes(data) => {
                // offset of this element's tail, then (length, padded data)
                let offset = head_len + tail.len();
                head.extend_from_slice(&U256::from(offset).to_be_bytes::<32>());
                tail.extend_from_slice(&U256::from(data.len()).to_be_bytes::<32>());
                tail.extend_from_slice(data);
                let padding = (32 - (data.len() % 32)) % 32;
                tail.extend(std::iter::repeat_n(0u8, padding));
            }
        }
    }

    head.extend(tail);
    head
}

/// Selector of `signature` followed by `abi.encode(tokens...)`
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut encoded = selector_of(signature).to_vec();
    encoded.extend(encode(tokens));
    encoded
}
