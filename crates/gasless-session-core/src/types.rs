//! Core types for the session engine
//!
//! Owner identities, base-unit amounts, method selectors, chain and provider
//! identifiers, plus the serde helpers that give persisted records their
//! decimal-string / hex wire shape.

use crate::{Error, Result};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tiny_keccak::{Hasher, Keccak};

/// Amount in base units (wei, smallest token denomination)
pub type Amount = u128;

/// 4-byte function selector
pub type Selector = [u8; 4];

/// Parse a decimal-string base-unit amount
///
/// Only plain non-negative integers are accepted; anything else is
/// `InvalidAmount`.
pub fn parse_amount(value: &str) -> Result<Amount> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidAmount(value.to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| Error::InvalidAmount(value.to_string()))
}

/// Parse a `0x`-prefixed (or bare) 4-byte selector
pub fn parse_selector(value: &str) -> Result<Selector> {
    let s = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(s)?;
    bytes
        .try_into()
        .map_err(|_| Error::Deserialization(format!("Selector must be 4 bytes: {}", value)))
}

/// Selector of a Solidity function signature, e.g. `transfer(address,uint256)`
pub fn selector_of(signature: &str) -> Selector {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Parse an EVM address
pub fn parse_address(value: &str) -> Result<Address> {
    Address::from_str(value)
        .map_err(|e| Error::InvalidConfig(format!("Invalid address {}: {}", value, e)))
}

/// Compute Keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash
}

/// Identity of an account owner (wallet address, user id, email hash, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create an owner identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address that signs for this owner in account init code
    ///
    /// An identity that already is a 20-byte hex address is used as-is,
    /// any other identity maps to the last 20 bytes of its keccak256 hash.
    pub fn signer_address(&self) -> Address {
        if self.0.len() == 42 && self.0.starts_with("0x") {
            if let Ok(address) = Address::from_str(&self.0) {
                return address;
            }
        }
        let hash = keccak256(self.0.as_bytes());
        Address::from_slice(&hash[12..])
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OwnerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Blockchain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const ETHEREUM_MAINNET: ChainId = ChainId(1);
    pub const ETHEREUM_SEPOLIA: ChainId = ChainId(11155111);
    pub const ARBITRUM_ONE: ChainId = ChainId(42161);
    pub const OPTIMISM: ChainId = ChainId(10);
    pub const BASE: ChainId = ChainId(8453);
    pub const BASE_SEPOLIA: ChainId = ChainId(84532);
    pub const POLYGON: ChainId = ChainId(137);

    /// Get the name for this chain
    pub fn name(&self) -> &'static str {
        match self.0 {
            1 => "Ethereum Mainnet",
            11155111 => "Ethereum Sepolia",
            42161 => "Arbitrum One",
            10 => "Optimism",
            8453 => "Base",
            84532 => "Base Sepolia",
            137 => "Polygon",
            _ => "Unknown Chain",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId(id)
    }
}

/// Account-abstraction provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// ZeroDev Kernel accounts
    ZeroDev,
    /// Biconomy smart accounts
    Biconomy,
    /// Alchemy light accounts
    Alchemy,
}

impl ProviderId {
    /// Tag mixed into the derivation salt
    pub fn tag(&self) -> &'static str {
        match self {
            ProviderId::ZeroDev => "zerodev",
            ProviderId::Biconomy => "biconomy",
            ProviderId::Alchemy => "alchemy",
        }
    }

    /// Get all providers
    pub fn all() -> [ProviderId; 3] {
        [ProviderId::ZeroDev, ProviderId::Biconomy, ProviderId::Alchemy]
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zerodev" => Ok(ProviderId::ZeroDev),
            "biconomy" => Ok(ProviderId::Biconomy),
            "alchemy" => Ok(ProviderId::Alchemy),
            _ => Err(Error::UnsupportedProvider(s.to_string())),
        }
    }
}

/// A counterfactual smart account
///
/// Derived on demand and never persisted; `is_deployed` reflects the chain
/// at the time of the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartAccountDescriptor {
    pub address: Address,
    pub owner_identity: OwnerId,
    pub chain_id: ChainId,
    pub provider_id: ProviderId,
    pub is_deployed: bool,
}

/// Handle returned for a submitted sponsored call
///
/// Finality is not tracked; the hash identifies the bundled operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHash {
    pub hash: String,
}

impl TxHash {
    /// Create a new transaction hash
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Hash from raw 32 bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::new(format!("0x{}", hex::encode(bytes)))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

/// Serde for amounts as decimal strings
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_amount(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde for optional amounts as decimal strings
pub mod option_amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(amount: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match amount {
            Some(a) => serializer.serialize_some(&a.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u128>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| super::parse_amount(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde for selector sets as lists of `0x`-prefixed hex strings
pub mod selector_list {
    use super::Selector;
    use serde::{Deserialize, Deserializer, Serializer, ser::SerializeSeq};
    use std::collections::BTreeSet;

    pub fn serialize<S>(selectors: &BTreeSet<Selector>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(selectors.len()))?;
        for selector in selectors {
            seq.serialize_element(&format!("0x{}", hex::encode(selector)))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeSet<Selector>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| super::parse_selector(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde for byte vectors as `0x`-prefixed hex
pub mod bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
