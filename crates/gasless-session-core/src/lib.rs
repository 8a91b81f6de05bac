//! # Gasless Session Core
//!
//! Session keys and spending limits for sponsored smart-contract accounts.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Address Derivation**: CREATE2 counterfactual account addresses per owner, chain and provider
//! - **Provider Adapters**: ZeroDev, Biconomy and Alchemy behind one trait, looked up in a registry
//! - **Session Keys**: short-lived secp256k1 keys, one active per owner, lazily expired
//! - **Spending Limits**: per-session and per-project caps with atomic reservation
//! - **Session Storage**: in-memory and sealed on-disk session records
//! - **Events**: lifecycle transitions on a broadcast channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gasless_session_core::{EngineConfig, OwnerId, SessionEngine};
//! use gasless_session_core::provider::SimulatedBundler;
//! use gasless_session_core::store::MemorySessionStore;
//!
//! let engine = SessionEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(MemorySessionStore::new()),
//!     Arc::new(SimulatedBundler::new()),
//! )?;
//!
//! let owner = OwnerId::new("user@example.com");
//! let account = engine.account(&owner).await?;
//! let session = engine.create_session(&owner).await?;
//!
//! // Reserved against the session's daily limit before submission
//! let tx = engine.execute(&owner, token, amount, &call_data).await?;
//! ```
//!
//! ## Security Model
//!
//! - Session private keys never leave the engine; callers get a [`SessionHandle`]
//! - Records on disk are sealed with ChaCha20-Poly1305
//! - Validate and record run under a per-owner lock, so concurrent spends
//!   never push an owner past the daily limit

pub mod address;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod provider;
pub mod session;
pub mod spending;
pub mod store;
pub mod types;

pub use address::AddressDerivationService;
pub use alloy_primitives::{Address, U256};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigHandle, EngineConfig, RegistrationPolicy, Sponsorship};
pub use engine::SessionEngine;
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus, EventEnvelope, SpendScope};
pub use provider::{ProviderAdapter, ProviderRegistry};
pub use session::{SessionHandle, SessionKey, SessionKeyManager, SessionSecret};
pub use spending::{
    Denial, DenialReason, ProjectUsage, Reservation, SpendingLimitEnforcer, SpendingPolicy,
    ValidationResult,
};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use types::{
    Amount, ChainId, OwnerId, ProviderId, Selector, SmartAccountDescriptor, TxHash, keccak256,
    parse_amount,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
