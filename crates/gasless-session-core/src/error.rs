//! Error types for session engine operations

use thiserror::Error;

/// Result type alias for session engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while deriving accounts, managing sessions or
/// enforcing spending policy
#[derive(Debug, Error)]
pub enum Error {
    // ============ Configuration Errors ============
    /// Provider identifier does not match a registered adapter
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Chain is not in the provider's supported set
    #[error("Unsupported chain {chain} for provider {provider}")]
    UnsupportedChain { chain: u64, provider: String },

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ============ Session Errors ============
    /// No active session for the owner
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session expired
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Project policy not configured
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Provider-side session registration failed
    #[error("Adapter registration failed: {0}")]
    AdapterRegistrationFailed(String),

    // ============ Policy Errors ============
    /// Target contract is outside the allow-list
    #[error("Contract not allowed: {0}")]
    ContractNotAllowed(String),

    /// Method selector is outside the allow-list
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Token is outside the project allow-list
    #[error("Token not allowed: {0}")]
    TokenNotAllowed(String),

    /// Daily cap would be exceeded
    #[error("Daily limit exceeded: limit {limit} (spent: {spent}, attempted: {attempted})")]
    DailyLimitExceeded {
        limit: u128,
        spent: u128,
        attempted: u128,
    },

    /// Monthly cap would be exceeded
    #[error("Monthly limit exceeded: limit {limit} (spent: {spent}, attempted: {attempted})")]
    MonthlyLimitExceeded {
        limit: u128,
        spent: u128,
        attempted: u128,
    },

    /// Single transaction above the per-transaction cap
    #[error("Per-transaction limit exceeded: limit {limit} (attempted: {attempted})")]
    PerTransactionLimitExceeded { limit: u128, attempted: u128 },

    /// Cooldown between transactions has not elapsed
    #[error("Cooldown active: {remaining_secs}s remaining")]
    CooldownActive { remaining_secs: u64 },

    /// Amount failed to parse or overflowed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // ============ Cryptographic Errors ============
    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Encryption/decryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    // ============ Storage Errors ============
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    // ============ Serialization Errors ============
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ============ Transport Errors ============
    /// Bundler/transport call failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Deserialization(e.to_string())
    }
}
