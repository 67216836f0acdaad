//! Error types for the obfuscation core

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the obfuscation core
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (fatal at startup, never at runtime)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    // Wallet pool errors
    #[error("Wallet pool exhausted for network {network}: {eligible} eligible of {total} wallets")]
    WalletPoolExhausted {
        network: String,
        eligible: usize,
        total: usize,
    },

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Unknown reservation: {0}")]
    UnknownReservation(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    // Parameterization errors
    #[error("Invalid parameter bounds: {0}")]
    InvalidParameterBounds(String),

    // Advisor errors (recovered locally, never surfaced from decide)
    #[error("Advisor timed out after {0}ms")]
    AdvisorTimeout(u64),

    #[error("Advisor unavailable: {0}")]
    AdvisorUnavailable(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is fatal for the current decide call.
    ///
    /// A fatal error means no transaction should be attempted; the caller
    /// must pause or reconfigure rather than retry blindly.
    pub fn is_fatal_for_call(&self) -> bool {
        matches!(
            self,
            Error::WalletPoolExhausted { .. } | Error::InvalidParameterBounds(_)
        )
    }

    /// Check if this error is recovered internally by the rule-based
    /// fallback and must never reach a `decide` caller.
    pub fn is_advisor_failure(&self) -> bool {
        matches!(self, Error::AdvisorTimeout(_) | Error::AdvisorUnavailable(_))
    }

    /// Check if this error indicates bad static configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::UnknownProfile(_))
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
