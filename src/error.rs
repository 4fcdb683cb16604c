//! Error types for the forwarder agent

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the forwarder agent
#[derive(Error, Debug)]
pub enum Error {
    // Destination lifecycle errors
    #[error("AlreadyBound: destination is already set")]
    AlreadyBound,

    #[error("DestinationUnset: destination has not been set")]
    DestinationUnset,

    // Validation errors
    #[error("InvalidAddress: destination cannot be the zero address")]
    InvalidAddress,

    #[error("InvalidTokenAddress: token cannot be the zero address")]
    InvalidTokenAddress,

    // Precondition errors
    #[error("NothingToFlush: balance is zero")]
    NothingToFlush,

    // Downstream errors
    #[error("TransferFailed: destination did not accept the transfer")]
    TransferFailed,

    #[error("Token transfer failed: {0}")]
    TokenTransfer(String),

    #[error("Token transfer rejected by token ledger")]
    TokenTransferRejected,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    // Local state errors
    #[error("State persistence failed: {0}")]
    StatePersistence(String),

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
    /// Check if this error is one of the agent's own reverts
    pub fn is_forwarder_revert(&self) -> bool {
        matches!(
            self,
            Error::AlreadyBound
                | Error::DestinationUnset
                | Error::InvalidAddress
                | Error::InvalidTokenAddress
                | Error::NothingToFlush
                | Error::TransferFailed
        )
    }

    /// Check if this error may clear up on its own (caller decides whether to retry)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransferFailed
                | Error::TokenTransfer(_)
                | Error::TokenTransferRejected
                | Error::Rpc(_)
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
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
