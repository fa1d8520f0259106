//! Error types for the bridge relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Chain connection error for chain {chain}: {message}")]
    ChainConnection { chain: String, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Invalid swap data for {swap_id}: {message}")]
    InvalidSwap { swap_id: String, message: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Gas price error for chain {chain}: {message}")]
    GasPrice { chain: String, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Chain {chain} not found")]
    ChainNotFound { chain: String },

    #[error("Transaction {tx_hash} not found")]
    TransactionNotFound { tx_hash: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable on the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainConnection { .. }
                | RelayerError::Timeout { .. }
                | RelayerError::Database(_)
                | RelayerError::Store(_)
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
