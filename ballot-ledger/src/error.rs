//! Error types for the ledger

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not enough votes available")]
    InsufficientVotes,

    #[error("Balance too small to back a stake")]
    CantForge,

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Blockchain is already initialized")]
    AlreadyInitialized,

    #[error("Referenced unspent output not found")]
    UtxoNotFound,

    #[error("Wallet error: {0}")]
    WalletError(#[from] ballot_core::WalletError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage failure: {0}")]
    StorageFailure(String),
}
