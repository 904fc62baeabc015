//! Error types for wallet operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Bad key material: {0}")]
    BadKey(String),

    #[error("Bad address: {0}")]
    BadAddress(String),

    #[error("Cryptographic operation failed: {0}")]
    CryptoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
