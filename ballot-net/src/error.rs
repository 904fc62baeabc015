//! Error types for the peer protocol

use ballot_ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("No registered peer {0}")]
    NoPeer(String),

    #[error("No forger available")]
    NoForger,

    #[error("Peer {0} timed out")]
    PeerTimeout(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Outbound queue full, peer writer is stuck")]
    QueueFull,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Ledger error: {0}")]
    LedgerError(#[from] LedgerError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl NetError {
    /// Stable code carried in `error` pongs.
    pub fn code(&self) -> &'static str {
        match self {
            NetError::Unauthorized(_) => "Unauthorized",
            NetError::NoPeer(_) => "NoPeer",
            NetError::NoForger => "NoForger",
            NetError::PeerTimeout(_) => "PeerTimeout",
            NetError::ConnectionClosed => "ConnectionClosed",
            NetError::QueueFull => "QueueFull",
            NetError::BadRequest(_) | NetError::SerializationError(_) => "BadRequest",
            NetError::LedgerError(LedgerError::InvalidBlock(_)) => "InvalidBlock",
            NetError::LedgerError(LedgerError::InsufficientVotes) => "InsufficientVotes",
            NetError::LedgerError(_) => "StorageFailure",
            NetError::IoError(_) => "ConnectionError",
        }
    }
}
