//! Ballot Core - Wallets and signing for the electoral ledger
//!
//! This crate provides the keypair handling shared by every participant:
//! PEM key import, P-256 ECDSA signatures over a canonical encoding,
//! public-key hashing and base58 addresses.

pub mod codec;
pub mod error;
pub mod keyfiles;
pub mod wallet;

pub use error::WalletError;
pub use keyfiles::{KeyFiles, import_multiple, scan_key_directory, scan_public_keys};
pub use wallet::{
    Signable, Wallet, extract_public_key_hash, hashed_public_key, pkh_address, verify,
};

/// Result type for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;

/// Length in bytes of a hashed public key
pub const PUBLIC_KEY_HASH_LEN: usize = 20;

/// Version byte prepended to addresses
pub const ADDRESS_VERSION: u8 = 0x00;
