//! Ballot Ledger - Transaction, UTXO and chain model
//!
//! This crate implements the value model of the voting chain: transactions
//! spending unspent outputs, blocks linking into a single chain, and the
//! verification rules applied when a forged block comes back from a peer.
//! Persistence is abstracted behind capability traits implemented by the
//! store crate.

pub mod block;
pub mod chain;
pub mod error;
pub mod party;
pub mod store;
pub mod transaction;
pub mod utxo;

pub use block::{Block, Body, Header, ZERO_HASH, verify_block};
pub use chain::{find_block, height, validate_new_block};
pub use error::LedgerError;
pub use party::Party;
pub use store::{ChainStore, Ledger, MempoolStore, OutputResolver, PartyStore, UtxoStore};
pub use transaction::{
    BASE_VOUT, Input, Output, Transaction, build_vote_transaction, is_return_stake_transaction,
    is_stake_transaction, new_base_transaction, new_return_stake_transaction,
    new_stake_transaction, returns_stake_for, verify_transaction,
};
pub use utxo::Utxo;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Number of voting tokens minted to every participant at genesis
pub const VOTE_VALUE: u64 = 10;

#[cfg(test)]
pub(crate) mod testutil;
