//! Ballot Store - Embedded persistence for the voting chain
//!
//! A sled-backed implementation of the ledger's capability traits. The
//! store keeps four logical buckets in one keyspace, distinguished by key
//! prefix the way the original kept named buckets: `blocks/` (with the
//! reserved tip key `l`), `ether/` (the mempool), `utxos-by-pkey/`,
//! `utxos-by-tx/` and `parties/`. Every compound mutation runs inside a
//! single write transaction, so readers observe either the pre-state or
//! the post-state.

mod db;

pub use db::LedgerDb;
