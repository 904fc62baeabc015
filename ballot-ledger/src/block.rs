//! Blocks and their verification
//!
//! A block's hash covers the previous hash, height, timestamp, forger and
//! the ids of the contained transactions, all through the canonical
//! encoding.

use crate::store::OutputResolver;
use crate::transaction::{is_stake_transaction, verify_transaction, Transaction};
use crate::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ballot_core::codec;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Previous-hash value of the genesis block
pub const ZERO_HASH: [u8; 32] = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    #[serde(with = "codec::base64_bytes")]
    pub hash: Vec<u8>,

    #[serde(with = "codec::base64_bytes")]
    pub prev_hash: Vec<u8>,

    pub height: i64,

    pub timestamp: i64,

    /// Public-key hash of the forger that produced this block
    #[serde(with = "codec::base64_bytes")]
    pub forger: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub header: Header,
    pub body: Body,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Hashable<'a> {
    #[serde(with = "codec::base64_bytes")]
    prev_hash: &'a [u8],
    height: i64,
    timestamp: i64,
    #[serde(with = "codec::base64_bytes")]
    forger: &'a [u8],
    transaction_ids: Vec<String>,
}

fn block_hash(
    prev_hash: &[u8],
    height: i64,
    timestamp: i64,
    forger: &[u8],
    transactions: &[Transaction],
) -> Result<Vec<u8>> {
    let transaction_ids = transactions
        .iter()
        .map(|tx| BASE64.encode(&tx.id))
        .collect();
    Ok(codec::hash(&Hashable {
        prev_hash,
        height,
        timestamp,
        forger,
        transaction_ids,
    })?)
}

impl Block {
    /// Assemble a block on top of `prev_hash`, stamping the current time
    /// and deriving the header hash.
    pub fn new(
        prev_hash: Vec<u8>,
        height: i64,
        forger: Vec<u8>,
        transactions: Vec<Transaction>,
    ) -> Result<Block> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let hash = block_hash(&prev_hash, height, timestamp, &forger, &transactions)?;
        Ok(Block {
            header: Header {
                hash,
                prev_hash,
                height,
                timestamp,
                forger,
            },
            body: Body { transactions },
        })
    }

    /// Recompute the header hash from the block's contents.
    pub fn computed_hash(&self) -> Result<Vec<u8>> {
        block_hash(
            &self.header.prev_hash,
            self.header.height,
            self.header.timestamp,
            &self.header.forger,
            &self.body.transactions,
        )
    }

    /// Whether any transaction in the block pays `public_key_hash`.
    pub fn pays_to(&self, public_key_hash: &[u8]) -> bool {
        self.body
            .transactions
            .iter()
            .any(|tx| tx.pays_to(public_key_hash))
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0
    }
}

/// Structural verification of a forged block: a non-empty body carrying
/// exactly one stake transaction (the forger's proof), every other
/// transaction verifying, and a header hash matching the contents.
pub fn verify_block<R: OutputResolver>(block: &Block, resolver: &R, master: &[u8]) -> bool {
    if block.body.transactions.is_empty() {
        return false;
    }
    let stakes = block
        .body
        .transactions
        .iter()
        .filter(|tx| is_stake_transaction(master, tx))
        .count();
    if stakes != 1 {
        return false;
    }
    for tx in &block.body.transactions {
        if is_stake_transaction(master, tx) {
            continue;
        }
        if !verify_transaction(tx, resolver) {
            return false;
        }
    }
    match block.computed_hash() {
        Ok(hash) => hash == block.header.hash,
        Err(_) => false,
    }
}
