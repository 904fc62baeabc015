//! Unspent transaction outputs

use ballot_core::codec;
use serde::{Deserialize, Serialize};

/// An unspent output, addressable both by its owner and by the
/// transaction that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    #[serde(with = "codec::base64_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(with = "codec::base64_bytes")]
    pub public_key_hash: Vec<u8>,

    pub value: u64,

    pub vout: i64,
}

/// Total value of a set of unspent outputs.
pub fn sum(utxos: &[Utxo]) -> u64 {
    utxos.iter().map(|u| u.value).sum()
}
