//! Electoral parties

use ballot_core::codec;
use serde::{Deserialize, Serialize};

/// A party eligible to accumulate votes. Declared at genesis, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub name: String,

    #[serde(with = "codec::base64_bytes")]
    pub public_key_hash: Vec<u8>,
}
