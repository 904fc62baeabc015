//! Canonical encoding helpers
//!
//! Every hash and signature in the system is computed over the same
//! canonical form: UTF-8 JSON with object keys sorted lexicographically,
//! no whitespace, binary fields as standard base64 strings. Routing the
//! value through `serde_json::Value` gives the sorted-key property on
//! both sides of the wire.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize `data` into its canonical byte form.
pub fn canonical_json<T: Serialize>(data: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(data)?;
    serde_json::to_vec(&value)
}

/// SHA-256 over the canonical encoding of `data`.
pub fn hash<T: Serialize>(data: &T) -> Result<Vec<u8>, serde_json::Error> {
    let raw = canonical_json(data)?;
    Ok(Sha256::digest(&raw).to_vec())
}

/// Serde adapter carrying binary fields as standard base64 strings.
pub mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&BASE64.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
