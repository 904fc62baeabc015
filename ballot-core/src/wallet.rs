//! Wallet keypairs, signing and addresses
//!
//! A wallet wraps a P-256 keypair loaded from PEM files. Signatures are
//! DER-encoded ECDSA over the SHA-256 of the payload's canonical encoding,
//! so both ends of the wire agree on the signed bytes. Addresses are
//! base58 of `version || RIPEMD160(SHA256(public key)) || checksum`.

use crate::codec;
use crate::{ADDRESS_VERSION, PUBLIC_KEY_HASH_LEN, Result, WalletError};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use p256::{PublicKey, SecretKey};
use ripemd::Ripemd160;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Signing payload for a single transaction input.
///
/// `recipient` is the public-key hash of the paired output, `sender` the
/// spender's public-key hash and `value` the referenced unspent output's
/// value.
#[derive(Debug, Clone, Serialize)]
pub struct Signable<'a> {
    #[serde(with = "codec::base64_bytes")]
    pub recipient: &'a [u8],
    #[serde(with = "codec::base64_bytes")]
    pub sender: &'a [u8],
    pub value: u64,
}

/// A participant keypair with its cached public-key hash.
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    public_key_hash: Vec<u8>,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("public_key_hash", &hex::encode(&self.public_key_hash))
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

impl Wallet {
    /// Load a wallet from a PEM public/private key file pair.
    ///
    /// Accepts PKCS#8 and SEC1 private keys. Fails with `BadKey` on
    /// malformed PEM, a non-P-256 curve, or a mismatched pair.
    pub fn import(public_key_file: &Path, private_key_file: &Path) -> Result<Wallet> {
        let public_pem = std::fs::read_to_string(public_key_file)?;
        let private_pem = std::fs::read_to_string(private_key_file)?;
        let public_key = PublicKey::from_public_key_pem(&public_pem).map_err(|e| {
            WalletError::BadKey(format!("{}: {}", public_key_file.display(), e))
        })?;
        let secret = SecretKey::from_pkcs8_pem(&private_pem)
            .or_else(|_| SecretKey::from_sec1_pem(&private_pem))
            .map_err(|e| {
                WalletError::BadKey(format!("{}: {}", private_key_file.display(), e))
            })?;
        Self::from_keys(secret, public_key)
    }

    /// Generate a fresh wallet. Used by tooling and tests; production
    /// wallets are declared at genesis and imported from key files.
    pub fn generate() -> Wallet {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let verifying_key = *signing_key.verifying_key();
        let public_key_hash = hashed_public_key(encoded_point(&verifying_key).as_bytes());
        Wallet {
            signing_key,
            verifying_key,
            public_key_hash,
        }
    }

    fn from_keys(secret: SecretKey, public_key: PublicKey) -> Result<Wallet> {
        let signing_key = SigningKey::from(secret);
        let verifying_key = VerifyingKey::from(public_key);
        if signing_key.verifying_key().to_encoded_point(false)
            != verifying_key.to_encoded_point(false)
        {
            return Err(WalletError::BadKey(
                "public key does not match private key".to_string(),
            ));
        }
        let public_key_hash = hashed_public_key(encoded_point(&verifying_key).as_bytes());
        Ok(Wallet {
            signing_key,
            verifying_key,
            public_key_hash,
        })
    }

    /// Uncompressed SEC1 encoding of the public key.
    pub fn public_key(&self) -> Vec<u8> {
        encoded_point(&self.verifying_key).as_bytes().to_vec()
    }

    /// 20-byte digest of the public key.
    pub fn public_key_hash(&self) -> &[u8] {
        &self.public_key_hash
    }

    /// Base58 address of this wallet.
    pub fn address(&self) -> String {
        pkh_address(&self.public_key_hash)
    }

    /// Sign the canonical encoding of `payload`, returning a DER signature.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>> {
        let raw = codec::canonical_json(payload)?;
        let signature: Signature = self.signing_key.sign(&raw);
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

fn encoded_point(key: &VerifyingKey) -> p256::EncodedPoint {
    PublicKey::from(key).to_encoded_point(false)
}

/// Verify a DER signature over the canonical encoding of `payload`
/// against a SEC1-encoded public key.
pub fn verify<T: Serialize>(payload: &T, signature_der: &[u8], public_key: &[u8]) -> bool {
    let Ok(raw) = codec::canonical_json(payload) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature_der) else {
        return false;
    };
    verifying_key.verify(&raw, &signature).is_ok()
}

/// `RIPEMD160(SHA256(public_key))` - the 20-byte wallet identity.
pub fn hashed_public_key(public_key: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(public_key);
    Ripemd160::digest(sha).to_vec()
}

/// Base58 address for a public-key hash.
pub fn pkh_address(public_key_hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(1 + public_key_hash.len() + 4);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(public_key_hash);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Recover the public-key hash from a base58 address.
pub fn extract_public_key_hash(address: &str) -> Result<Vec<u8>> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|e| WalletError::BadAddress(format!("{}: {}", address, e)))?;
    if raw.len() != 1 + PUBLIC_KEY_HASH_LEN + 4 {
        return Err(WalletError::BadAddress(format!(
            "unexpected length {}",
            raw.len()
        )));
    }
    let (body, check) = raw.split_at(raw.len() - 4);
    if checksum(body) != check {
        return Err(WalletError::BadAddress("checksum mismatch".to_string()));
    }
    if body[0] != ADDRESS_VERSION {
        return Err(WalletError::BadAddress(format!(
            "unknown version {}",
            body[0]
        )));
    }
    Ok(body[1..].to_vec())
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    [second[0], second[1], second[2], second[3]]
}
