//! Key-file directory scanning
//!
//! Participant key directories pair files by name: `voter1.pem` holds a
//! private key, `voter1_pub.pem` the matching public key. Files whose name
//! contains `address` are ignored.

use crate::wallet::Wallet;
use crate::{Result, WalletError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A paired public/private key file group.
#[derive(Debug, Clone, Default)]
pub struct KeyFiles {
    pub public_key_file: PathBuf,
    pub private_key_file: PathBuf,
}

/// Scan a directory and pair key files by name.
pub fn scan_key_directory(dir: &Path) -> Result<Vec<KeyFiles>> {
    let mut groups: BTreeMap<String, KeyFiles> = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.contains("address") {
            continue;
        }
        let name = file_name.replacen("_pub", "", 1);
        let group = groups.entry(name).or_default();
        if file_name.contains("pub") {
            group.public_key_file = entry.path();
        } else {
            group.private_key_file = entry.path();
        }
    }
    for (name, group) in &groups {
        if group.public_key_file.as_os_str().is_empty()
            || group.private_key_file.as_os_str().is_empty()
        {
            return Err(WalletError::BadKey(format!(
                "incomplete key pair for {}",
                name
            )));
        }
    }
    Ok(groups.into_values().collect())
}

/// Import one wallet per key file pair.
pub fn import_multiple(key_files: &[KeyFiles]) -> Result<Vec<Wallet>> {
    key_files
        .iter()
        .map(|kf| Wallet::import(&kf.public_key_file, &kf.private_key_file))
        .collect()
}

/// Scan a directory holding only public keys, returning `(name, SEC1 key)`
/// per file. The name is the file stem with any `_pub` marker removed.
pub fn scan_public_keys(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    use p256::pkcs8::DecodePublicKey;

    let mut result = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.contains("address") || !file_name.contains("pub") {
            continue;
        }
        let name = entry
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().replacen("_pub", "", 1))
            .unwrap_or_default();
        let pem = std::fs::read_to_string(entry.path())?;
        let key = p256::PublicKey::from_public_key_pem(&pem)
            .map_err(|e| WalletError::BadKey(format!("{}: {}", entry.path().display(), e)))?;
        result.push((name, key.to_encoded_point(false).as_bytes().to_vec()));
    }
    result.sort();
    Ok(result)
}
