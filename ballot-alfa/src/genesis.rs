//! Genesis bootstrap
//!
//! `--new` rebuilds the chain from scratch: a height-0 block minting
//! `VOTE_VALUE` to every declared participant, plus the party registry.

use ballot_core::{Wallet, hashed_public_key, scan_public_keys};
use ballot_ledger::{
    Block, ChainStore, Ledger, Party, Result, ZERO_HASH, new_base_transaction,
};
use std::path::Path;
use tracing::info;

/// Create the genesis block and the party bucket.
pub fn initialize<L: Ledger>(
    db: &L,
    master: &Wallet,
    node_wallets: &[Wallet],
    client_wallets: &[Wallet],
    parties: &[Party],
) -> Result<()> {
    let mut transactions = Vec::new();
    for wallet in node_wallets.iter().chain(client_wallets) {
        transactions.push(new_base_transaction(master, &wallet.address())?);
    }
    let genesis = Block::new(
        ZERO_HASH.to_vec(),
        0,
        master.public_key_hash().to_vec(),
        transactions,
    )?;
    db.init(&genesis)?;
    db.save_parties(parties)?;
    info!(
        participants = node_wallets.len() + client_wallets.len(),
        parties = parties.len(),
        "genesis block created"
    );
    Ok(())
}

/// Load the declared parties from a directory of public keys.
pub fn load_parties(dir: &Path) -> ballot_core::Result<Vec<Party>> {
    Ok(scan_public_keys(dir)?
        .into_iter()
        .map(|(name, public_key)| Party {
            name,
            public_key_hash: hashed_public_key(&public_key),
        })
        .collect())
}

/// Log the chain from tip to genesis at startup.
pub fn log_chain<S: ChainStore>(store: &S) -> Result<()> {
    let mut cursor = store.tip()?;
    while let Some(hash) = cursor {
        let Some(block) = store.block(&hash)? else {
            break;
        };
        info!(
            height = block.header.height,
            hash = %hex::encode(&block.header.hash),
            transactions = block.body.transactions.len(),
            "block"
        );
        if block.is_genesis() {
            break;
        }
        cursor = Some(block.header.prev_hash.clone());
    }
    Ok(())
}
