//! Chain traversal and append validation

use crate::block::{verify_block, Block};
use crate::store::{ChainStore, OutputResolver};
use crate::transaction::BASE_VOUT;
use crate::{LedgerError, Result};
use std::collections::HashSet;

/// Walk the chain from the tip toward genesis, returning the first block
/// matching `criteria`.
pub fn find_block<S, F>(store: &S, criteria: F) -> Result<Option<Block>>
where
    S: ChainStore,
    F: Fn(&Block) -> bool,
{
    let mut cursor = store.tip()?;
    while let Some(hash) = cursor {
        let Some(block) = store.block(&hash)? else {
            return Ok(None);
        };
        if criteria(&block) {
            return Ok(Some(block));
        }
        if block.is_genesis() {
            return Ok(None);
        }
        cursor = Some(block.header.prev_hash.clone());
    }
    Ok(None)
}

/// Height of the chain tip, `-1` when the chain is empty.
pub fn height<S: ChainStore>(store: &S) -> Result<i64> {
    match store.tip()? {
        Some(tip) => match store.block(&tip)? {
            Some(block) => Ok(block.header.height),
            None => Ok(-1),
        },
        None => Ok(-1),
    }
}

/// Validate a peer-forged block against the current tip.
///
/// Rejects with `InvalidBlock` when the block does not extend the tip,
/// skips a height, fails structural verification, references an
/// unresolvable output, or consumes the same output twice.
pub fn validate_new_block<S>(store: &S, block: &Block, master: &[u8]) -> Result<()>
where
    S: ChainStore + OutputResolver,
{
    match store.tip()? {
        Some(tip) if tip == block.header.prev_hash => {}
        _ => {
            return Err(LedgerError::InvalidBlock(
                "previous hash does not match the tip".to_string(),
            ));
        }
    }
    let current = height(store)?;
    if block.header.height != current + 1 {
        return Err(LedgerError::InvalidBlock(format!(
            "height {} does not extend {}",
            block.header.height, current
        )));
    }
    if !verify_block(block, store, master) {
        return Err(LedgerError::InvalidBlock(
            "block verification failed".to_string(),
        ));
    }
    let mut consumed = HashSet::new();
    for tx in &block.body.transactions {
        for input in &tx.inputs {
            if input.vout == BASE_VOUT {
                continue;
            }
            if store
                .resolve_output(&input.transaction_id, input.vout)?
                .is_none()
            {
                return Err(LedgerError::InvalidBlock(
                    "input references a missing unspent output".to_string(),
                ));
            }
            if !consumed.insert((input.transaction_id.clone(), input.vout)) {
                return Err(LedgerError::InvalidBlock(
                    "output consumed twice in one block".to_string(),
                ));
            }
        }
    }
    Ok(())
}
