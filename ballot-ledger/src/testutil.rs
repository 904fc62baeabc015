//! In-memory ledger used by unit tests

use crate::block::Block;
use crate::chain::validate_new_block;
use crate::party::Party;
use crate::store::{
    ChainStore, Ledger, MempoolStore, OutputResolver, PartyStore, UtxoStore,
};
use crate::transaction::{apply_transaction, build_vote_transaction, Transaction};
use crate::utxo::Utxo;
use crate::{LedgerError, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryLedger {
    blocks: Mutex<BTreeMap<Vec<u8>, Block>>,
    tip: Mutex<Option<Vec<u8>>>,
    ether: Mutex<BTreeMap<Vec<u8>, Transaction>>,
    by_pkey: Mutex<BTreeMap<Vec<u8>, Vec<Utxo>>>,
    by_tx: Mutex<BTreeMap<Vec<u8>, Vec<Utxo>>>,
    parties: Mutex<Vec<Party>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an unspent output into both indices, bypassing any transaction.
    pub fn seed_utxo(&self, owner: &[u8], value: u64, tag: &[u8]) {
        let utxo = Utxo {
            transaction_id: tag.to_vec(),
            public_key_hash: owner.to_vec(),
            value,
            vout: 0,
        };
        self.save_utxos(std::slice::from_ref(&utxo)).unwrap();
    }
}

impl ChainStore for MemoryLedger {
    fn tip(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.tip.lock().unwrap().clone())
    }

    fn block(&self, hash: &[u8]) -> Result<Option<Block>> {
        Ok(self.blocks.lock().unwrap().get(hash).cloned())
    }

    fn init(&self, genesis: &Block) -> Result<Vec<u8>> {
        if self.tip.lock().unwrap().is_some() {
            return Err(LedgerError::AlreadyInitialized);
        }
        self.add_block(genesis)
    }

    fn add_block(&self, block: &Block) -> Result<Vec<u8>> {
        self.blocks
            .lock()
            .unwrap()
            .insert(block.header.hash.clone(), block.clone());
        *self.tip.lock().unwrap() = Some(block.header.hash.clone());
        for tx in &block.body.transactions {
            let known = self.ether.lock().unwrap().remove(&tx.id).is_some();
            if !known {
                apply_transaction(self, tx)?;
            }
        }
        Ok(block.header.hash.clone())
    }
}

impl UtxoStore for MemoryLedger {
    fn save_utxos(&self, utxos: &[Utxo]) -> Result<()> {
        for utxo in utxos {
            self.by_pkey
                .lock()
                .unwrap()
                .entry(utxo.public_key_hash.clone())
                .or_default()
                .push(utxo.clone());
            self.by_tx
                .lock()
                .unwrap()
                .entry(utxo.transaction_id.clone())
                .or_default()
                .push(utxo.clone());
        }
        Ok(())
    }

    fn delete_utxo(&self, utxo: &Utxo) -> Result<()> {
        if let Some(set) = self.by_pkey.lock().unwrap().get_mut(&utxo.public_key_hash) {
            set.retain(|u| u.transaction_id != utxo.transaction_id || u.vout != utxo.vout);
        }
        if let Some(set) = self.by_tx.lock().unwrap().get_mut(&utxo.transaction_id) {
            set.retain(|u| u.vout != utxo.vout || u.public_key_hash != utxo.public_key_hash);
        }
        Ok(())
    }

    fn utxos_by_public_key(&self, public_key_hash: &[u8]) -> Result<Vec<Utxo>> {
        Ok(self
            .by_pkey
            .lock()
            .unwrap()
            .get(public_key_hash)
            .cloned()
            .unwrap_or_default())
    }

    fn transaction_utxo(&self, transaction_id: &[u8], vout: i64) -> Result<Option<Utxo>> {
        Ok(self
            .by_tx
            .lock()
            .unwrap()
            .get(transaction_id)
            .and_then(|set| set.iter().find(|u| u.vout == vout).cloned()))
    }
}

impl MempoolStore for MemoryLedger {
    fn save_transaction(&self, tx: &Transaction) -> Result<()> {
        self.ether
            .lock()
            .unwrap()
            .insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    fn delete_transaction(&self, id: &[u8]) -> Result<()> {
        self.ether.lock().unwrap().remove(id);
        Ok(())
    }

    fn transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.ether.lock().unwrap().values().cloned().collect())
    }

    fn transaction(&self, id: &[u8]) -> Result<Option<Transaction>> {
        Ok(self.ether.lock().unwrap().get(id).cloned())
    }
}

impl PartyStore for MemoryLedger {
    fn save_parties(&self, parties: &[Party]) -> Result<()> {
        self.parties.lock().unwrap().extend_from_slice(parties);
        Ok(())
    }

    fn parties(&self) -> Result<Vec<Party>> {
        Ok(self.parties.lock().unwrap().clone())
    }
}

impl OutputResolver for MemoryLedger {
    fn resolve_output(&self, transaction_id: &[u8], vout: i64) -> Result<Option<Utxo>> {
        if let Some(utxo) = self.transaction_utxo(transaction_id, vout)? {
            return Ok(Some(utxo));
        }
        if let Some(tx) = self.transaction(transaction_id)? {
            return Ok(tx.utxos().into_iter().find(|u| u.vout == vout));
        }
        let blocks = self.blocks.lock().unwrap();
        let spent = blocks.values().any(|block| {
            block.body.transactions.iter().any(|tx| {
                tx.inputs
                    .iter()
                    .any(|i| i.transaction_id == transaction_id && i.vout == vout)
            })
        });
        if spent {
            return Ok(None);
        }
        for block in blocks.values() {
            for tx in &block.body.transactions {
                if tx.id == transaction_id {
                    return Ok(tx.utxos().into_iter().find(|u| u.vout == vout));
                }
            }
        }
        Ok(None)
    }
}

impl Ledger for MemoryLedger {
    fn accept_transaction(&self, tx: &Transaction) -> Result<()> {
        self.save_transaction(tx)?;
        apply_transaction(self, tx)
    }

    fn cast_vote(
        &self,
        from: &[u8],
        to: &[u8],
        signature: &[u8],
        verifier: &[u8],
    ) -> Result<Transaction> {
        let utxos = self.utxos_by_public_key(from)?;
        let Some(used) = utxos.first() else {
            return Err(LedgerError::InsufficientVotes);
        };
        let tx = build_vote_transaction(used, from, to, signature, verifier)?;
        self.accept_transaction(&tx)?;
        Ok(tx)
    }

    fn add_new_block(&self, block: &Block, master: &[u8]) -> Result<Vec<u8>> {
        validate_new_block(self, block, master)?;
        self.add_block(block)
    }
}
