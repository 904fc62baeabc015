//! The sled-backed ledger database

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ballot_ledger::{
    Block, ChainStore, Ledger, LedgerError, MempoolStore, OutputResolver, Party, PartyStore,
    Transaction, Utxo, UtxoStore, build_vote_transaction, validate_new_block,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::path::Path;

type Result<T> = std::result::Result<T, LedgerError>;
type TxnResult<T> = ConflictableTransactionResult<T, LedgerError>;

/// Reserved key holding the tip hash, alongside the block records.
const TIP_KEY: &[u8] = b"blocks/l";

fn block_key(hash: &[u8]) -> Vec<u8> {
    [b"blocks/" as &[u8], BASE64.encode(hash).as_bytes()].concat()
}

fn mempool_key(id: &[u8]) -> Vec<u8> {
    [b"ether/" as &[u8], BASE64.encode(id).as_bytes()].concat()
}

fn utxo_pkey_key(public_key_hash: &[u8]) -> Vec<u8> {
    [
        b"utxos-by-pkey/" as &[u8],
        BASE64.encode(public_key_hash).as_bytes(),
    ]
    .concat()
}

fn utxo_tx_key(transaction_id: &[u8]) -> Vec<u8> {
    [
        b"utxos-by-tx/" as &[u8],
        BASE64.encode(transaction_id).as_bytes(),
    ]
    .concat()
}

fn party_key(public_key_hash: &[u8]) -> Vec<u8> {
    [b"parties/" as &[u8], BASE64.encode(public_key_hash).as_bytes()].concat()
}

fn storage(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::StorageFailure(e.to_string())
}

fn abort(e: LedgerError) -> ConflictableTransactionError<LedgerError> {
    ConflictableTransactionError::Abort(e)
}

fn unwrap_txn<T>(result: sled::transaction::TransactionResult<T, LedgerError>) -> Result<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => storage(err),
    })
}

/// Embedded ledger store. All state lives in one sled keyspace under the
/// bucket prefixes listed in the crate docs.
pub struct LedgerDb {
    db: sled::Db,
}

impl LedgerDb {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<LedgerDb> {
        let db = sled::open(path).map_err(storage)?;
        Ok(LedgerDb { db })
    }

    /// Remove any store at `path`. Used by `--new` before rebuilding from
    /// genesis.
    pub fn destroy(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path).map_err(storage)?;
        }
        Ok(())
    }

    /// Flush dirty pages to disk before shutdown.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key).map_err(storage)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        let mut result = Vec::new();
        for entry in self.db.scan_prefix(prefix) {
            let (key, raw) = entry.map_err(storage)?;
            if key.as_ref() == TIP_KEY {
                continue;
            }
            result.push(serde_json::from_slice(&raw)?);
        }
        Ok(result)
    }
}

fn put_json<T: Serialize>(t: &TransactionalTree, key: Vec<u8>, value: &T) -> TxnResult<()> {
    let raw = serde_json::to_vec(value).map_err(|e| abort(e.into()))?;
    t.insert(key, raw)?;
    Ok(())
}

fn get_utxo_set(t: &TransactionalTree, key: &[u8]) -> TxnResult<Vec<Utxo>> {
    match t.get(key)? {
        Some(raw) => serde_json::from_slice(&raw).map_err(|e| abort(e.into())),
        None => Ok(Vec::new()),
    }
}

fn txn_save_utxos(t: &TransactionalTree, utxos: &[Utxo]) -> TxnResult<()> {
    for utxo in utxos {
        let pkey_key = utxo_pkey_key(&utxo.public_key_hash);
        let mut owned = get_utxo_set(t, &pkey_key)?;
        owned.push(utxo.clone());
        put_json(t, pkey_key, &owned)?;

        let tx_key = utxo_tx_key(&utxo.transaction_id);
        let mut created = get_utxo_set(t, &tx_key)?;
        created.push(utxo.clone());
        put_json(t, tx_key, &created)?;
    }
    Ok(())
}

fn txn_delete_utxo(t: &TransactionalTree, utxo: &Utxo) -> TxnResult<()> {
    let pkey_key = utxo_pkey_key(&utxo.public_key_hash);
    let mut owned = get_utxo_set(t, &pkey_key)?;
    owned.retain(|u| u.transaction_id != utxo.transaction_id || u.vout != utxo.vout);
    put_json(t, pkey_key, &owned)?;

    let tx_key = utxo_tx_key(&utxo.transaction_id);
    let mut created = get_utxo_set(t, &tx_key)?;
    created.retain(|u| u.vout != utxo.vout || u.public_key_hash != utxo.public_key_hash);
    put_json(t, tx_key, &created)?;
    Ok(())
}

fn txn_transaction_utxo(
    t: &TransactionalTree,
    transaction_id: &[u8],
    vout: i64,
) -> TxnResult<Option<Utxo>> {
    let created = get_utxo_set(t, &utxo_tx_key(transaction_id))?;
    Ok(created.into_iter().find(|u| u.vout == vout))
}

fn txn_apply_transaction(t: &TransactionalTree, tx: &Transaction) -> TxnResult<()> {
    for input in &tx.inputs {
        if input.vout == ballot_ledger::BASE_VOUT {
            continue;
        }
        if let Some(utxo) = txn_transaction_utxo(t, &input.transaction_id, input.vout)? {
            txn_delete_utxo(t, &utxo)?;
        }
    }
    txn_save_utxos(t, &tx.utxos())
}

fn txn_accept_transaction(t: &TransactionalTree, tx: &Transaction) -> TxnResult<()> {
    let key = mempool_key(&tx.id);
    if t.get(key.as_slice())?.is_some() {
        // already accepted and applied; a rebroadcast changes nothing
        return Ok(());
    }
    put_json(t, key, tx)?;
    txn_apply_transaction(t, tx)
}

fn txn_add_block(t: &TransactionalTree, block: &Block) -> TxnResult<Vec<u8>> {
    put_json(t, block_key(&block.header.hash), block)?;
    t.insert(TIP_KEY, BASE64.encode(&block.header.hash).into_bytes())?;
    for tx in &block.body.transactions {
        let known = t.remove(mempool_key(&tx.id))?.is_some();
        if !known {
            txn_apply_transaction(t, tx)?;
        }
    }
    Ok(block.header.hash.clone())
}

impl ChainStore for LedgerDb {
    fn tip(&self) -> Result<Option<Vec<u8>>> {
        match self.db.get(TIP_KEY).map_err(storage)? {
            Some(raw) => Ok(Some(BASE64.decode(raw.as_ref()).map_err(storage)?)),
            None => Ok(None),
        }
    }

    fn block(&self, hash: &[u8]) -> Result<Option<Block>> {
        self.get_json(&block_key(hash))
    }

    fn init(&self, genesis: &Block) -> Result<Vec<u8>> {
        unwrap_txn(self.db.transaction(|t| -> TxnResult<Vec<u8>> {
            if t.get(TIP_KEY)?.is_some() {
                return Err(abort(LedgerError::AlreadyInitialized));
            }
            txn_add_block(t, genesis)
        }))
    }

    fn add_block(&self, block: &Block) -> Result<Vec<u8>> {
        unwrap_txn(
            self.db
                .transaction(|t| -> TxnResult<Vec<u8>> { txn_add_block(t, block) }),
        )
    }
}

impl UtxoStore for LedgerDb {
    fn save_utxos(&self, utxos: &[Utxo]) -> Result<()> {
        unwrap_txn(
            self.db
                .transaction(|t| -> TxnResult<()> { txn_save_utxos(t, utxos) }),
        )
    }

    fn delete_utxo(&self, utxo: &Utxo) -> Result<()> {
        unwrap_txn(
            self.db
                .transaction(|t| -> TxnResult<()> { txn_delete_utxo(t, utxo) }),
        )
    }

    fn utxos_by_public_key(&self, public_key_hash: &[u8]) -> Result<Vec<Utxo>> {
        Ok(self
            .get_json(&utxo_pkey_key(public_key_hash))?
            .unwrap_or_default())
    }

    fn transaction_utxo(&self, transaction_id: &[u8], vout: i64) -> Result<Option<Utxo>> {
        let created: Vec<Utxo> = self
            .get_json(&utxo_tx_key(transaction_id))?
            .unwrap_or_default();
        Ok(created.into_iter().find(|u| u.vout == vout))
    }
}

impl MempoolStore for LedgerDb {
    fn save_transaction(&self, tx: &Transaction) -> Result<()> {
        unwrap_txn(
            self.db
                .transaction(|t| -> TxnResult<()> { put_json(t, mempool_key(&tx.id), tx) }),
        )
    }

    fn delete_transaction(&self, id: &[u8]) -> Result<()> {
        self.db.remove(mempool_key(id)).map_err(storage)?;
        Ok(())
    }

    fn transactions(&self) -> Result<Vec<Transaction>> {
        self.scan_json(b"ether/")
    }

    fn transaction(&self, id: &[u8]) -> Result<Option<Transaction>> {
        self.get_json(&mempool_key(id))
    }
}

impl PartyStore for LedgerDb {
    fn save_parties(&self, parties: &[Party]) -> Result<()> {
        unwrap_txn(self.db.transaction(|t| -> TxnResult<()> {
            for party in parties {
                put_json(t, party_key(&party.public_key_hash), party)?;
            }
            Ok(())
        }))
    }

    fn parties(&self) -> Result<Vec<Party>> {
        self.scan_json(b"parties/")
    }
}

impl OutputResolver for LedgerDb {
    fn resolve_output(&self, transaction_id: &[u8], vout: i64) -> Result<Option<Utxo>> {
        if let Some(utxo) = self.transaction_utxo(transaction_id, vout)? {
            return Ok(Some(utxo));
        }
        if let Some(tx) = self.transaction(transaction_id)? {
            return Ok(tx.utxos().into_iter().find(|u| u.vout == vout));
        }
        // fall back to the chain for outputs created before the mempool;
        // an output consumed by a chain transaction stays spent
        let mut cursor = self.tip()?;
        while let Some(hash) = cursor {
            let Some(block) = self.block(&hash)? else {
                return Ok(None);
            };
            for tx in &block.body.transactions {
                if tx
                    .inputs
                    .iter()
                    .any(|i| i.transaction_id == transaction_id && i.vout == vout)
                {
                    return Ok(None);
                }
                if tx.id == transaction_id {
                    return Ok(tx.utxos().into_iter().find(|u| u.vout == vout));
                }
            }
            if block.is_genesis() {
                return Ok(None);
            }
            cursor = Some(block.header.prev_hash.clone());
        }
        Ok(None)
    }
}

impl Ledger for LedgerDb {
    fn accept_transaction(&self, tx: &Transaction) -> Result<()> {
        unwrap_txn(
            self.db
                .transaction(|t| -> TxnResult<()> { txn_accept_transaction(t, tx) }),
        )
    }

    fn cast_vote(
        &self,
        from: &[u8],
        to: &[u8],
        signature: &[u8],
        verifier: &[u8],
    ) -> Result<Transaction> {
        unwrap_txn(self.db.transaction(|t| -> TxnResult<Transaction> {
            let owned = get_utxo_set(t, &utxo_pkey_key(from))?;
            let Some(used) = owned.first() else {
                return Err(abort(LedgerError::InsufficientVotes));
            };
            let tx = build_vote_transaction(used, from, to, signature, verifier)
                .map_err(abort)?;
            put_json(t, mempool_key(&tx.id), &tx)?;
            txn_apply_transaction(t, &tx)?;
            Ok(tx)
        }))
    }

    fn add_new_block(&self, block: &Block, master: &[u8]) -> Result<Vec<u8>> {
        validate_new_block(self, block, master)?;
        unwrap_txn(self.db.transaction(|t| -> TxnResult<Vec<u8>> {
            // the tip may have moved since validation ran
            let tip = match t.get(TIP_KEY)? {
                Some(raw) => BASE64.decode(raw.as_ref()).map_err(|e| abort(storage(e)))?,
                None => Vec::new(),
            };
            if tip != block.header.prev_hash {
                return Err(abort(LedgerError::InvalidBlock(
                    "previous hash does not match the tip".to_string(),
                )));
            }
            txn_add_block(t, block)
        }))
    }
}
