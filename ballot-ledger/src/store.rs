//! Persistence capabilities
//!
//! The ledger logic works against these traits; the store crate provides
//! the embedded key-value implementation. Compound operations on `Ledger`
//! must execute atomically in one write transaction.

use crate::block::Block;
use crate::party::Party;
use crate::transaction::Transaction;
use crate::utxo::Utxo;
use crate::Result;

/// Block storage and chain linkage.
pub trait ChainStore {
    /// Hash of the highest block, if any.
    fn tip(&self) -> Result<Option<Vec<u8>>>;

    /// Look up a block by hash.
    fn block(&self, hash: &[u8]) -> Result<Option<Block>>;

    /// Create the chain from a genesis block. Fails with
    /// `AlreadyInitialized` when a tip exists.
    fn init(&self, genesis: &Block) -> Result<Vec<u8>>;

    /// Unconditional append used by the forger role: saves the block,
    /// advances the tip, drops included transactions from the mempool and
    /// applies transactions this node has not seen.
    fn add_block(&self, block: &Block) -> Result<Vec<u8>>;
}

/// The two unspent-output indices, always mutated together.
pub trait UtxoStore {
    /// Append to both indices; entries are expected to be new.
    fn save_utxos(&self, utxos: &[Utxo]) -> Result<()>;

    /// Remove from both indices. A second call is a no-op.
    fn delete_utxo(&self, utxo: &Utxo) -> Result<()>;

    fn utxos_by_public_key(&self, public_key_hash: &[u8]) -> Result<Vec<Utxo>>;

    fn transaction_utxo(&self, transaction_id: &[u8], vout: i64) -> Result<Option<Utxo>>;
}

/// Transactions accepted but not yet included in a block.
pub trait MempoolStore {
    fn save_transaction(&self, tx: &Transaction) -> Result<()>;

    fn delete_transaction(&self, id: &[u8]) -> Result<()>;

    fn transactions(&self) -> Result<Vec<Transaction>>;

    fn transaction(&self, id: &[u8]) -> Result<Option<Transaction>>;
}

/// Parties eligible to accumulate votes, written once at genesis.
pub trait PartyStore {
    fn save_parties(&self, parties: &[Party]) -> Result<()>;

    fn parties(&self) -> Result<Vec<Party>>;
}

/// Resolve a referenced output for verification.
///
/// Resolution order: the live unspent index, then the stored mempool
/// transaction's outputs, then the chain. Outputs consumed at mempool
/// acceptance stay resolvable this way until their transaction leaves the
/// mempool for a block.
pub trait OutputResolver {
    fn resolve_output(&self, transaction_id: &[u8], vout: i64) -> Result<Option<Utxo>>;
}

/// The full persistence surface with its atomic compound operations.
pub trait Ledger:
    ChainStore + UtxoStore + MempoolStore + PartyStore + OutputResolver + Send + Sync
{
    /// Accept a transaction into the mempool and apply it to the
    /// unspent-output state, atomically.
    fn accept_transaction(&self, tx: &Transaction) -> Result<()>;

    /// Select the voter's first unspent output and spend one token from it,
    /// atomically. Fails with `InsufficientVotes` when the voter has none.
    fn cast_vote(
        &self,
        from: &[u8],
        to: &[u8],
        signature: &[u8],
        verifier: &[u8],
    ) -> Result<Transaction>;

    /// Validated append used when a peer hands over a forged block.
    fn add_new_block(&self, block: &Block, master: &[u8]) -> Result<Vec<u8>>;
}
