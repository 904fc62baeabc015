//! Integration tests against a real on-disk store

use ballot_core::Wallet;
use ballot_ledger::{
    Block, ChainStore, Ledger, LedgerError, MempoolStore, Party, PartyStore, Transaction,
    UtxoStore, VOTE_VALUE, ZERO_HASH, height, new_base_transaction,
    new_return_stake_transaction, new_stake_transaction, verify_transaction,
};
use ballot_store::LedgerDb;

struct Fixture {
    _dir: tempfile::TempDir,
    db: LedgerDb,
    master: Wallet,
    voters: Vec<Wallet>,
    node: Wallet,
    party: Party,
}

/// Two voters, one party, one node, freshly initialized from genesis.
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = LedgerDb::open(&dir.path().join("db")).unwrap();
    let master = Wallet::generate();
    let voters = vec![Wallet::generate(), Wallet::generate()];
    let node = Wallet::generate();
    let party_wallet = Wallet::generate();
    let party = Party {
        name: "party".to_string(),
        public_key_hash: party_wallet.public_key_hash().to_vec(),
    };

    let mut transactions = Vec::new();
    for wallet in voters.iter().chain(std::iter::once(&node)) {
        transactions.push(new_base_transaction(&master, &wallet.address()).unwrap());
    }
    let genesis = Block::new(
        ZERO_HASH.to_vec(),
        0,
        master.public_key_hash().to_vec(),
        transactions,
    )
    .unwrap();
    db.init(&genesis).unwrap();
    db.save_parties(std::slice::from_ref(&party)).unwrap();

    Fixture {
        _dir: dir,
        db,
        master,
        voters,
        node,
        party,
    }
}

fn cast_vote(fx: &Fixture, voter: &Wallet, value: u64) -> Result<Transaction, LedgerError> {
    let signable = ballot_core::Signable {
        recipient: &fx.party.public_key_hash,
        sender: voter.public_key_hash(),
        value,
    };
    let signature = voter.sign(&signable).unwrap();
    fx.db.cast_vote(
        voter.public_key_hash(),
        &fx.party.public_key_hash,
        &signature,
        &voter.public_key(),
    )
}

#[test]
fn test_genesis_state() {
    let fx = fixture();

    assert_eq!(height(&fx.db).unwrap(), 0);
    let v1 = fx
        .db
        .utxos_by_public_key(fx.voters[0].public_key_hash())
        .unwrap();
    assert_eq!(v1.len(), 1);
    assert_eq!(v1[0].value, VOTE_VALUE);
    let party = fx
        .db
        .utxos_by_public_key(&fx.party.public_key_hash)
        .unwrap();
    assert!(party.is_empty());
    assert_eq!(fx.db.parties().unwrap(), vec![fx.party.clone()]);
}

#[test]
fn test_init_twice_fails() {
    let fx = fixture();
    let genesis = ballot_ledger::find_block(&fx.db, |b| b.is_genesis())
        .unwrap()
        .unwrap();
    assert!(matches!(
        fx.db.init(&genesis),
        Err(LedgerError::AlreadyInitialized)
    ));
}

#[test]
fn test_single_vote() {
    let fx = fixture();
    let vote = cast_vote(&fx, &fx.voters[0], VOTE_VALUE).unwrap();

    let mempool = fx.db.transactions().unwrap();
    assert_eq!(mempool.len(), 1);
    assert_eq!(mempool[0].id, vote.id);

    let party = fx
        .db
        .utxos_by_public_key(&fx.party.public_key_hash)
        .unwrap();
    assert_eq!(party.len(), 1);
    assert_eq!(party[0].value, 1);

    let voter = fx
        .db
        .utxos_by_public_key(fx.voters[0].public_key_hash())
        .unwrap();
    assert_eq!(voter.len(), 1);
    assert_eq!(voter[0].value, VOTE_VALUE - 1);

    // the vote must verify against the chain-resolved genesis output
    assert!(verify_transaction(&vote, &fx.db));
}

#[test]
fn test_no_output_is_spent_twice() {
    let fx = fixture();
    let original = fx
        .db
        .utxos_by_public_key(fx.voters[0].public_key_hash())
        .unwrap()
        .remove(0);
    cast_vote(&fx, &fx.voters[0], VOTE_VALUE).unwrap();

    // the consumed output is gone from both indices, so a competing vote
    // can only select the change output
    assert!(
        fx.db
            .transaction_utxo(&original.transaction_id, original.vout)
            .unwrap()
            .is_none()
    );
    for value in [VOTE_VALUE - 1, VOTE_VALUE - 2] {
        cast_vote(&fx, &fx.voters[0], value).unwrap();
    }
    let voter = fx
        .db
        .utxos_by_public_key(fx.voters[0].public_key_hash())
        .unwrap();
    assert_eq!(voter.len(), 1);
    assert_eq!(voter[0].value, VOTE_VALUE - 3);
}

#[test]
fn test_vote_without_tokens_rejected() {
    let fx = fixture();
    let outsider = Wallet::generate();
    assert!(matches!(
        cast_vote(&fx, &outsider, 1),
        Err(LedgerError::InsufficientVotes)
    ));
}

#[test]
fn test_utxo_indices_stay_consistent() {
    let fx = fixture();
    cast_vote(&fx, &fx.voters[0], VOTE_VALUE).unwrap();
    let stake = new_stake_transaction(&fx.db, &fx.master, fx.node.public_key_hash());
    // master has no tokens at genesis in this fixture
    assert!(matches!(stake, Err(LedgerError::CantForge)));

    // every owner-index entry must appear in the by-transaction index
    for wallet in fx.voters.iter().chain(std::iter::once(&fx.node)) {
        for utxo in fx
            .db
            .utxos_by_public_key(wallet.public_key_hash())
            .unwrap()
        {
            let mirrored = fx
                .db
                .transaction_utxo(&utxo.transaction_id, utxo.vout)
                .unwrap();
            assert_eq!(mirrored, Some(utxo));
        }
    }
}

#[test]
fn test_delete_utxo_is_idempotent() {
    let fx = fixture();
    let utxo = fx
        .db
        .utxos_by_public_key(fx.voters[0].public_key_hash())
        .unwrap()
        .remove(0);
    fx.db.delete_utxo(&utxo).unwrap();
    fx.db.delete_utxo(&utxo).unwrap();
    assert!(
        fx.db
            .utxos_by_public_key(fx.voters[0].public_key_hash())
            .unwrap()
            .is_empty()
    );
    assert!(
        fx.db
            .transaction_utxo(&utxo.transaction_id, utxo.vout)
            .unwrap()
            .is_none()
    );
}

fn forge_cycle_fixture() -> (Fixture, Transaction, Block) {
    let fx = fixture();
    // mint the coordinator a balance so it can back a stake
    let mint = new_base_transaction(&fx.master, &fx.master.address()).unwrap();
    let tip = fx.db.tip().unwrap().unwrap();
    let mint_block = Block::new(tip, 1, fx.master.public_key_hash().to_vec(), vec![mint]).unwrap();
    fx.db.add_block(&mint_block).unwrap();

    let stake = new_stake_transaction(&fx.db, &fx.master, fx.node.public_key_hash()).unwrap();
    fx.db.accept_transaction(&stake).unwrap();

    let vote = cast_vote(&fx, &fx.voters[0], VOTE_VALUE).unwrap();
    let tip = fx.db.tip().unwrap().unwrap();
    let forged = Block::new(
        tip,
        2,
        fx.node.public_key_hash().to_vec(),
        vec![stake.clone(), vote],
    )
    .unwrap();
    (fx, stake, forged)
}

#[test]
fn test_forge_cycle_appends_and_drains_mempool() {
    let (fx, stake, forged) = forge_cycle_fixture();
    assert_eq!(stake.outputs[0].value, VOTE_VALUE / 2);

    fx.db
        .add_new_block(&forged, fx.master.public_key_hash())
        .unwrap();
    assert_eq!(height(&fx.db).unwrap(), 2);
    assert!(fx.db.transactions().unwrap().is_empty());
    assert!(fx.db.transaction(&stake.id).unwrap().is_none());
}

#[test]
fn test_same_block_twice_is_invalid() {
    let (fx, _, forged) = forge_cycle_fixture();
    fx.db
        .add_new_block(&forged, fx.master.public_key_hash())
        .unwrap();
    assert!(matches!(
        fx.db.add_new_block(&forged, fx.master.public_key_hash()),
        Err(LedgerError::InvalidBlock(_))
    ));
}

#[test]
fn test_stake_reclaim_restores_balance() {
    let (fx, stake, _) = forge_cycle_fixture();
    let before: u64 = VOTE_VALUE; // minted balance prior to staking

    let restake = new_return_stake_transaction(&fx.db, &fx.master, &stake).unwrap();
    fx.db.accept_transaction(&restake).unwrap();

    let balance: u64 = fx
        .db
        .utxos_by_public_key(fx.master.public_key_hash())
        .unwrap()
        .iter()
        .map(|u| u.value)
        .sum();
    assert_eq!(balance, before);
}

#[test]
fn test_accept_transaction_is_idempotent() {
    let (fx, stake, _) = forge_cycle_fixture();
    // a rebroadcast of an already-applied transaction changes nothing
    fx.db.accept_transaction(&stake).unwrap();
    let node_balance: u64 = fx
        .db
        .utxos_by_public_key(fx.node.public_key_hash())
        .unwrap()
        .iter()
        .map(|u| u.value)
        .sum();
    assert_eq!(node_balance, VOTE_VALUE + VOTE_VALUE / 2);
}
