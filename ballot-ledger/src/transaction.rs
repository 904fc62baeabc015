//! Transactions over unspent outputs
//!
//! A transaction's identity is the SHA-256 of the canonical encoding of
//! its inputs and outputs; the timestamp is excluded so identity survives
//! relaying. Base transactions mint value at genesis and are marked by the
//! sentinel `vout` of `-1`.

use crate::store::{OutputResolver, UtxoStore};
use crate::utxo::{self, Utxo};
use crate::{LedgerError, Result, VOTE_VALUE};
use ballot_core::wallet::{self, Signable, Wallet};
use ballot_core::{codec, extract_public_key_hash, hashed_public_key};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel `vout` marking a base (minting) input
pub const BASE_VOUT: i64 = -1;

/// A reference to an unspent output together with the spender's proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    #[serde(with = "codec::base64_bytes")]
    pub transaction_id: Vec<u8>,

    pub vout: i64,

    /// Spender's public-key hash
    #[serde(with = "codec::base64_bytes")]
    pub public_key_hash: Vec<u8>,

    /// DER ECDSA signature over the input's signing payload
    #[serde(with = "codec::base64_bytes")]
    pub signature: Vec<u8>,

    /// Spender's public key, which must hash to `public_key_hash`
    #[serde(with = "codec::base64_bytes")]
    pub verifier: Vec<u8>,
}

/// A value paid to a public-key hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub value: u64,

    #[serde(with = "codec::base64_bytes")]
    pub public_key_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(with = "codec::base64_bytes")]
    pub id: Vec<u8>,

    pub inputs: Vec<Input>,

    pub outputs: Vec<Output>,

    #[serde(default)]
    pub timestamp: i64,
}

/// Identity view: the timestamp is excluded from the hash.
#[derive(Serialize)]
struct Hashable<'a> {
    inputs: &'a [Input],
    outputs: &'a [Output],
}

fn new_id(inputs: &[Input], outputs: &[Output]) -> Result<Vec<u8>> {
    Ok(codec::hash(&Hashable { inputs, outputs })?)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Transaction {
    /// Assemble a transaction, deriving its identity from the inputs and
    /// outputs.
    pub fn new(inputs: Vec<Input>, outputs: Vec<Output>) -> Result<Transaction> {
        let id = new_id(&inputs, &outputs)?;
        Ok(Transaction {
            id,
            inputs,
            outputs,
            timestamp: unix_now(),
        })
    }

    /// A base transaction mints value: one sentinel input, one output.
    pub fn is_base(&self) -> bool {
        self.inputs.len() == 1 && self.outputs.len() == 1 && self.inputs[0].vout == BASE_VOUT
    }

    /// The unspent outputs this transaction creates.
    pub fn utxos(&self) -> Vec<Utxo> {
        self.outputs
            .iter()
            .enumerate()
            .map(|(vout, out)| Utxo {
                transaction_id: self.id.clone(),
                public_key_hash: out.public_key_hash.clone(),
                value: out.value,
                vout: vout as i64,
            })
            .collect()
    }

    /// Whether any output pays `public_key_hash`.
    pub fn pays_to(&self, public_key_hash: &[u8]) -> bool {
        self.outputs
            .iter()
            .any(|out| out.public_key_hash == public_key_hash)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ID: {}", hex::encode(&self.id))?;
        writeln!(f, "Inputs:")?;
        for input in &self.inputs {
            writeln!(f, "\tFrom: {}", hex::encode(&input.public_key_hash))?;
        }
        writeln!(f, "Outputs:")?;
        for output in &self.outputs {
            writeln!(
                f,
                "\tTo: {} Value: {}",
                hex::encode(&output.public_key_hash),
                output.value
            )?;
        }
        Ok(())
    }
}

/// Mint `VOTE_VALUE` to `recipient_address`, signed by the creator.
pub fn new_base_transaction(creator: &Wallet, recipient_address: &str) -> Result<Transaction> {
    let recipient = extract_public_key_hash(recipient_address)?;
    let signable = Signable {
        recipient: &recipient,
        sender: creator.public_key_hash(),
        value: VOTE_VALUE,
    };
    let signature = creator.sign(&signable)?;
    let inputs = vec![Input {
        transaction_id: Vec::new(),
        vout: BASE_VOUT,
        public_key_hash: creator.public_key_hash().to_vec(),
        signature,
        verifier: creator.public_key(),
    }];
    let outputs = vec![Output {
        value: VOTE_VALUE,
        public_key_hash: recipient,
    }];
    Transaction::new(inputs, outputs)
}

/// Transfer half of the creator's unspent value to `stakeholder`.
///
/// Inputs are accumulated in index order until they cover the target;
/// anything above it returns to the creator as change. Fails with
/// `CantForge` when the balance cannot back a stake.
pub fn new_stake_transaction<S: UtxoStore>(
    store: &S,
    creator: &Wallet,
    stakeholder: &[u8],
) -> Result<Transaction> {
    let utxos = store.utxos_by_public_key(creator.public_key_hash())?;
    let target = utxo::sum(&utxos) / 2;
    if target < VOTE_VALUE / 2 {
        return Err(LedgerError::CantForge);
    }
    let mut sum = 0;
    let mut inputs = Vec::new();
    for utxo in &utxos {
        sum += utxo.value;
        let signable = Signable {
            recipient: stakeholder,
            sender: creator.public_key_hash(),
            value: utxo.value,
        };
        let signature = creator.sign(&signable)?;
        inputs.push(Input {
            transaction_id: utxo.transaction_id.clone(),
            vout: utxo.vout,
            public_key_hash: creator.public_key_hash().to_vec(),
            signature,
            verifier: creator.public_key(),
        });
        if sum >= target {
            break;
        }
    }
    let mut outputs = vec![Output {
        value: target,
        public_key_hash: stakeholder.to_vec(),
    }];
    if sum > target {
        outputs.push(Output {
            value: sum - target,
            public_key_hash: creator.public_key_hash().to_vec(),
        });
    }
    Transaction::new(inputs, outputs)
}

/// Re-credit the coordinator with the stake paid out by `stake`.
///
/// The corrective input spends the stakeholder's output under the
/// coordinator's own authority; the transaction's only output pays the
/// coordinator back.
pub fn new_return_stake_transaction<R: OutputResolver>(
    resolver: &R,
    master: &Wallet,
    stake: &Transaction,
) -> Result<Transaction> {
    let (vout, staked) = stake
        .outputs
        .iter()
        .enumerate()
        .find(|(_, out)| out.public_key_hash != master.public_key_hash())
        .ok_or(LedgerError::UtxoNotFound)?;
    let utxo = resolver
        .resolve_output(&stake.id, vout as i64)?
        .ok_or(LedgerError::UtxoNotFound)?;
    let signable = Signable {
        recipient: master.public_key_hash(),
        sender: master.public_key_hash(),
        value: utxo.value,
    };
    let signature = master.sign(&signable)?;
    let inputs = vec![Input {
        transaction_id: stake.id.clone(),
        vout: vout as i64,
        public_key_hash: master.public_key_hash().to_vec(),
        signature,
        verifier: master.public_key(),
    }];
    let outputs = vec![Output {
        value: staked.value,
        public_key_hash: master.public_key_hash().to_vec(),
    }];
    Transaction::new(inputs, outputs)
}

/// Build the spending transaction for a single vote.
///
/// One token goes to the party; whatever remains of the consumed output
/// returns to the voter as change.
pub fn build_vote_transaction(
    utxo: &Utxo,
    from: &[u8],
    to: &[u8],
    signature: &[u8],
    verifier: &[u8],
) -> Result<Transaction> {
    let inputs = vec![Input {
        transaction_id: utxo.transaction_id.clone(),
        vout: utxo.vout,
        public_key_hash: from.to_vec(),
        signature: signature.to_vec(),
        verifier: verifier.to_vec(),
    }];
    let mut outputs = vec![Output {
        value: 1,
        public_key_hash: to.to_vec(),
    }];
    if utxo.value > 1 {
        outputs.push(Output {
            value: utxo.value - 1,
            public_key_hash: from.to_vec(),
        });
    }
    Transaction::new(inputs, outputs)
}

/// Check every input of `tx`: the referenced output must resolve, the
/// signature must cover `{recipient, sender, value}` and the verifier key
/// must hash to the input's public-key hash.
///
/// The recipient is the first output paying a hash other than the
/// spender's; when every output pays the spender the first output stands
/// in.
pub fn verify_transaction<R: OutputResolver>(tx: &Transaction, resolver: &R) -> bool {
    for input in &tx.inputs {
        let receiver = match tx
            .outputs
            .iter()
            .find(|out| out.public_key_hash != input.public_key_hash)
            .or_else(|| tx.outputs.first())
        {
            Some(out) => out,
            None => return false,
        };
        let utxo = match resolver.resolve_output(&input.transaction_id, input.vout) {
            Ok(Some(utxo)) => utxo,
            _ => return false,
        };
        let signable = Signable {
            recipient: &receiver.public_key_hash,
            sender: &input.public_key_hash,
            value: utxo.value,
        };
        if !wallet::verify(&signable, &input.signature, &input.verifier) {
            return false;
        }
        if hashed_public_key(&input.verifier) != input.public_key_hash {
            return false;
        }
    }
    true
}

/// A stake: the coordinator spends its own outputs and pays exactly one
/// other hash (the stakeholder).
pub fn is_stake_transaction(master: &[u8], tx: &Transaction) -> bool {
    !tx.is_base()
        && !tx.inputs.is_empty()
        && tx.inputs.iter().all(|i| i.public_key_hash == master)
        && tx
            .outputs
            .iter()
            .filter(|out| out.public_key_hash != master)
            .count()
            == 1
}

/// A return-stake: coordinator-signed, every output pays the coordinator.
pub fn is_return_stake_transaction(master: &[u8], tx: &Transaction) -> bool {
    !tx.is_base()
        && !tx.inputs.is_empty()
        && tx.inputs.iter().all(|i| i.public_key_hash == master)
        && tx.outputs.iter().all(|out| out.public_key_hash == master)
}

/// Whether `candidate` is the return-stake matching `stake`.
pub fn returns_stake_for(master: &[u8], stake: &Transaction, candidate: &Transaction) -> bool {
    is_return_stake_transaction(master, candidate)
        && candidate
            .inputs
            .iter()
            .any(|input| input.transaction_id == stake.id)
}

/// Apply a transaction to the unspent-output state: consume every
/// referenced output, then record the transaction's own outputs.
pub fn apply_transaction<S: UtxoStore>(store: &S, tx: &Transaction) -> Result<()> {
    for input in &tx.inputs {
        if input.vout == BASE_VOUT {
            continue;
        }
        if let Some(utxo) = store.transaction_utxo(&input.transaction_id, input.vout)? {
            store.delete_utxo(&utxo)?;
        }
    }
    store.save_utxos(&tx.utxos())
}
