//! Forger election and stake reclamation
//!
//! Two periodic jobs drive the chain forward. Every election tick the
//! coordinator picks one registered node, backs it with a stake
//! transaction and asks it to forge the next block. The sweep tick mints
//! corrective return-stake transactions for stakes whose forger never
//! delivered.

use ballot_core::Wallet;
use ballot_ledger::{
    Ledger, LedgerError, height, is_stake_transaction, new_return_stake_transaction,
    new_stake_transaction, returns_stake_for,
};
use ballot_net::{
    Envelope, ForgeBlockBody, Hub, Message, NetError, NodeId, TransactionReceivedBody,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Period of the elect-and-forge job
pub const ELECTION_INTERVAL: Duration = Duration::from_secs(30);

/// Period of the stake-reclaim sweep; a stake older than this with no
/// return-stake counts as expired
pub const RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// The single outstanding forge request.
#[derive(Debug, Clone)]
pub struct ForgeExpectation {
    pub forger: NodeId,
    pub height: i64,
    pub stake_tx_id: Vec<u8>,
    pub issued_at: Instant,
}

pub type PendingForge = Arc<Mutex<Option<ForgeExpectation>>>;

pub struct Coordinator<L> {
    db: Arc<L>,
    hub: Arc<Hub>,
    wallet: Wallet,
    pending: PendingForge,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl<L: Ledger> Coordinator<L> {
    pub fn new(db: Arc<L>, hub: Arc<Hub>, wallet: Wallet, pending: PendingForge) -> Self {
        Coordinator {
            db,
            hub,
            wallet,
            pending,
        }
    }

    /// Run both periodic jobs until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        let start = tokio::time::Instant::now();
        let mut election = tokio::time::interval_at(start + ELECTION_INTERVAL, ELECTION_INTERVAL);
        let mut reclaim = tokio::time::interval_at(start + RECLAIM_INTERVAL, RECLAIM_INTERVAL);
        election.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        reclaim.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = election.tick() => {
                    if let Err(e) = self.elect_and_forge().await {
                        warn!(error = %e, "election tick failed");
                    }
                }
                _ = reclaim.tick() => {
                    if let Err(e) = self.reclaim_stakes() {
                        warn!(error = %e, "reclaim sweep failed");
                    }
                }
            }
        }
    }

    /// One election tick: pick a forger, stake it, request the block.
    pub async fn elect_and_forge(&self) -> Result<(), NetError> {
        if self.pending.lock().unwrap().is_some() {
            debug!("forge request still outstanding, skipping election");
            return Ok(());
        }
        let registered = self.hub.registered_nodes();
        if registered.is_empty() {
            info!("no registered nodes, waiting for the next tick");
            return Ok(());
        }
        let forger = match self.hub.random_unicast(&registered) {
            Ok(forger) => forger,
            Err(NetError::NoForger) => {
                info!("no eligible forger, waiting for the next tick");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let forger_hash = BASE64
            .decode(forger.as_bytes())
            .map_err(|e| NetError::BadRequest(format!("node id {}: {}", forger, e)))?;

        let stake = match new_stake_transaction(&*self.db, &self.wallet, &forger_hash) {
            Ok(stake) => stake,
            Err(LedgerError::CantForge) => {
                info!("balance cannot back a stake, skipping tick");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.db.accept_transaction(&stake)?;
        self.hub.broadcast(Envelope::request(
            Message::TransactionReceived,
            &TransactionReceivedBody {
                transaction: stake.clone(),
            },
        )?);

        let next_height = height(&*self.db)? + 1;
        *self.pending.lock().unwrap() = Some(ForgeExpectation {
            forger: forger.clone(),
            height: next_height,
            stake_tx_id: stake.id.clone(),
            issued_at: Instant::now(),
        });
        let ping = Envelope::request(Message::ForgeBlock, &ForgeBlockBody { height: next_height })?;
        match self.hub.unicast(&forger, ping).await {
            Ok(_) => info!(forger = %forger, height = next_height, "forge requested"),
            // the block may still arrive; otherwise the sweep reclaims
            Err(e) => warn!(forger = %forger, error = %e, "forge request failed"),
        }
        Ok(())
    }

    /// One sweep tick: mint return-stakes for expired stakes.
    pub fn reclaim_stakes(&self) -> Result<(), NetError> {
        let master = self.wallet.public_key_hash();
        let mempool = self.db.transactions()?;
        let now = unix_now();
        for stake in mempool.iter().filter(|tx| is_stake_transaction(master, tx)) {
            if mempool
                .iter()
                .any(|tx| returns_stake_for(master, stake, tx))
            {
                continue;
            }
            if now - stake.timestamp < RECLAIM_INTERVAL.as_secs() as i64 {
                continue;
            }
            let restake = match new_return_stake_transaction(&*self.db, &self.wallet, stake) {
                Ok(restake) => restake,
                Err(e) => {
                    warn!(stake = %hex::encode(&stake.id), error = %e, "cannot mint return stake");
                    continue;
                }
            };
            self.db.accept_transaction(&restake)?;
            self.hub.broadcast(Envelope::request(
                Message::TransactionReceived,
                &TransactionReceivedBody {
                    transaction: restake,
                },
            )?);
            info!(stake = %hex::encode(&stake.id), "stake reclaimed");
            let mut pending = self.pending.lock().unwrap();
            if pending
                .as_ref()
                .is_some_and(|exp| exp.stake_tx_id == stake.id)
            {
                *pending = None;
            }
        }
        Ok(())
    }
}
