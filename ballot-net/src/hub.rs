//! The peer hub
//!
//! A registry of authorized open connections keyed by node id (the base64
//! public-key hash a peer registered under). All mutations serialize
//! behind one mutex; frames are enqueued outside of it.

use crate::message::{Envelope, HeightBody, Message};
use crate::{MAX_MISSED_PINGS, NetError, PING_INTERVAL, REQUEST_TIMEOUT, Result};
use ballot_core::wallet::Wallet;
use rand::seq::SliceRandom;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Peers are addressed by the base64 of their public-key hash.
pub type NodeId = String;

/// Shared handle to one open connection.
#[derive(Clone)]
pub struct PeerHandle {
    conn_id: u64,
    out: mpsc::Sender<String>,
    pending: Arc<Mutex<VecDeque<oneshot::Sender<Envelope>>>>,
    closer: Arc<Notify>,
    strikes: Arc<AtomicU32>,
}

impl PeerHandle {
    pub(crate) fn new(conn_id: u64, out: mpsc::Sender<String>) -> PeerHandle {
        PeerHandle {
            conn_id,
            out,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            closer: Arc::new(Notify::new()),
            strikes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A handle not wired to any socket; sends fail as closed.
    pub fn detached() -> PeerHandle {
        let (out, _rx) = mpsc::channel(1);
        PeerHandle::new(u64::MAX, out)
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Enqueue a frame. A full queue means the peer's writer is stuck, so
    /// the connection is torn down.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let frame = serde_json::to_string(envelope)?;
        match self.out.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.close();
                Err(NetError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NetError::ConnectionClosed),
        }
    }

    /// Send a request and await its response within `timeout`.
    pub async fn request(&self, envelope: &Envelope, timeout: Duration) -> Result<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push_back(tx);
        self.send(envelope)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(pong)) => Ok(pong),
            Ok(Err(_)) => Err(NetError::ConnectionClosed),
            Err(_) => Err(NetError::PeerTimeout(format!("conn {}", self.conn_id))),
        }
    }

    /// Hand an incoming response to the oldest pending request. Requests
    /// whose awaiter already timed out are skipped over.
    pub(crate) fn resolve(&self, envelope: Envelope) -> bool {
        let mut envelope = envelope;
        let mut pending = self.pending.lock().unwrap();
        while let Some(tx) = pending.pop_front() {
            match tx.send(envelope) {
                Ok(()) => return true,
                Err(returned) => envelope = returned,
            }
        }
        false
    }

    /// Drop every pending request; their awaiters see a closed connection.
    pub(crate) fn fail_pending(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// Ask the connection actor to shut down.
    pub fn close(&self) {
        self.closer.notify_one();
    }

    pub(crate) async fn closed(&self) {
        self.closer.notified().await;
    }

    fn strike(&self) -> u32 {
        self.strikes.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn clear_strikes(&self) {
        self.strikes.store(0, Ordering::Relaxed);
    }
}

/// Registry of authorized peers plus the wallet signing outgoing frames.
pub struct Hub {
    peers: Mutex<HashMap<NodeId, PeerHandle>>,
    signer: Wallet,
}

impl Hub {
    pub fn new(signer: Wallet) -> Hub {
        Hub {
            peers: Mutex::new(HashMap::new()),
            signer,
        }
    }

    pub fn signer(&self) -> &Wallet {
        &self.signer
    }

    /// Install a binding. A previous connection under the same node id is
    /// closed and replaced.
    pub fn register(&self, node_id: NodeId, handle: PeerHandle) {
        let displaced = self.peers.lock().unwrap().insert(node_id.clone(), handle);
        if let Some(old) = displaced {
            info!(node = %node_id, "displacing previous connection");
            old.close();
        }
    }

    /// Remove whatever binding points at this connection. A second call is
    /// a no-op.
    pub fn unregister(&self, conn_id: u64) {
        self.peers
            .lock()
            .unwrap()
            .retain(|_, handle| handle.conn_id() != conn_id);
    }

    pub fn registered_nodes(&self) -> Vec<NodeId> {
        self.peers.lock().unwrap().keys().cloned().collect()
    }

    fn peer(&self, node_id: &str) -> Option<PeerHandle> {
        self.peers.lock().unwrap().get(node_id).cloned()
    }

    /// Send a signed request to one peer and await the response. A timeout
    /// unregisters the peer.
    pub async fn unicast(&self, node_id: &str, mut envelope: Envelope) -> Result<Envelope> {
        let handle = self
            .peer(node_id)
            .ok_or_else(|| NetError::NoPeer(node_id.to_string()))?;
        envelope.sign(&self.signer)?;
        match handle.request(&envelope, REQUEST_TIMEOUT).await {
            Err(NetError::PeerTimeout(_)) => {
                warn!(node = %node_id, "request timed out, unregistering");
                handle.close();
                self.unregister(handle.conn_id());
                Err(NetError::PeerTimeout(node_id.to_string()))
            }
            other => other,
        }
    }

    /// Send a signed message to every registered peer. Per-connection
    /// failures are logged and do not abort the broadcast.
    pub fn broadcast(&self, envelope: Envelope) {
        self.broadcast_except(u64::MAX, envelope);
    }

    /// Broadcast to everyone except the connection the message came from.
    pub fn broadcast_except(&self, skip_conn_id: u64, mut envelope: Envelope) {
        if let Err(e) = envelope.sign(&self.signer) {
            warn!(error = %e, "failed to sign broadcast");
            return;
        }
        let peers: Vec<(NodeId, PeerHandle)> = self
            .peers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();
        for (node_id, handle) in peers {
            if handle.conn_id() == skip_conn_id {
                continue;
            }
            if let Err(e) = handle.send(&envelope) {
                warn!(node = %node_id, error = %e, "broadcast send failed");
            }
        }
    }

    /// Pick one of `candidates ∩ registered` uniformly at random.
    pub fn random_unicast(&self, candidates: &[NodeId]) -> Result<NodeId> {
        let peers = self.peers.lock().unwrap();
        let eligible: Vec<&NodeId> = candidates
            .iter()
            .filter(|node_id| peers.contains_key(*node_id))
            .collect();
        eligible
            .choose(&mut rand::thread_rng())
            .map(|node_id| (*node_id).clone())
            .ok_or(NetError::NoForger)
    }

    /// One keepalive round: ping every peer, drop those that missed too
    /// many in a row.
    pub async fn keepalive_sweep(&self) {
        let peers: Vec<(NodeId, PeerHandle)> = self
            .peers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();
        for (node_id, handle) in peers {
            let mut ping = match Envelope::request(
                Message::GetBlockchainHeight,
                &serde_json::Value::Null,
            ) {
                Ok(ping) => ping,
                Err(_) => continue,
            };
            if ping.sign(&self.signer).is_err() {
                continue;
            }
            match handle.request(&ping, REQUEST_TIMEOUT).await {
                Ok(pong) => {
                    handle.clear_strikes();
                    if let Ok(body) = pong.parse_body::<HeightBody>() {
                        debug!(node = %node_id, height = body.height, "keepalive");
                    }
                }
                Err(e) => {
                    let missed = handle.strike();
                    debug!(node = %node_id, missed, error = %e, "keepalive miss");
                    if missed >= MAX_MISSED_PINGS {
                        warn!(node = %node_id, "peer unresponsive, closing");
                        handle.close();
                        self.unregister(handle.conn_id());
                    }
                }
            }
        }
    }

    /// Ping registered peers forever, on the keepalive interval.
    pub async fn keepalive_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.keepalive_sweep().await;
        }
    }
}
