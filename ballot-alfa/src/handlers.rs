//! Socket message handlers
//!
//! The coordinator answers height queries, serves blocks to catching-up
//! peers, registers authorized nodes into the hub and takes delivery of
//! forged blocks.

use crate::scheduler::PendingForge;
use async_trait::async_trait;
use ballot_ledger::{ChainStore, Ledger, LedgerError, height};
use ballot_net::{
    Authorized, BlockBody, BlockForgedBody, BlocksBody, ChainAuthorizer, ConnContext, Envelope,
    Handler, HashBody, HeightBody, Message, NetError, RegisterBody, RegisterResult, Router,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Assemble the coordinator's routing table.
pub fn router<L: Ledger + 'static>(
    db: Arc<L>,
    master: Vec<u8>,
    pending: PendingForge,
) -> Router {
    let authorizer = Arc::new(ChainAuthorizer::new(db.clone()));
    Router::new()
        .route(
            Message::GetBlockchainHeight,
            Arc::new(GetHeight { db: db.clone() }),
        )
        .route(
            Message::GetMissingBlocks,
            Arc::new(GetMissingBlocks { db: db.clone() }),
        )
        .route(Message::GetBlock, Arc::new(GetBlock { db: db.clone() }))
        .route(
            Message::Register,
            Arc::new(Authorized::new(RegisterNode, authorizer)),
        )
        .route(
            Message::BlockForged,
            Arc::new(BlockForged {
                db,
                master,
                pending,
            }),
        )
}

pub struct GetHeight<S> {
    pub db: Arc<S>,
}

#[async_trait]
impl<S: ChainStore + Send + Sync> Handler for GetHeight<S> {
    async fn handle(&self, _ping: &Envelope, _ctx: &ConnContext) -> Result<Envelope, NetError> {
        let height = height(&*self.db)?;
        Envelope::response(&HeightBody { height })
    }
}

pub struct GetBlock<S> {
    pub db: Arc<S>,
}

#[async_trait]
impl<S: ChainStore + Send + Sync> Handler for GetBlock<S> {
    async fn handle(&self, ping: &Envelope, _ctx: &ConnContext) -> Result<Envelope, NetError> {
        let body: HashBody = ping.parse_body()?;
        let block = self.db.block(&body.hash)?;
        Envelope::response(&BlockBody { block })
    }
}

pub struct GetMissingBlocks<S> {
    pub db: Arc<S>,
}

#[async_trait]
impl<S: ChainStore + Send + Sync> Handler for GetMissingBlocks<S> {
    async fn handle(&self, ping: &Envelope, _ctx: &ConnContext) -> Result<Envelope, NetError> {
        let body: HashBody = ping.parse_body()?;
        let mut blocks = Vec::new();
        let mut cursor = self.db.tip()?;
        while let Some(hash) = cursor {
            if hash == body.hash {
                break;
            }
            let Some(block) = self.db.block(&hash)? else {
                break;
            };
            let genesis = block.is_genesis();
            let prev = block.header.prev_hash.clone();
            blocks.push(block);
            if genesis {
                break;
            }
            cursor = Some(prev);
        }
        blocks.reverse();
        Envelope::response(&BlocksBody { blocks })
    }
}

/// Installs an authorized peer into the hub under its announced node id.
pub struct RegisterNode;

#[async_trait]
impl Handler for RegisterNode {
    async fn handle(&self, ping: &Envelope, ctx: &ConnContext) -> Result<Envelope, NetError> {
        let body: RegisterBody = ping.parse_body()?;
        ctx.hub.register(body.node_id.clone(), ctx.handle.clone());
        info!(node = %body.node_id, "node registered");
        Envelope::response(&RegisterResult {
            nodes: ctx.hub.registered_nodes(),
        })
    }
}

/// Takes delivery of a forged block: validated append, expectation
/// settlement and rebroadcast to the remaining peers.
pub struct BlockForged<L> {
    pub db: Arc<L>,
    pub master: Vec<u8>,
    pub pending: PendingForge,
}

#[async_trait]
impl<L: Ledger> Handler for BlockForged<L> {
    async fn handle(&self, ping: &Envelope, ctx: &ConnContext) -> Result<Envelope, NetError> {
        let body: BlockForgedBody = ping.parse_body()?;
        let current = height(&*self.db)?;
        if current + 1 < body.height {
            return Err(NetError::BadRequest(format!(
                "blockchain height {} is too low for block {}",
                current, body.height
            )));
        }
        match self.db.add_new_block(&body.block, &self.master) {
            Ok(_) => {}
            Err(LedgerError::InvalidBlock(reason)) => {
                warn!(reason, "rejecting forged block");
                return Ok(Envelope::disconnect());
            }
            Err(e) => return Err(e.into()),
        }
        info!(height = body.block.header.height, "forged block appended");
        {
            let mut pending = self.pending.lock().unwrap();
            if pending
                .as_ref()
                .is_some_and(|exp| exp.height == body.block.header.height)
            {
                *pending = None;
            }
        }
        ctx.hub.broadcast_except(
            ctx.conn_id,
            Envelope::request(
                Message::BlockForged,
                &BlockForgedBody {
                    height: body.height,
                    block: body.block,
                },
            )?,
        );
        Ok(Envelope::no_action())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ForgeExpectation;
    use ballot_core::Wallet;
    use ballot_ledger::{Block, Party, PartyStore, Transaction, UtxoStore, new_stake_transaction};
    use ballot_net::Hub;
    use ballot_store::LedgerDb;
    use std::sync::Mutex;
    use std::time::Instant;

    struct Setup {
        _dir: tempfile::TempDir,
        db: Arc<LedgerDb>,
        master: Wallet,
        node: Wallet,
        hub: Arc<Hub>,
        pending: PendingForge,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LedgerDb::open(&dir.path().join("db")).unwrap());
        let master = Wallet::generate();
        let node = Wallet::generate();
        crate::genesis::initialize(
            &*db,
            &master,
            std::slice::from_ref(&node),
            &[master.clone()],
            &[Party {
                name: "p".to_string(),
                public_key_hash: vec![7; 20],
            }],
        )
        .unwrap();
        let hub = Arc::new(Hub::new(master.clone()));
        Setup {
            _dir: dir,
            db,
            master,
            node,
            hub,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    fn forged_block(setup: &Setup) -> (Block, Transaction) {
        let stake =
            new_stake_transaction(&*setup.db, &setup.master, setup.node.public_key_hash())
                .unwrap();
        setup.db.accept_transaction(&stake).unwrap();
        let tip = setup.db.tip().unwrap().unwrap();
        let block = Block::new(
            tip,
            1,
            setup.node.public_key_hash().to_vec(),
            vec![stake.clone()],
        )
        .unwrap();
        (block, stake)
    }

    #[tokio::test]
    async fn test_get_height() {
        let setup = setup();
        let handler = GetHeight {
            db: setup.db.clone(),
        };
        let ping = Envelope::request(Message::GetBlockchainHeight, &serde_json::Value::Null)
            .unwrap();
        let ctx = ConnContext::detached(setup.hub.clone());
        let pong = handler.handle(&ping, &ctx).await.unwrap();
        let body: HeightBody = pong.parse_body().unwrap();
        assert_eq!(body.height, 0);
    }

    #[tokio::test]
    async fn test_register_installs_peer() {
        let setup = setup();
        let handler = RegisterNode;
        let ping = Envelope::request(
            Message::Register,
            &RegisterBody {
                node_id: "node-1".to_string(),
            },
        )
        .unwrap();
        let ctx = ConnContext::detached(setup.hub.clone());
        let pong = handler.handle(&ping, &ctx).await.unwrap();
        let body: RegisterResult = pong.parse_body().unwrap();
        assert_eq!(body.nodes, vec!["node-1".to_string()]);
        assert_eq!(setup.hub.registered_nodes(), vec!["node-1".to_string()]);
    }

    #[tokio::test]
    async fn test_block_forged_appends_and_settles_expectation() {
        let setup = setup();
        let (block, stake) = forged_block(&setup);
        *setup.pending.lock().unwrap() = Some(ForgeExpectation {
            forger: "node".to_string(),
            height: 1,
            stake_tx_id: stake.id.clone(),
            issued_at: Instant::now(),
        });
        let handler = BlockForged {
            db: setup.db.clone(),
            master: setup.master.public_key_hash().to_vec(),
            pending: setup.pending.clone(),
        };
        let ping = Envelope::request(
            Message::BlockForged,
            &BlockForgedBody {
                height: 1,
                block: block.clone(),
            },
        )
        .unwrap();
        let ctx = ConnContext::detached(setup.hub.clone());
        let pong = handler.handle(&ping, &ctx).await.unwrap();
        assert_eq!(pong.message, Message::NoAction);
        assert_eq!(height(&*setup.db).unwrap(), 1);
        assert!(setup.pending.lock().unwrap().is_none());

        // forger's stake output is now in its unspent set
        let utxos = setup
            .db
            .utxos_by_public_key(setup.node.public_key_hash())
            .unwrap();
        assert!(utxos.iter().any(|u| u.transaction_id == stake.id));
    }

    #[tokio::test]
    async fn test_block_forged_rejects_invalid_with_disconnect() {
        let setup = setup();
        let (mut block, _) = forged_block(&setup);
        block.header.hash[0] ^= 0xff;
        let handler = BlockForged {
            db: setup.db.clone(),
            master: setup.master.public_key_hash().to_vec(),
            pending: setup.pending.clone(),
        };
        let ping = Envelope::request(Message::BlockForged, &BlockForgedBody { height: 1, block })
            .unwrap();
        let ctx = ConnContext::detached(setup.hub.clone());
        let pong = handler.handle(&ping, &ctx).await.unwrap();
        assert_eq!(pong.message, Message::Disconnect);
        assert_eq!(height(&*setup.db).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_block_forged_rejects_far_future_height() {
        let setup = setup();
        let (block, _) = forged_block(&setup);
        let handler = BlockForged {
            db: setup.db.clone(),
            master: setup.master.public_key_hash().to_vec(),
            pending: setup.pending.clone(),
        };
        let ping = Envelope::request(Message::BlockForged, &BlockForgedBody { height: 5, block })
            .unwrap();
        let ctx = ConnContext::detached(setup.hub.clone());
        assert!(handler.handle(&ping, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_get_missing_blocks_returns_ascending_suffix() {
        let setup = setup();
        let genesis_hash = setup.db.tip().unwrap().unwrap();
        let (block, _) = forged_block(&setup);
        setup.db.add_block(&block).unwrap();

        let handler = GetMissingBlocks {
            db: setup.db.clone(),
        };
        let ping = Envelope::request(
            Message::GetMissingBlocks,
            &HashBody {
                hash: genesis_hash,
            },
        )
        .unwrap();
        let ctx = ConnContext::detached(setup.hub.clone());
        let pong = handler.handle(&ping, &ctx).await.unwrap();
        let body: BlocksBody = pong.parse_body().unwrap();
        assert_eq!(body.blocks.len(), 1);
        assert_eq!(body.blocks[0].header.height, 1);
    }

    #[tokio::test]
    async fn test_router_wires_block_path() {
        let setup = setup();
        let router = router(
            setup.db.clone(),
            setup.master.public_key_hash().to_vec(),
            setup.pending.clone(),
        );
        let tip = setup.db.tip().unwrap().unwrap();
        let ping = Envelope::request(Message::GetBlock, &HashBody { hash: tip }).unwrap();
        let ctx = ConnContext::detached(setup.hub.clone());
        let pong = router.dispatch(&ping, &ctx).await;
        let body: BlockBody = pong.parse_body().unwrap();
        assert!(body.block.is_some_and(|b| b.is_genesis()));
    }

    #[test]
    fn test_setup_has_parties() {
        let setup = setup();
        assert_eq!(setup.db.parties().unwrap().len(), 1);
    }
}
