//! Chain-backed sender authorization
//!
//! A sender is chain-authorized when some block pays its public-key hash,
//! which is true exactly for the wallets provisioned at genesis.

use crate::message::Envelope;
use crate::router::Authorizer;
use crate::{NetError, Result};
use ballot_core::hashed_public_key;
use ballot_ledger::{ChainStore, find_block};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::sync::Arc;
use tracing::debug;

pub struct ChainAuthorizer<S> {
    store: Arc<S>,
}

impl<S> ChainAuthorizer<S> {
    pub fn new(store: Arc<S>) -> ChainAuthorizer<S> {
        ChainAuthorizer { store }
    }
}

impl<S: ChainStore + Send + Sync> Authorizer for ChainAuthorizer<S> {
    fn authorize(&self, ping: &Envelope) -> Result<()> {
        let sender = ping
            .sender
            .as_deref()
            .ok_or_else(|| NetError::Unauthorized("missing sender".to_string()))?;
        let public_key = BASE64
            .decode(sender.as_bytes())
            .map_err(|_| NetError::Unauthorized("invalid public key".to_string()))?;
        if !ping.verified() {
            return Err(NetError::Unauthorized(
                "signature does not match the payload".to_string(),
            ));
        }
        let hash = hashed_public_key(&public_key);
        match find_block(&*self.store, |block| block.pays_to(&hash))? {
            Some(_) => {
                debug!(sender = %sender, "authorized successfully");
                Ok(())
            }
            None => Err(NetError::Unauthorized(format!(
                "node {} does not exist",
                sender
            ))),
        }
    }
}
