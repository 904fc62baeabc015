//! Message routing and handler authorization

use crate::connection::ConnContext;
use crate::message::{Envelope, Message};
use crate::{NetError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A routed message handler. Returning an error produces an `error` pong
/// carrying the error's stable code.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ping: &Envelope, ctx: &ConnContext) -> Result<Envelope>;
}

/// Pre-flight check run before a wrapped handler sees the ping.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, ping: &Envelope) -> Result<()>;
}

/// A handler gated behind an authorizer.
pub struct Authorized<H> {
    inner: H,
    authorizer: Arc<dyn Authorizer>,
}

impl<H> Authorized<H> {
    pub fn new(inner: H, authorizer: Arc<dyn Authorizer>) -> Self {
        Authorized { inner, authorizer }
    }
}

#[async_trait]
impl<H: Handler> Handler for Authorized<H> {
    async fn handle(&self, ping: &Envelope, ctx: &ConnContext) -> Result<Envelope> {
        self.authorizer.authorize(ping)?;
        self.inner.handle(ping, ctx).await
    }
}

/// Dispatch table from message code to handler.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<Message, Arc<dyn Handler>>,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    pub fn route(mut self, message: Message, handler: Arc<dyn Handler>) -> Router {
        self.handlers.insert(message, handler);
        self
    }

    /// Run the handler registered for the ping's message code. Errors are
    /// folded into an `error` pong so the peer always gets an answer.
    pub async fn dispatch(&self, ping: &Envelope, ctx: &ConnContext) -> Envelope {
        let Some(handler) = self.handlers.get(&ping.message) else {
            return Envelope::error("UnknownMessage", &format!("no handler for {}", ping.message));
        };
        match handler.handle(ping, ctx).await {
            Ok(pong) => pong,
            Err(e) => {
                warn!(message = %ping.message, error = %e, "handler failed");
                Envelope::error(e.code(), &e.to_string())
            }
        }
    }
}
