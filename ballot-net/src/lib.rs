//! Ballot Net - Signed peer protocol over persistent connections
//!
//! Peers exchange JSON envelopes over line-framed TCP. Requests are signed
//! by the sender and routed by message code; responses resolve the oldest
//! pending request on the connection. The hub tracks the authorized peers
//! and offers addressed, random and broadcast sends.

pub mod authorizer;
pub mod connection;
pub mod error;
pub mod hub;
pub mod message;
pub mod router;

pub use authorizer::ChainAuthorizer;
pub use connection::{ConnContext, serve_connection};
pub use error::NetError;
pub use hub::{Hub, NodeId, PeerHandle};
pub use message::{
    BlockBody, BlockForgedBody, BlocksBody, Envelope, ErrorBody, ForgeBlockBody, HashBody,
    HeightBody, Message, RegisterBody, RegisterResult, TransactionReceivedBody,
};
pub use router::{Authorized, Authorizer, Handler, Router};

use std::time::Duration;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, NetError>;

/// Deadline applied to every outbound request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between application-level keepalives
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive keepalive misses tolerated before a peer is dropped
pub const MAX_MISSED_PINGS: u32 = 3;

/// Bound of the per-connection outbound queue
pub const OUTBOUND_QUEUE: usize = 64;
