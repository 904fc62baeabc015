//! Per-connection reader and writer tasks
//!
//! Each peer connection runs one reader task (this function) and one
//! writer task draining the bounded outbound queue. Incoming frames are
//! either responses, resolved against the connection's pending requests,
//! or requests dispatched through the router. The reply is written back
//! unless the handler returned `no-action`; a `disconnect` reply is
//! written and then the connection closes.

use crate::OUTBOUND_QUEUE;
use crate::hub::{Hub, PeerHandle};
use crate::message::{Envelope, Message};
use crate::router::Router;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Connection-scoped state handed to handlers.
pub struct ConnContext {
    pub conn_id: u64,
    pub handle: PeerHandle,
    pub hub: Arc<Hub>,
}

impl ConnContext {
    /// A context without a live socket, for handlers under test.
    pub fn detached(hub: Arc<Hub>) -> ConnContext {
        let handle = PeerHandle::detached();
        ConnContext {
            conn_id: handle.conn_id(),
            handle,
            hub,
        }
    }
}

fn send_reply(handle: &PeerHandle, hub: &Hub, mut pong: Envelope) -> bool {
    if pong.sign(hub.signer()).is_err() {
        return false;
    }
    handle.send(&pong).is_ok()
}

/// Serve one peer connection until it closes.
pub async fn serve_connection(socket: TcpStream, router: Arc<Router>, hub: Arc<Hub>) {
    let peer = socket
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    debug!(conn_id, peer = %peer, "connection open");

    let (read_half, mut write_half) = socket.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let handle = PeerHandle::new(conn_id, out_tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if write_half.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let ctx = ConnContext {
        conn_id,
        handle: handle.clone(),
        hub: hub.clone(),
    };
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            _ = handle.closed() => break,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(conn_id, error = %e, "read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let envelope: Envelope = match serde_json::from_str(&line) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(conn_id, error = %e, "malformed frame");
                        send_reply(&handle, &hub, Envelope::error("BadRequest", "malformed frame"));
                        continue;
                    }
                };
                if envelope.message.is_reply() {
                    if !handle.resolve(envelope) {
                        debug!(conn_id, "response without a pending request");
                    }
                    continue;
                }
                if envelope.message == Message::CloseConnection {
                    break;
                }
                let pong = router.dispatch(&envelope, &ctx).await;
                match pong.message {
                    Message::NoAction => {}
                    Message::Disconnect => {
                        send_reply(&handle, &hub, pong);
                        break;
                    }
                    // failed registration closes the connection
                    Message::Error if envelope.message == Message::Register => {
                        send_reply(&handle, &hub, pong);
                        break;
                    }
                    _ => {
                        if !send_reply(&handle, &hub, pong) {
                            break;
                        }
                    }
                }
            }
        }
    }

    hub.unregister(conn_id);
    handle.fail_pending();
    debug!(conn_id, peer = %peer, "connection closed");
    drop(ctx);
    drop(handle);
    let _ = writer.await;
}
