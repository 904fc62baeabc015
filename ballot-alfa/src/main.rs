//! alfa - coordinator of the electoral voting blockchain
//!
//! Bootstraps the ledger, optionally rebuilding it from genesis, then runs
//! three surfaces in parallel: the peer socket for validator nodes, the
//! voter HTTP API and the forger-election scheduler.

mod api;
mod genesis;
mod handlers;
mod scheduler;

use anyhow::Context;
use ballot_core::{Wallet, import_multiple, scan_key_directory};
use ballot_net::{Hub, serve_connection};
use ballot_store::LedgerDb;
use clap::Parser;
use scheduler::Coordinator;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Peer socket port for validator nodes
const PEER_PORT: u16 = 10000;

/// Voter HTTP API port
const API_PORT: u16 = 8000;

/// Grace allowed to in-flight requests on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "alfa")]
#[command(about = "Coordinator node for the electoral voting blockchain")]
struct Cli {
    /// Delete any existing store and rebuild from genesis
    #[arg(long)]
    new: bool,

    /// Coordinator private key file
    #[arg(long, default_value = "alfa/key.pem")]
    private: PathBuf,

    /// Coordinator public key file
    #[arg(long, default_value = "alfa/key_pub.pem")]
    public: PathBuf,

    /// Voter key pair directory
    #[arg(long, default_value = "clients")]
    clients: PathBuf,

    /// Validator key pair directory
    #[arg(long, default_value = "nodes")]
    nodes: PathBuf,

    /// Party public key directory
    #[arg(long, default_value = "parties")]
    parties: PathBuf,

    /// Store location
    #[arg(long, default_value = "db")]
    db: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.new {
        LedgerDb::destroy(&cli.db).context("remove existing store")?;
    }
    let db = Arc::new(LedgerDb::open(&cli.db).context("open store")?);

    let master = Wallet::import(&cli.public, &cli.private).context("load master wallet")?;
    let client_wallets = import_multiple(&scan_key_directory(&cli.clients)?)
        .context("import client wallets")?;
    let node_wallets =
        import_multiple(&scan_key_directory(&cli.nodes)?).context("import node wallets")?;
    let parties = genesis::load_parties(&cli.parties).context("load parties")?;

    if cli.new {
        genesis::initialize(&*db, &master, &node_wallets, &client_wallets, &parties)
            .context("initialize blockchain")?;
    }
    genesis::log_chain(&*db)?;

    let hub = Arc::new(Hub::new(master.clone()));
    let pending = Arc::new(Mutex::new(None));
    let coordinator = Arc::new(Coordinator::new(
        db.clone(),
        hub.clone(),
        master.clone(),
        pending.clone(),
    ));
    let scheduler_task = tokio::spawn(coordinator.run());
    let keepalive_task = tokio::spawn(hub.clone().keepalive_loop());

    let router = Arc::new(handlers::router(
        db.clone(),
        master.public_key_hash().to_vec(),
        pending,
    ));
    let peer_listener = TcpListener::bind(("0.0.0.0", PEER_PORT))
        .await
        .with_context(|| format!("bind peer socket on port {}", PEER_PORT))?;
    info!(port = PEER_PORT, "peer socket listening");
    let peer_hub = hub.clone();
    let peer_task = tokio::spawn(async move {
        loop {
            match peer_listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(serve_connection(
                        socket,
                        router.clone(),
                        peer_hub.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    });

    let api_state = api::ApiState {
        db: db.clone(),
        hub: hub.clone(),
    };
    let api_listener = TcpListener::bind(("0.0.0.0", API_PORT))
        .await
        .with_context(|| format!("bind voter api on port {}", API_PORT))?;
    info!(port = API_PORT, "voter api listening");
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let api_task = tokio::spawn(async move {
        axum::serve(api_listener, api::router(api_state))
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    signal::ctrl_c().await.context("listen for shutdown")?;
    info!("shutting down");

    scheduler_task.abort();
    keepalive_task.abort();
    peer_task.abort();
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(SHUTDOWN_GRACE, api_task).await.is_err() {
        warn!("voter api did not drain in time");
    }
    db.flush().context("flush store")?;
    info!("store closed");
    Ok(())
}
