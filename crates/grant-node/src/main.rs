//! grant-node — the grant engine's node binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the event-sourced state database
//!   2. Build the transactional kernel (`GrantEngine`) over it
//!   3. Spawn the tentative-voucher sweeper as a background task
//!   4. Start the JSON-RPC 2.0 facade
//!   5. Run until a shutdown signal is received

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use grant_core::constants::DEFAULT_SWEEP_INTERVAL_SECS;
use grant_rpc::server::RpcServerState;
use grant_rpc::RpcServer;
use grant_store::{GrantDb, GrantEngine};

#[derive(Parser, Debug)]
#[command(
    name = "grant-node",
    version,
    about = "Grant engine node — the event-sourced ledger for a spay/neuter voucher program"
)]
struct Args {
    /// Directory for the persistent sled database.
    #[arg(long, default_value = "~/.grant-node/data")]
    data_dir: PathBuf,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8645")]
    rpc_addr: SocketAddr,

    /// How often the tentative-voucher sweeper runs, in seconds.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,grant=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("grant-node starting");

    // ── State database ────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let db = Arc::new(GrantDb::open(&data_dir).context("opening grant database")?);
    let engine = Arc::new(GrantEngine::new(Arc::clone(&db)));

    // ── Tentative-voucher sweeper ─────────────────────────────────────────────
    let sweep_engine = Arc::clone(&engine);
    let sweep_interval = Duration::from_secs(args.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            match sweep_engine.sweep_tentative_vouchers(now) {
                Ok(0) => {}
                Ok(n) => info!(released = n, "tentative voucher sweep released expired reservations"),
                Err(e) => error!(error = %e, "tentative voucher sweep failed"),
            }
        }
    });

    // ── RPC server ────────────────────────────────────────────────────────────
    let rpc_state = Arc::new(RpcServerState { engine: Arc::clone(&engine) });
    let rpc_handle = RpcServer::new(rpc_state)
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    info!("grant-node ready");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    let _ = rpc_handle.stop();

    Ok(())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
