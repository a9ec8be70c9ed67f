//! vault-node: the Vault escrow node binary.
//!
//! Startup sequence:
//!   1. Resolve configuration (config file + command-line overrides)
//!   2. Open (or initialise) the state database
//!   3. Credit genesis balances if the store is fresh
//!   4. Build the grant registry (owner is checked against the store)
//!   5. Start the JSON-RPC 2.0 server
//!   6. Run the main loop: apply queued calls one at a time

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info};

use vault_core::policy::WithdrawPolicy;
use vault_core::types::AccountId;
use vault_rpc::{RpcServer, RpcServerState, VaultCall};
use vault_state::{GrantRegistry, LedgerTransfer, StateDb, SystemClock, TracingSink};

use crate::config::NodeConfig;

#[derive(Parser, Debug)]
#[command(
    name = "vault-node",
    version,
    about = "Vault node: time-locked custodial grants over JSON-RPC"
)]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.vault/data")]
    data_dir: PathBuf,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8545")]
    rpc_addr: SocketAddr,

    /// Path to a node config JSON (owner, withdraw policy, genesis balances).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Controlling principal (base-58, or @label for a dev account).
    /// Overrides the config file.
    #[arg(long)]
    owner: Option<AccountId>,

    /// Who may trigger a withdrawal: owner, beneficiary,
    /// owner-or-beneficiary, donor-or-beneficiary, anyone.
    #[arg(long)]
    withdraw_policy: Option<WithdrawPolicy>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vault=debug")),
        )
        .init();

    let args = Args::parse();
    info!("Vault node starting");

    // ── Configuration ─────────────────────────────────────────────────────────
    let file = match &args.config {
        Some(path) => Some(NodeConfig::load(&expand_tilde(path))?),
        None => None,
    };
    let cfg = NodeConfig::resolve(file, args.owner.clone(), args.withdraw_policy)?;

    // ── State database ────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let db = Arc::new(StateDb::open(&data_dir).context("opening state database")?);
    let ledger = Arc::new(LedgerTransfer::new(Arc::clone(&db)));

    // ── Genesis balances if fresh ─────────────────────────────────────────────
    let genesis = cfg
        .genesis_balances
        .iter()
        .map(|entry| entry.amount().map(|amount| (entry.account.clone(), amount)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if db.apply_genesis(&genesis).context("crediting genesis balances")? {
        for (account, amount) in &genesis {
            info!(account = %account, amount, "genesis balance credited");
        }
    } else {
        info!("existing database found, skipping genesis balances");
    }

    // ── Registry ──────────────────────────────────────────────────────────────
    let registry = Arc::new(
        GrantRegistry::new(
            Arc::clone(&db),
            &cfg.vault,
            Arc::new(SystemClock::new()),
            ledger,
            Arc::new(TracingSink),
        )
        .context("opening grant registry")?,
    );

    // ── Call queue ────────────────────────────────────────────────────────────
    let (call_sender, mut call_receiver) = mpsc::channel::<VaultCall>(512);

    // ── RPC server ────────────────────────────────────────────────────────────
    let rpc_state = Arc::new(RpcServerState {
        registry: Arc::clone(&registry),
        call_sender: Some(call_sender),
        node_version: env!("CARGO_PKG_VERSION").to_string(),
    });
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_state)
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    // ── Main loop: apply calls ────────────────────────────────────────────────
    info!(%rpc_addr, owner = %registry.owner(), policy = %registry.withdraw_policy(), "node ready");
    loop {
        tokio::select! {
            call = call_receiver.recv() => {
                let Some(call) = call else { break };
                let name = call.name();
                call.apply(&registry);
                debug!(call = name, "call applied");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    let _ = rpc_handle.stop();
    db.flush()?;
    info!("node stopped");
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
