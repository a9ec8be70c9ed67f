//! vault-wallet
//!
//! CLI client for a Vault node. Submits grant offers and withdrawals and
//! queries registry state over JSON-RPC.
//!
//! Usage:
//!   vault-wallet --as <account> offer    --beneficiary <account> --amount <units> (--unlock-at <unix> | --in <secs>)
//!   vault-wallet --as <account> withdraw <grant-id>
//!   vault-wallet grant    <grant-id>
//!   vault-wallet grants   [--offset N] [--limit N] [--beneficiary <account> | --donor <account>]
//!   vault-wallet describe <grant-id>
//!   vault-wallet balance  [--account <account>]
//!   vault-wallet owner | custody | audit | info
//!   vault-wallet events   [--offset N] [--limit N]
//!   vault-wallet account  <account>
//!
//! Accounts are base-58 ids, or `@label` for a dev account derived from a label.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use vault_core::constants::{DEFAULT_PAGE_SIZE, UNITS_PER_COIN};
use vault_core::types::{AccountId, Balance, GrantId, Timestamp};
use vault_rpc::{RpcEvent, RpcGrant};

mod rpc_client;
use rpc_client::WalletRpcClient;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "vault-wallet",
    version,
    about = "Vault wallet: offer, withdraw and inspect time-locked grants"
)]
struct Args {
    /// Node RPC endpoint.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8545")]
    rpc: String,

    /// Account acting as the caller (base-58 or @label).
    #[arg(long = "as", global = true)]
    caller: Option<AccountId>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deposit value for a beneficiary until an unlock time.
    Offer {
        #[arg(long)]
        beneficiary: AccountId,
        /// Amount in base units.
        #[arg(long)]
        amount: Balance,
        /// Unlock Unix timestamp (UTC seconds).
        #[arg(long, conflicts_with = "unlock_in", required_unless_present = "unlock_in")]
        unlock_at: Option<Timestamp>,
        /// Unlock this many seconds after the node's current time.
        #[arg(long = "in")]
        unlock_in: Option<i64>,
    },

    /// Release an unlocked grant to its beneficiary.
    Withdraw { grant_id: u64 },

    /// Show one grant.
    Grant { grant_id: u64 },

    /// List grants, optionally for one beneficiary or donor.
    Grants {
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
        #[arg(long, conflicts_with = "donor")]
        beneficiary: Option<AccountId>,
        #[arg(long)]
        donor: Option<AccountId>,
    },

    /// Human-readable grant summary.
    Describe { grant_id: u64 },

    /// Ledger balance. Defaults to the --as account.
    Balance {
        #[arg(long)]
        account: Option<AccountId>,
    },

    /// Print the vault owner.
    Owner,

    /// Value currently held in custody.
    Custody,

    /// Check custody against the sum of active grants.
    Audit,

    /// Print node and registry info.
    Info,

    /// Print the event log.
    Events {
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
    },

    /// Print the base-58 id of an account (resolves @label locally).
    Account { account: AccountId },
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,vault_wallet=info")
        .init();

    let args = Args::parse();
    debug!(rpc = %args.rpc, "wallet starting");
    let client = WalletRpcClient::new(&args.rpc);

    match args.command {
        Command::Offer { beneficiary, amount, unlock_at, unlock_in } => {
            let caller = require_caller(args.caller.as_ref())?;
            let unlock_at = match (unlock_at, unlock_in) {
                (Some(t), _) => t,
                (None, Some(secs)) => client.get_info().await?.now + secs,
                (None, None) => anyhow::bail!("pass --unlock-at or --in"),
            };
            let id = client
                .offer_grant(caller, &beneficiary, unlock_at, amount)
                .await?;
            println!("Grant offered: {}", id);
            println!("  beneficiary: {}", beneficiary);
            println!("  amount:      {}", format_amount(amount));
            println!("  unlocks:     {}", format_time(unlock_at));
            Ok(())
        }

        Command::Withdraw { grant_id } => {
            let caller = require_caller(args.caller.as_ref())?;
            client.withdraw(caller, GrantId(grant_id)).await?;
            println!("Grant {} withdrawn", grant_id);
            Ok(())
        }

        Command::Grant { grant_id } => {
            match client.get_grant(GrantId(grant_id)).await? {
                Some(g) => print_grant(&g),
                None => println!("Grant {} not found", grant_id),
            }
            Ok(())
        }

        Command::Grants { offset, limit, beneficiary, donor } => {
            let grants = match (beneficiary, donor) {
                (Some(b), _) => client.get_grants_by_beneficiary(&b).await?,
                (None, Some(d)) => client.get_grants_by_donor(&d).await?,
                (None, None) => client.get_grants(offset, limit).await?,
            };
            if grants.is_empty() {
                println!("No grants");
            }
            for g in &grants {
                println!(
                    "{:>6}  {:<9}  {:>24}  unlocks {}  -> {}",
                    g.grant_id,
                    g.status,
                    g.amount,
                    format_time(g.unlock_at),
                    g.beneficiary
                );
            }
            Ok(())
        }

        Command::Describe { grant_id } => {
            println!("{}", client.describe_grant(GrantId(grant_id)).await?);
            Ok(())
        }

        Command::Balance { account } => {
            let account = match account {
                Some(a) => a,
                None => require_caller(args.caller.as_ref())?.clone(),
            };
            let bal = client.get_balance(&account).await?;
            println!("Account:  {}", account);
            println!("Balance:  {}", format_amount(bal));
            Ok(())
        }

        Command::Owner => {
            println!("{}", client.owner().await?);
            Ok(())
        }

        Command::Custody => {
            println!("Custody: {}", format_amount(client.get_custody().await?));
            Ok(())
        }

        Command::Audit => {
            let custody = client.audit().await.context("custody audit")?;
            println!("Custody consistent: {}", format_amount(custody));
            Ok(())
        }

        Command::Info => {
            let info = client.get_info().await?;
            println!("Protocol:        {} (API v{})", info.protocol, info.api_version);
            println!("Node version:    {}", info.node_version);
            println!("Owner:           {}", info.owner);
            println!("Withdraw policy: {}", info.withdraw_policy);
            println!("Grants:          {}", info.grant_count);
            println!("Events:          {}", info.event_count);
            println!("Custody:         {} units", info.custody);
            println!("Node time:       {}", format_time(info.now));
            Ok(())
        }

        Command::Events { offset, limit } => {
            for e in client.get_events(offset, limit).await? {
                println!("{}", format_event(&e));
            }
            Ok(())
        }

        Command::Account { account } => {
            println!("{}", account);
            Ok(())
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn require_caller(caller: Option<&AccountId>) -> anyhow::Result<&AccountId> {
    caller.context("this command needs a caller: pass --as <account>")
}

/// Base units with the whole-coin value alongside, e.g. `1500000000 (1.5 coins)`.
fn format_amount(units: Balance) -> String {
    let whole = units / UNITS_PER_COIN;
    let frac = units % UNITS_PER_COIN;
    if frac == 0 {
        return format!("{} ({} coins)", units, whole);
    }
    let frac = format!("{:09}", frac);
    format!("{} ({}.{} coins)", units, whole, frac.trim_end_matches('0'))
}

fn format_time(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|d| format!("{} ({})", d.format("%Y-%m-%d %H:%M:%S UTC"), ts))
        .unwrap_or_else(|| ts.to_string())
}

fn print_grant(g: &RpcGrant) {
    println!("Grant:        {}", g.grant_id);
    println!("Status:       {}", g.status);
    println!("Donor:        {}", g.donor);
    println!("Beneficiary:  {}", g.beneficiary);
    println!("Amount:       {} units", g.amount);
    println!("Created:      {}", format_time(g.created_at));
    println!("Unlocks:      {}", format_time(g.unlock_at));
    if let Some(at) = g.withdrawn_at {
        println!("Withdrawn:    {}", format_time(at));
    }
}

fn format_event(e: &RpcEvent) -> String {
    match e.kind.as_str() {
        "GrantOffered" => format!(
            "[{}] GrantOffered   #{} {} units from {} to {} (unlocks {})",
            e.at,
            e.grant_id,
            e.amount,
            e.donor.as_deref().unwrap_or("?"),
            e.beneficiary,
            e.unlock_at.map(|t| t.to_string()).unwrap_or_default()
        ),
        _ => format!(
            "[{}] {} #{} {} units to {} (by {})",
            e.at,
            e.kind,
            e.grant_id,
            e.amount,
            e.beneficiary,
            e.by.as_deref().unwrap_or("?")
        ),
    }
}
