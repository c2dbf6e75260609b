//! Offline inspection of a persisted arkcash wallet database.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use arkcash_bridge::BridgeConfig;
use arkcash_ledger::{total_amount, KvStore, LedgerConfig, LedgerStorage, SqliteStore};

const DEFAULT_DB_PATH: &str = "arkcash.db";

#[derive(Parser)]
#[command(name = "arkcash-tools", about = "Inspect arkcash wallet state")]
struct Cli {
    /// SQLite database holding wallet state.
    #[arg(long, env = "ARKCASH_DB", default_value = DEFAULT_DB_PATH, global = true)]
    db: PathBuf,
    /// Wallet namespace inside the database.
    #[arg(long, env = "ARKCASH_WALLET_ID", default_value = "default", global = true)]
    wallet: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Balance, counter and time at rest.
    Status(OutputArgs),
    /// List held proofs.
    Proofs(OutputArgs),
    /// Print the backup of the last created token.
    LastToken,
    /// Print the effective configuration resolved from the environment.
    Config,
}

#[derive(Args)]
struct OutputArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct StatusReport {
    wallet: String,
    balance: u64,
    proofs: usize,
    counter: u64,
    used_quotes: usize,
    first_funds_at: Option<String>,
    minutes_at_rest: Option<i64>,
}

#[derive(Serialize)]
struct EffectiveConfig {
    ledger: LedgerConfig,
    bridge: BridgeConfig,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arkcash_tools=info,arkcash_ledger=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Status(args) => status(&open_storage(&cli.db, &cli.wallet)?, args),
        Commands::Proofs(args) => proofs(&open_storage(&cli.db, &cli.wallet)?, args),
        Commands::LastToken => last_token(&open_storage(&cli.db, &cli.wallet)?),
        Commands::Config => print_config(),
    }
}

fn open_storage(db: &Path, wallet: &str) -> Result<LedgerStorage> {
    let store = SqliteStore::open(db)
        .with_context(|| format!("failed to open {}", db.display()))?;
    info!(db = %db.display(), wallet, "opened wallet database");
    Ok(LedgerStorage::new(Arc::new(store) as Arc<dyn KvStore>, wallet))
}

fn status(storage: &LedgerStorage, args: OutputArgs) -> Result<()> {
    let proofs = storage.load_proofs().context("failed to load proofs")?;
    let capacity = LedgerConfig::default().used_quote_capacity;
    let first_funds_at = storage.load_first_funds_at()?;
    let report = StatusReport {
        wallet: storage.wallet_id().to_string(),
        balance: total_amount(&proofs),
        proofs: proofs.len(),
        counter: storage.load_counter().context("failed to load counter")?,
        used_quotes: storage.load_used_quotes(capacity)?.len(),
        first_funds_at: first_funds_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|at| at.to_rfc3339()),
        minutes_at_rest: first_funds_at.map(minutes_since),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("wallet:        {}", report.wallet);
    println!("balance:       {} sat in {} proofs", report.balance, report.proofs);
    println!("counter:       {}", report.counter);
    println!("used quotes:   {}", report.used_quotes);
    match (&report.first_funds_at, report.minutes_at_rest) {
        (Some(since), Some(minutes)) => {
            println!("time at rest:  {minutes} minutes (since {since})")
        }
        _ => println!("time at rest:  -"),
    }
    Ok(())
}

/// Whole minutes elapsed since a Unix millisecond timestamp.
fn minutes_since(at_ms: i64) -> i64 {
    (Utc::now().timestamp_millis() - at_ms).max(0) / 60_000
}

fn proofs(storage: &LedgerStorage, args: OutputArgs) -> Result<()> {
    let proofs = storage.load_proofs().context("failed to load proofs")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&proofs)?);
        return Ok(());
    }
    for proof in &proofs {
        println!("{:>10}  {}  {}", proof.amount, proof.keyset_id, proof.secret);
    }
    println!("{} proofs, {} sat", proofs.len(), total_amount(&proofs));
    Ok(())
}

fn last_token(storage: &LedgerStorage) -> Result<()> {
    match storage.load_last_token()? {
        Some((token, created_at_ms)) => {
            eprintln!("created {} minutes ago", minutes_since(created_at_ms));
            println!("{token}");
        }
        None => eprintln!("no token has been created"),
    }
    Ok(())
}

fn print_config() -> Result<()> {
    let config = EffectiveConfig {
        ledger: LedgerConfig::from_env()?,
        bridge: BridgeConfig::from_env()?,
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_since() {
        let now = Utc::now().timestamp_millis();
        assert_eq!(minutes_since(now - 90 * 60_000), 90);
        assert_eq!(minutes_since(now + 60_000), 0);
    }

    #[test]
    fn test_cli_parses_status_flags() {
        let cli = Cli::try_parse_from([
            "arkcash-tools",
            "status",
            "--db",
            "w.db",
            "--wallet",
            "shadow",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.db, PathBuf::from("w.db"));
        assert_eq!(cli.wallet, "shadow");
        assert!(matches!(cli.command, Commands::Status(OutputArgs { json: true })));
    }
}
