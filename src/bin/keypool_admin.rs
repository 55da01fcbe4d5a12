//! Administrative CLI for the key pool.
//!
//! Talks to the database directly using the same configuration as the service.

use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use keypool::{
    config::ConfigLoader,
    crypto::CryptoKey,
    db,
    pool::{KeyLeasePool, LeasePolicy},
    repositories::{ApiKeyRepository, ApiKeySummary, NewApiKey},
};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "keypool-admin", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a key; the secret is read from stdin unless --secret is given
    Add {
        #[arg(short, long)]
        provider: String,
        #[arg(short, long, default_value = "free")]
        tier: String,
        #[arg(short = 'n', long)]
        display_name: Option<String>,
        #[arg(long)]
        secret: Option<String>,
    },
    /// List keys with masked secrets
    List {
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Put a key back into rotation
    Enable { id: Uuid },
    /// Take a key out of rotation
    Disable { id: Uuid },
    /// Return a rate-limited key to service
    ClearRateLimit { id: Uuid },
    /// Per-provider key counts and usage
    Stats,
    /// Show the order keys would be leased in
    Preview { provider: String },
    /// Seal secrets still stored as plaintext
    Reseal,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    let key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

    let db = Arc::new(
        db::init_pool(&config)
            .await
            .context("initializing database connection pool")?,
    );
    let keys = ApiKeyRepository::new(Arc::clone(&db), crypto_key.clone());

    match cli.command {
        Command::Add {
            provider,
            tier,
            display_name,
            secret,
        } => {
            let secret = match secret {
                Some(secret) => secret,
                None => read_secret_from_stdin()?,
            };
            let summary = keys
                .create(NewApiKey {
                    provider,
                    secret,
                    display_name,
                    tier: Some(tier),
                })
                .await?;
            println!("Registered {}", summary.id);
            print_key(&summary);
        }
        Command::List { provider } => {
            let listed = keys.list(provider.as_deref()).await?;
            if listed.is_empty() {
                println!("No keys registered");
            }
            for summary in &listed {
                print_key(summary);
            }
        }
        Command::Enable { id } => print_key(&keys.set_active(id, true).await?),
        Command::Disable { id } => print_key(&keys.set_active(id, false).await?),
        Command::ClearRateLimit { id } => print_key(&keys.clear_rate_limit(id).await?),
        Command::Stats => {
            println!(
                "{:<16} {:>6} {:>7} {:>13} {:>10} {:>8}",
                "provider", "total", "active", "rate_limited", "usage", "errors"
            );
            for stats in keys.stats().await? {
                println!(
                    "{:<16} {:>6} {:>7} {:>13} {:>10} {:>8}",
                    stats.provider,
                    stats.total_keys,
                    stats.active_keys,
                    stats.rate_limited_keys,
                    stats.total_usage,
                    stats.total_errors
                );
            }
        }
        Command::Preview { provider } => {
            let pool = KeyLeasePool::new(db, crypto_key, LeasePolicy::from(&config.lease));
            let candidates = pool.preview(&provider).await?;
            if candidates.is_empty() {
                println!("No eligible keys for {}", provider);
            }
            for (position, candidate) in candidates.iter().enumerate() {
                println!(
                    "{:>3}. {} [{} rank {}] used {} times, last {}",
                    position + 1,
                    candidate.display_name,
                    candidate.tier,
                    candidate.tier_rank,
                    candidate.usage_count,
                    candidate
                        .last_used_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string())
                );
            }
        }
        Command::Reseal => {
            let resealed = keys.reseal_plaintext().await?;
            println!("Sealed {} plaintext secret(s)", resealed);
        }
    }

    Ok(())
}

fn read_secret_from_stdin() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading secret from stdin")?;
    let secret = line.trim().to_string();
    if secret.is_empty() {
        bail!("no secret provided on stdin");
    }
    Ok(secret)
}

fn print_key(summary: &ApiKeySummary) {
    let status = match (summary.is_active, summary.is_rate_limited) {
        (false, _) => "disabled",
        (true, true) => "rate-limited",
        (true, false) => "active",
    };
    println!(
        "{}  {:<12} {:<6} {:<12} {}  uses={} errors={}  {}",
        summary.id,
        summary.provider,
        summary.tier,
        status,
        summary.masked_secret,
        summary.usage_count,
        summary.error_count,
        summary.display_name
    );
}
