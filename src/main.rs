//! `moneyfi-session`: inspect the persisted session and convert amounts.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use moneyfi_session::auth::{SessionStore, SqliteKeyValueStore};
use moneyfi_session::config::{config_schema, Config};
use moneyfi_session::{format_units, logging, parse_units};

/// MoneyFi session tooling.
#[derive(Parser, Debug)]
#[command(name = "moneyfi-session", version, about = "MoneyFi wallet session tooling")]
struct Cli {
    /// Config file. Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the persisted session and how long it has left.
    Status {
        /// Print the raw record as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Delete the persisted session record.
    Clear,
    /// Exact display/base unit conversion.
    Units {
        #[command(subcommand)]
        action: UnitsCommand,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum UnitsCommand {
    /// Display amount to base units, e.g. `12.5` -> `12500000`.
    Parse {
        amount: String,
        /// Token decimals (defaults to `vault.decimals`).
        #[arg(long)]
        decimals: Option<u8>,
    },
    /// Base units to display amount.
    Format {
        base_units: u128,
        #[arg(long)]
        decimals: Option<u8>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the JSON schema of the configuration file.
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    config.apply_env_overrides()?;
    config.validate()?;
    logging::init(&config.logging.level);

    match cli.command {
        Command::Status { json } => status(&config, json),
        Command::Clear => clear(&config),
        Command::Units { action } => {
            match action {
                UnitsCommand::Parse { amount, decimals } => {
                    let decimals = decimals.unwrap_or(config.vault.decimals);
                    let base = parse_units(&amount, decimals)
                        .with_context(|| format!("Cannot convert '{amount}'"))?;
                    println!("{base}");
                }
                UnitsCommand::Format {
                    base_units,
                    decimals,
                } => {
                    println!(
                        "{}",
                        format_units(base_units, decimals.unwrap_or(config.vault.decimals))
                    );
                }
            }
            Ok(())
        }
        Command::Config { action } => {
            match action {
                ConfigCommand::Show => {
                    let rendered =
                        toml::to_string_pretty(&config).context("Failed to render config")?;
                    print!("{rendered}");
                }
                ConfigCommand::Schema => println!("{}", config_schema()?),
            }
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<Option<SessionStore>> {
    let path = config.storage_path();
    if !path.exists() {
        return Ok(None);
    }
    let kv = SqliteKeyValueStore::open(&path)
        .with_context(|| format!("Failed to open session store at {}", path.display()))?;
    Ok(Some(SessionStore::new(Arc::new(kv), &config.storage)))
}

fn status(config: &Config, json: bool) -> Result<()> {
    let session = open_store(config)?.and_then(|store| store.peek_session());
    let Some(session) = session else {
        println!("No persisted session");
        return Ok(());
    };

    if json {
        let mut value = serde_json::to_value(&session)?;
        // Tokens stay on disk.
        value["accessToken"] = serde_json::Value::String("<redacted>".into());
        if value.get("refreshToken").is_some() {
            value["refreshToken"] = serde_json::Value::String("<redacted>".into());
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let now = Utc::now();
    println!("Address:  {}", session.user.address);
    if let Some(wallet) = &session.user.wallet_name {
        println!("Wallet:   {wallet}");
    }
    println!("Expires:  {}", session.expires_at.to_rfc3339());
    if session.is_valid_at(now) {
        let remaining = session.remaining(now).as_secs();
        println!(
            "Status:   active ({}h {}m left)",
            remaining / 3600,
            (remaining % 3600) / 60
        );
        if session.expires_within(config.session.expiry_buffer(), now) {
            println!("          inside the expiry buffer; the app will sign out on its next check");
        }
    } else {
        println!("Status:   expired");
    }
    Ok(())
}

fn clear(config: &Config) -> Result<()> {
    match open_store(config)? {
        Some(store) => {
            store.clear();
            println!("Cleared persisted session");
        }
        None => println!("No session store at {}", config.storage_path().display()),
    }
    Ok(())
}
