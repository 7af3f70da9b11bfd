//! secure-store CLI - inspect and maintain an encrypted store namespace
//!
//! Operates on the same on-disk namespace the app uses. Commands that touch
//! encrypted values unlock the store first, either with a passphrase (PIN) or
//! with the device default secret when no PIN is configured.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

use secure_store::{
    codec, FileBackend, RekeyOptions, SecureStore, SessionKeyCache, SettingsManager, StoredValue,
};

/// Inspect, migrate and re-key a secure-store namespace
#[derive(Parser, Debug)]
#[command(name = "secure-store")]
#[command(version)]
#[command(about = "Encrypted local storage maintenance")]
struct Args {
    /// Storage directory (defaults to the platform data directory)
    #[arg(long, env = "SECURE_STORE_DIR")]
    data_dir: Option<PathBuf>,

    /// Passphrase used to unlock the store (prompted if omitted)
    #[arg(long, env = "SECURE_STORE_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Unlock with the device default secret instead of a passphrase
    #[arg(long, conflicts_with = "passphrase")]
    device: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show namespace state without unlocking
    Status,
    /// List stored keys
    Keys,
    /// Print the value stored under a key as JSON
    Get { key: String },
    /// Store a value (JSON text; anything else is stored as a string)
    Set { key: String, value: String },
    /// Remove a key
    Rm { key: String },
    /// Delete every entry, including key material
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
    /// Encrypt legacy plaintext entries (defaults to `legacyKeys` from settings)
    Migrate { keys: Vec<String> },
    /// Re-encrypt entries under a new passphrase (defaults to every key)
    Rekey {
        entries: Vec<String>,

        /// New passphrase (prompted if omitted)
        #[arg(long, env = "SECURE_STORE_NEW_PASSPHRASE", hide_env_values = true)]
        new_passphrase: Option<String>,

        /// Derive the new key under a fresh salt
        #[arg(long)]
        fresh_salt: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // logs go to stderr so `get` output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run(args, &mut std::io::stdout()).await
}

async fn run(args: Args, out: &mut impl std::io::Write) -> Result<()> {
    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => FileBackend::default_dir()?,
    };

    let settings = SettingsManager::new(&data_dir).get().clone();
    let backend = FileBackend::open(&data_dir, &settings.namespace)
        .await
        .context("Failed to open storage")?;
    let store = SecureStore::with_settings(Arc::new(backend), SessionKeyCache::new(), &settings);

    match &args.command {
        Command::Status => {
            let material = store.materials().load().await?;
            let keys = store.keys().await?;
            let mut sealed = 0;
            for key in &keys {
                if matches!(store.inspect(key).await, Ok(Some(StoredValue::Sealed(_)))) {
                    sealed += 1;
                }
            }
            writeln!(out, "directory:    {}", data_dir.display())?;
            writeln!(out, "namespace:    {}", settings.namespace)?;
            writeln!(out, "key material: {}", if material.is_some() { "present" } else { "absent" })?;
            writeln!(out, "entries:      {} ({} encrypted, {} plaintext)", keys.len(), sealed, keys.len() - sealed)?;
        }
        Command::Keys => {
            for key in store.keys().await? {
                writeln!(out, "{}", key)?;
            }
        }
        Command::Get { key } => {
            unlock(&store, &args).await?;
            match store.get_item::<Value>(key).await? {
                Some(value) => writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?,
                None => bail!("No readable value for '{}'", key),
            }
        }
        Command::Set { key, value } => {
            unlock(&store, &args).await?;
            store.set_item(key, &codec::parse_lenient(value)).await?;
            info!("Stored '{}'", key);
        }
        Command::Rm { key } => {
            store.remove_item(key).await?;
            info!("Removed '{}'", key);
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("Refusing to wipe the namespace without --yes");
            }
            store.clear_all().await?;
            writeln!(out, "Namespace '{}' cleared", settings.namespace)?;
        }
        Command::Migrate { keys } => {
            unlock(&store, &args).await?;
            let keys = if keys.is_empty() { &settings.legacy_keys } else { keys };
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();

            let report = store.migrate_from_legacy(&keys).await?;
            if report.already_complete {
                writeln!(out, "Migration already completed")?;
            } else {
                writeln!(out, "Migrated {} entries", report.migrated.len())?;
            }
        }
        Command::Rekey {
            entries,
            new_passphrase,
            fresh_salt,
        } => {
            unlock(&store, &args).await?;
            let new_passphrase = match new_passphrase {
                Some(p) => Zeroizing::new(p.clone()),
                None => prompt_new_passphrase()?,
            };
            let entries = if entries.is_empty() {
                store.keys().await?
            } else {
                entries.clone()
            };
            let entries: Vec<&str> = entries.iter().map(String::as_str).collect();

            let report = store
                .rekey(
                    &entries,
                    &new_passphrase,
                    RekeyOptions {
                        fresh_salt: *fresh_salt,
                    },
                )
                .await
                .context("Re-key failed; re-run with the old passphrase to retry")?;

            writeln!(
                out,
                "Re-keyed {} entries ({} absent)",
                report.rewritten.len(),
                report.absent.len()
            )?;
        }
    }

    Ok(())
}

async fn unlock(store: &SecureStore, args: &Args) -> Result<()> {
    if args.device {
        store.arm_with_device_secret().await?;
        return Ok(());
    }

    let passphrase = match &args.passphrase {
        Some(p) => Zeroizing::new(p.clone()),
        None => Zeroizing::new(rpassword::prompt_password("Passphrase: ")?),
    };

    store
        .unlock(&passphrase)
        .await
        .context("Failed to unlock store")
}

fn prompt_new_passphrase() -> Result<Zeroizing<String>> {
    let first = Zeroizing::new(rpassword::prompt_password("New passphrase: ")?);
    let second = Zeroizing::new(rpassword::prompt_password("Repeat new passphrase: ")?);
    if *first != *second {
        bail!("Passphrases do not match");
    }
    Ok(first)
}
