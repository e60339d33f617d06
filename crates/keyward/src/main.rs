#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use keyward::{
    config::{ConfigStore, KeywardConfig},
    keystore::{FileSecretStore, SecretStore},
    paths::KeywardPaths,
    AccountRegistry, KeywardError, LockManager, TransportMode, TransportSelector, Wallet,
};
use secrecy::SecretString;
use std::{
    io::{IsTerminal as _, Write as _},
    sync::Arc,
    time::Duration,
};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "keyward", version)]
struct Cli {
    /// Chain whose transport the signing adapter is configured with.
    #[arg(long, global = true, default_value = "celo")]
    chain: String,

    /// Use the chain's alternate transport instead of the default one.
    ///
    /// Fails hard if the chain has no alternate configured; there is no
    /// silent fallback.
    #[arg(long, global = true, default_value_t = false)]
    alternate_transport: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a self-diagnostic report (safe to paste; contains no secrets).
    Status {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List registered accounts.
    Accounts,

    /// Import a private key into the encrypted keystore.
    ///
    /// The key and password are read from the terminal (or stdin when piped),
    /// never from argv.
    Import,

    /// Verify an account password by performing an unlock.
    ///
    /// Unlock sessions live in process memory only, so the session ends when
    /// this command exits; use this to check a password, not to pre-authorize
    /// another process.
    Unlock {
        /// Account address; defaults to the oldest registered account.
        #[arg(long)]
        address: Option<String>,

        /// Session length in seconds (0 = until the process exits).
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Rotate an account's password (re-encrypts the stored key).
    ChangePassword {
        #[arg(long)]
        address: Option<String>,
    },

    /// Unlock and sign an EIP-191 personal message in one step.
    SignMessage {
        #[arg(long)]
        address: Option<String>,

        /// Message to sign (UTF-8).
        #[arg(long)]
        message: String,

        /// Unlock-session length in seconds; defaults to the configured
        /// `default_unlock_seconds`.
        #[arg(long)]
        unlock_seconds: Option<u64>,
    },
}

fn init_logging(paths: &KeywardPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("keyward.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Read a secret from the terminal without echo, or from stdin when piped
/// (test/CI usage). Secrets never appear in argv.
fn read_secret(prompt: &str) -> eyre::Result<SecretString> {
    if std::io::stdin().is_terminal() {
        let s = rpassword::prompt_password(prompt).context("read secret from terminal")?;
        return Ok(SecretString::new(s.into()));
    }
    let mut line = String::new();
    std::io::BufRead::read_line(&mut std::io::stdin().lock(), &mut line)
        .context("read secret from stdin")?;
    Ok(SecretString::new(line.trim_end_matches(['\r', '\n']).to_owned().into()))
}

fn write_stdout(s: &str) -> eyre::Result<()> {
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")?;
    Ok(())
}

async fn open_wallet(
    paths: &KeywardPaths,
    chain: &str,
    alternate: bool,
) -> eyre::Result<(KeywardConfig, Wallet)> {
    let store: Arc<dyn SecretStore> = Arc::new(FileSecretStore::open(paths)?);
    let registry = Arc::new(AccountRegistry::new(store.clone()));
    let locks = Arc::new(LockManager::new(store));
    let cfg = ConfigStore::new(paths).load_or_init_default()?;

    let selector = TransportSelector::from_config(&cfg);
    let mode = if alternate {
        TransportMode::Alternate
    } else {
        TransportMode::Default
    };
    let transport = selector.get_transport(chain, mode)?.clone();

    let wallet = Wallet::evm(registry, locks, transport);
    wallet.load_existing_accounts().await?;
    Ok((cfg, wallet))
}

fn resolve_address(wallet: &Wallet, address: Option<String>) -> eyre::Result<String> {
    if let Some(a) = address {
        if !wallet.has_account(Some(&a)) {
            return Err(KeywardError::AccountNotFound(a).into());
        }
        return Ok(a);
    }
    wallet
        .get_accounts()
        .into_iter()
        .next()
        .ok_or_else(|| eyre::eyre!("no accounts registered; run `keyward import` first"))
}

fn unlock_duration(cfg: &KeywardConfig, seconds: Option<u64>) -> Duration {
    Duration::from_secs(seconds.unwrap_or(cfg.default_unlock_seconds))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = KeywardPaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Paths => {
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }))
            .context("serialize paths")?;
            write_stdout(&s)
        }
        Command::Status { json } => {
            let (cfg, wallet) = open_wallet(&paths, &cli.chain, cli.alternate_transport).await?;
            let chains: Vec<String> = TransportSelector::from_config(&cfg)
                .chains()
                .map(str::to_owned)
                .collect();
            let accounts: Vec<serde_json::Value> = wallet
                .load_existing_accounts()
                .await?
                .iter()
                .map(|a| {
                    serde_json::json!({
                        "address": a.address,
                        "created_at": a.created_at.to_rfc3339(),
                        "unlocked": wallet.is_account_unlocked(&a.address),
                    })
                })
                .collect();
            let report = serde_json::json!({
                "ok": true,
                "version": env!("CARGO_PKG_VERSION"),
                "chain": wallet.transport().chain,
                "configured_chains": chains,
                "paths": {
                    "config_dir": paths.config_dir,
                    "data_dir": paths.data_dir,
                },
                "accounts": accounts,
            });
            if json {
                return write_stdout(&serde_json::to_string(&report).context("serialize status")?);
            }
            write_stdout(&serde_json::to_string_pretty(&report).context("serialize status")?)
        }
        Command::Accounts => {
            let (_cfg, wallet) = open_wallet(&paths, &cli.chain, cli.alternate_transport).await?;
            for account in wallet.load_existing_accounts().await? {
                let line = serde_json::to_string(&serde_json::json!({
                    "address": account.address,
                    "created_at": account.created_at.to_rfc3339(),
                }))
                .context("serialize account")?;
                write_stdout(&line)?;
            }
            Ok(())
        }
        Command::Import => {
            let (_cfg, wallet) = open_wallet(&paths, &cli.chain, cli.alternate_transport).await?;
            let key = read_secret("private key (hex): ")?;
            let password = read_secret("password: ")?;
            if std::io::stdin().is_terminal() {
                use secrecy::ExposeSecret as _;
                let confirm = read_secret("confirm password: ")?;
                if password.expose_secret() != confirm.expose_secret() {
                    eyre::bail!("passwords do not match");
                }
            }
            let address = wallet.add_account(&key, &password).await?;
            write_stdout(
                &serde_json::to_string(&serde_json::json!({ "address": address }))
                    .context("serialize import result")?,
            )
        }
        Command::Unlock { address, seconds } => {
            let (cfg, wallet) = open_wallet(&paths, &cli.chain, cli.alternate_transport).await?;
            let address = resolve_address(&wallet, address)?;
            let password = read_secret("password: ")?;
            let unlocked = wallet
                .unlock_account(&address, &password, unlock_duration(&cfg, seconds))
                .await?;
            write_stdout(
                &serde_json::to_string(
                    &serde_json::json!({ "address": address, "unlocked": unlocked }),
                )
                .context("serialize unlock result")?,
            )
        }
        Command::ChangePassword { address } => {
            let (_cfg, wallet) = open_wallet(&paths, &cli.chain, cli.alternate_transport).await?;
            let address = resolve_address(&wallet, address)?;
            let old_password = read_secret("current password: ")?;
            let new_password = read_secret("new password: ")?;
            if std::io::stdin().is_terminal() {
                use secrecy::ExposeSecret as _;
                let confirm = read_secret("confirm new password: ")?;
                if new_password.expose_secret() != confirm.expose_secret() {
                    eyre::bail!("passwords do not match");
                }
            }
            if !wallet
                .update_account(&address, &old_password, &new_password)
                .await?
            {
                eyre::bail!("wrong password for {address}");
            }
            write_stdout(
                &serde_json::to_string(&serde_json::json!({ "address": address, "updated": true }))
                    .context("serialize update result")?,
            )
        }
        Command::SignMessage {
            address,
            message,
            unlock_seconds,
        } => {
            let (cfg, wallet) = open_wallet(&paths, &cli.chain, cli.alternate_transport).await?;
            let address = resolve_address(&wallet, address)?;
            let password = read_secret("password: ")?;
            let unlocked = wallet
                .unlock_account(&address, &password, unlock_duration(&cfg, unlock_seconds))
                .await?;
            if !unlocked {
                eyre::bail!("wrong password for {address}");
            }
            let signature = wallet.sign_message(&address, message.as_bytes()).await?;
            write_stdout(
                &serde_json::to_string(&serde_json::json!({
                    "address": address,
                    "message": message,
                    "signature": format!("0x{}", hex::encode(signature.as_bytes())),
                }))
                .context("serialize signature")?,
            )
        }
    }
}
