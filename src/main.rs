//! SudoSOS QR login server
//!
//! Lets members log in on a SudoSOS kiosk by scanning a QR code with a
//! device where they are already signed in.

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use sudosos_auth::{
    AccountStore, Clock, FileSessionStore, MemorySessionStore, QrAuthService, SessionStore,
    SystemClock, TokenRegistry, UserId,
};
use sudosos_core::Config;
use sudosos_server::{
    create_router, load_tls, AppState, BroadcastNotifier, EVENT_CAPACITY,
};
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// SudoSOS - QR code login for point-of-sale kiosks
#[derive(Parser, Debug)]
#[command(name = "sudosos")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Server port
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Seconds a QR session stays pending
    #[arg(long, default_value = "300")]
    session_ttl: i64,

    /// Seconds an issued login token stays valid
    #[arg(long, default_value = "3600")]
    token_ttl: i64,

    /// Public base URL encoded in QR codes
    #[arg(long, default_value = "http://localhost:3000")]
    public_url: String,

    /// Directory for accounts and sessions (default: ~/.config/sudosos)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep QR sessions on disk across restarts
    #[arg(long)]
    persist_sessions: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account that may confirm QR logins and print its API key
    AddAccount {
        /// Display name of the account
        name: String,
    },
    /// List accounts
    ListAccounts,
    /// Remove an account so its API key can no longer confirm logins
    RemoveAccount {
        /// Account ID as printed by `list-accounts`
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let config = Config::new()
        .with_bind(args.bind)
        .with_port(args.port)
        .with_session_ttl_secs(args.session_ttl)
        .with_token_ttl_secs(args.token_ttl)
        .with_public_url(args.public_url.clone())
        .with_data_dir(args.data_dir.clone())
        .with_persist_sessions(args.persist_sessions);
    config.validate()?;

    let accounts = Arc::new(
        AccountStore::open(config.data_dir.as_deref())
            .await
            .context("Failed to open account store")?,
    );

    match args.command {
        Some(Command::AddAccount { name }) => add_account(&accounts, &name).await,
        Some(Command::ListAccounts) => {
            list_accounts(&accounts).await;
            Ok(())
        }
        Some(Command::RemoveAccount { id }) => remove_account(&accounts, &id).await,
        None => serve(config, accounts, args.cert, args.key).await,
    }
}

async fn add_account(accounts: &AccountStore, name: &str) -> Result<()> {
    let (account, key) = accounts
        .create_account(name)
        .await
        .context("Failed to create account")?;

    println!();
    println!("  Account: {} ({})", account.user.name, account.user.id);
    println!("  API key: {}", key);
    println!();
    println!("  Store this key now; it is not shown again.");
    println!();
    Ok(())
}

async fn remove_account(accounts: &AccountStore, id: &str) -> Result<()> {
    let id = UserId::parse(id).with_context(|| format!("Invalid account ID: {}", id))?;
    accounts
        .remove(&id)
        .await
        .with_context(|| format!("Failed to remove account {}", id))?;
    println!("Removed account {}", id);
    Ok(())
}

async fn list_accounts(accounts: &AccountStore) {
    let mut all = accounts.list().await;
    all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    if all.is_empty() {
        println!("No accounts. Create one with `sudosos add-account <NAME>`.");
        return;
    }
    for account in all {
        let last_seen = account
            .last_seen
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}  {:<24}  last seen {}",
            account.user.id, account.user.name, last_seen
        );
    }
}

async fn serve(
    config: Config,
    accounts: Arc<AccountStore>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
) -> Result<()> {
    info!("SudoSOS QR login v{}", env!("CARGO_PKG_VERSION"));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn SessionStore> = if config.persist_sessions {
        let store = FileSessionStore::open(config.data_dir.as_deref())
            .await
            .context("Failed to open session store")?;
        info!("Sessions: persisted to {:?}", store.path());
        Arc::new(store)
    } else {
        info!("Sessions: in memory");
        Arc::new(MemorySessionStore::new())
    };

    let tokens = Arc::new(TokenRegistry::new(
        Duration::seconds(config.token_ttl_secs),
        clock.clone(),
    )?);

    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let qr = Arc::new(QrAuthService::new(
        store,
        clock,
        Duration::seconds(config.session_ttl_secs),
        tokens.clone(),
        Arc::new(BroadcastNotifier::new(events.clone())),
    ));

    let account_count = accounts.list().await.len();
    if account_count == 0 {
        warn!("No accounts yet; nobody can confirm QR logins. Run `sudosos add-account <NAME>`.");
    } else {
        info!("{} account(s) may confirm QR logins", account_count);
    }

    let tls = match (&cert, &key) {
        (Some(cert), Some(key)) => Some(load_tls(cert, key).await?),
        _ => None,
    };
    if let Some(ref tls) = tls {
        info!("Cert fingerprint: {}", tls.fingerprint);
    }

    // Periodically drop expired login tokens
    let prune_tokens = tokens.clone();
    let prune_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            let removed = prune_tokens.prune().await;
            if removed > 0 {
                info!("Pruned {} expired tokens", removed);
            }
        }
    });

    let addr = SocketAddr::new(config.bind, config.port);
    let state = Arc::new(AppState::new(
        config.clone(),
        qr,
        accounts,
        tokens,
        events,
        tls.as_ref().map(|t| t.fingerprint.clone()),
    ));
    let router = create_router(state);

    info!("Listening on {}", addr);
    info!("QR codes point to {}", config.public_base());

    if let Some(tls) = tls {
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();

        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
            shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
        });

        axum_server::bind_rustls(addr, tls.config)
            .handle(handle)
            .serve(router.into_make_service())
            .await?;
    } else {
        let shutdown = async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        };

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
    }

    prune_handle.abort();
    info!("Goodbye!");
    Ok(())
}
