mod config;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use imapd_proto::imap;
use imapd_user::login::static_provider::{hash_password, StaticLoginProvider};
use imapd_user::login::ArcLoginProvider;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// Run a single demo account on fixed ports, ignoring --config-file.
    /// Not intended for production use.
    #[clap(long)]
    dev: bool,

    #[clap(short, long, env = "IMAPD_CONFIG", default_value = "imapd.toml")]
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the IMAP daemon
    Daemon,
    /// Hash a password for the configuration file's `users` table
    PasswordHash {
        #[clap(env = "IMAPD_PASSWORD")]
        maybe_password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "imapd=info,imapd_proto=info,imapd_collections=info");
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match &args.command {
        Command::PasswordHash { maybe_password } => {
            let password = match maybe_password {
                Some(pwd) => pwd.clone(),
                None => rpassword::prompt_password("Enter password: ")?,
            };
            println!("{}", hash_password(&password)?);
            Ok(())
        }
        Command::Daemon => run_daemon(&args).await,
    }
}

async fn run_daemon(args: &Args) -> Result<()> {
    let (login_provider, unsecure, secure): (ArcLoginProvider, Option<SocketAddr>, Option<_>) =
        if args.dev {
            tracing::warn!("running in --dev mode: single demo account, unencrypted listener only");
            let provider = StaticLoginProvider::single("alice", "hunter2")?;
            (
                Arc::new(provider),
                Some(SocketAddr::new(
                    IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1)),
                    1143,
                )),
                None,
            )
        } else {
            let cfg = config::read_config(&args.config_file)?;
            if cfg.imap.is_none() && cfg.imap_unsecure.is_none() {
                bail!("configuration declares neither [imap] nor [imap_unsecure]; nothing to listen on");
            }
            let mut users = HashMap::new();
            for (name, hash) in cfg.users {
                users.insert(name, hash);
            }
            let provider = StaticLoginProvider::new(users);
            let unsecure = cfg.imap_unsecure.map(|c| c.bind_addr);
            let secure = cfg.imap.map(imapd_proto::config::ImapConfig::from);
            (Arc::new(provider), unsecure, secure)
        };

    let (exit_tx, exit_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if let Some(bind_addr) = unsecure {
        let server = imap::new_unsecure(
            imapd_proto::config::ImapUnsecureConfig { bind_addr },
            login_provider.clone(),
        );
        let rx = exit_rx.clone();
        tasks.push(tokio::spawn(async move { server.run(rx).await }));
    }

    if let Some(cfg) = secure {
        let server = imap::new(cfg, login_provider.clone())?;
        let rx = exit_rx.clone();
        tasks.push(tokio::spawn(async move { server.run(rx).await }));
    }

    if tasks.is_empty() {
        bail!("no listener configured");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        res = terminate_signal() => {
            res?;
            tracing::info!("received termination signal");
        }
    }
    let _ = exit_tx.send(true);

    for task in tasks {
        task.await??;
    }

    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() -> Result<()> {
    let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    sig.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate_signal() -> Result<()> {
    std::future::pending().await
}
