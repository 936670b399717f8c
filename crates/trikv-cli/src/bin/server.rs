//! trikv-server: serve one storage instance over every configured listener.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trikv_core::{Config, Storage};
use trikv_net::{ListenAddress, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "trikv-server", version, about = "Serve a trikv store over TCP or Unix sockets")]
struct Args {
    /// Directory holding storage.snap
    #[arg(long, default_value = "./db")]
    data_dir: PathBuf,

    /// Address to listen on (tcp://host:port or unix:///path); repeatable
    #[arg(long, default_value = "tcp://0.0.0.0:5555")]
    listen: Vec<ListenAddress>,

    /// Hash bytes used to route keys through the trie (1-4)
    #[arg(long, default_value_t = 4)]
    path_length: u8,

    /// Save a dirty store this many seconds after its first unsaved write; 0 disables
    #[arg(long, default_value_t = 5)]
    snapshot_cadence_secs: u64,

    /// Save after every write
    #[arg(long)]
    snapshot_on_write: bool,

    /// Keep everything in memory; nothing is loaded or saved
    #[arg(long)]
    in_memory: bool,
}

impl Args {
    fn storage_config(&self) -> Config {
        if self.in_memory {
            return Config { path_length: self.path_length, ..Config::in_memory() };
        }
        let cadence = (self.snapshot_cadence_secs > 0).then(|| Duration::from_secs(self.snapshot_cadence_secs));
        Config {
            path_length: self.path_length,
            snapshot_cadence: cadence,
            snapshot_on_write: self.snapshot_on_write,
            ..Config::persistent(&self.data_dir)
        }
    }
}

fn prepare_data_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        info!(path = %dir.display(), "created data directory");
    }
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    if !args.in_memory {
        prepare_data_dir(&args.data_dir)?;
    }
    let storage = Arc::new(Storage::open(args.storage_config()).context("failed to open storage")?);

    let config = ServerConfig { listen: args.listen.clone(), ..ServerConfig::default() };
    let cancel = CancellationToken::new();
    let server = Server::bind(Arc::clone(&storage), config, cancel.clone())
        .await
        .context("failed to bind listeners")?;
    let running = tokio::spawn(server.run());

    wait_for_signal().await.context("failed to listen for shutdown signals")?;
    info!("shutdown signal received");
    cancel.cancel();
    running.await?;

    // Joins the worker and saves a dirty tree; keep it off the runtime threads.
    tokio::task::spawn_blocking(move || storage.shutdown()).await?;
    Ok(())
}
