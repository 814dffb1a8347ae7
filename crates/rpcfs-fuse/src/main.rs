//! rpcfs - mount a remote file service as a local filesystem.
//!
//! Usage:
//!   rpcfs /mnt/remote --config rpcfs.toml
//!   rpcfs /mnt/remote --config rpcfs.toml --pool-size 16 --debug

use anyhow::{Context, Result};
use clap::Parser;
use rpcfs_core::{ChannelBuilder, FileService};
use rpcfs_fuse::{MountConfig, RemoteFs, mount};
use rpcfs_mount::{Config, ConnectionPool, ConnectionStats};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rpcfs", version, about = "Mount a remote file service via FUSE")]
struct Args {
    /// Directory to mount the filesystem on
    mountpoint: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long, env = "RPCFS_CONFIG")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    debug: bool,

    /// Number of pooled connections, overriding [pool] size
    #[arg(long)]
    pool_size: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !args.mountpoint.is_dir() {
        anyhow::bail!("Mountpoint is not a directory: {}", args.mountpoint.display());
    }

    let mut config = Config::load(&args.config)?;
    if let Some(size) = args.pool_size {
        config.pool.size = size;
        config.validate()?;
    }

    info!(
        transport = %config.rpc.transport,
        target = %config.rpc.target,
        wrapper = %config.rpc.wrapper,
        protocol = %config.rpc.protocol,
        pool_size = config.pool.size,
        "Connecting to file service"
    );

    let stats = Arc::new(ConnectionStats::new());
    let pool = Arc::new(ConnectionPool::with_stats(
        config.pool.size,
        Arc::clone(&stats),
    ));

    let builder = ChannelBuilder::new(config.channel_config());
    for id in 0..config.pool.size {
        let mut client = builder
            .build(id)
            .with_context(|| format!("Failed to build client {id}"))?;
        client
            .open()
            .with_context(|| format!("Failed to open connection {id} to {}", config.rpc.target))?;
        if id == 0 {
            client.ping().context("File service did not answer ping")?;
        }
        pool.release(client);
    }

    let remote = RemoteFs::new(Arc::clone(&pool))
        .with_policy(config.acquire_policy())
        .with_stats(Arc::clone(&stats));

    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("Failed to set signal handler")?;

    let handle = mount(remote, &args.mountpoint, &MountConfig::from_config(&config))
        .with_context(|| format!("Failed to mount at {}", args.mountpoint.display()))?;

    info!(mountpoint = %args.mountpoint.display(), "Mounted (press Ctrl+C to unmount)");

    match rx.recv() {
        Ok(()) => info!("Received interrupt signal, unmounting..."),
        Err(_) => warn!("Signal channel closed unexpectedly"),
    }

    handle.unmount();
    pool.close();

    match serde_json::to_string(&stats.snapshot()) {
        Ok(json) => info!(stats = %json, "Connection statistics"),
        Err(e) => error!(error = %e, "Failed to serialize statistics"),
    }
    Ok(())
}
