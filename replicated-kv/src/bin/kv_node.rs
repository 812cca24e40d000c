//! Runs one replica: Raft transport on its peer address, JSON API on its
//! API address.
//!
//! Start a 3-replica cluster from a `peers.json` like:
//!
//! ```json
//! {
//!   "peers": ["127.0.0.1:7101", "127.0.0.1:7102", "127.0.0.1:7103"],
//!   "apis":  ["127.0.0.1:8101", "127.0.0.1:8102", "127.0.0.1:8103"]
//! }
//! ```
//!
//! ```bash
//! cargo run --bin kv-node -- --id 0 --campaign
//! cargo run --bin kv-node -- --id 1
//! cargo run --bin kv-node -- --id 2
//!
//! curl -X PUT 127.0.0.1:8101/ -d '{"key": "a", "value": "1"}'
//! curl '127.0.0.1:8102/?key=a'
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use tokio::net::TcpListener;
use tracing::{info, warn};

use replicated_kv::config::ClusterConfig;
use replicated_kv::http;
use replicated_kv::replica::Replica;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a replicated key-value node")]
struct Args {
    /// Replica id: this node's position in the cluster file's lists
    #[arg(long)]
    id: u64,

    /// Cluster file listing peer and API addresses
    #[arg(long, default_value = "peers.json", value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Override how often the store catches up in the background
    #[arg(long)]
    replay_interval_ms: Option<u64>,

    /// Override how long a write waits for its entry to commit
    #[arg(long)]
    submit_timeout_ms: Option<u64>,

    /// Start an election immediately instead of waiting for a timeout
    #[arg(long)]
    campaign: bool,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = ClusterConfig::load(&args.config)?;
    if let Some(ms) = args.replay_interval_ms {
        config.replay_interval_ms = ms;
    }
    if let Some(ms) = args.submit_timeout_ms {
        config.submit_timeout_ms = ms;
    }

    let replica = Replica::start(&config, args.id)?;
    if args.campaign {
        replica.raft().campaign()?;
        info!(replica = args.id, "campaign started");
    }

    let api_addr = replica
        .api_address()
        .context("replica has no api address")?
        .to_string();
    let listener = TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind api listener on {api_addr}"))?;

    http::serve(listener, replica.coordinator().clone(), shutdown_signal()).await?;

    replica.shutdown()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
    info!("shutting down");
}
