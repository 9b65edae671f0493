//! Consort node binary.
//!
//! Runs one cluster node hosting either the CFT-Log or the BFT-3P
//! protocol over the shared runtime.
//!
//! ```bash
//! # CFT-Log node 1 of the cluster described in nodes.json
//! consort-node --id 1 --config nodes.json
//!
//! # BFT-3P node, byzantine mode for fault-injection testing
//! consort-node --id 4 --config pbft_nodes.json --protocol bft --byzantine
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use consort_bft::{BftConfig, BftState};
use consort_cft::{CftConfig, CftState};
use consort_node::{init_telemetry, NodeHandle, NodeRunner, RuntimeConfig};
use consort_types::{ClusterConfig, NodeId};
use consort_wal::Wal;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

/// Consort consensus node.
#[derive(Parser, Debug)]
#[command(name = "consort-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// This node's id; must appear in the cluster configuration.
    #[arg(long)]
    id: u64,

    /// Path to the cluster configuration (JSON array of peers).
    #[arg(long)]
    config: PathBuf,

    /// Which replication protocol to run.
    #[arg(long, value_enum, default_value = "cft")]
    protocol: Protocol,

    /// Data directory for the write-ahead log.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Listen address override (defaults to this node's config record).
    #[arg(long)]
    listen: Option<String>,

    /// BFT-3P only: run in byzantine fault-injection mode.
    #[arg(long)]
    byzantine: bool,

    /// Log level filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Protocol {
    /// Crash-fault-tolerant log replication (Raft-style).
    Cft,
    /// Byzantine-fault-tolerant three-phase agreement (pBFT-style).
    Bft,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli.log_level);

    let cluster =
        ClusterConfig::load(&cli.config).context("failed to load cluster configuration")?;
    let id = NodeId(cli.id);
    if cluster.peer(id).is_none() {
        bail!("node id {} is not in {}", cli.id, cli.config.display());
    }

    let mut runtime = RuntimeConfig::new(id, cluster.clone());
    runtime.listen_addr = cli.listen.clone();

    let handle = match cli.protocol {
        Protocol::Cft => {
            if cli.byzantine {
                bail!("--byzantine only applies to the bft protocol");
            }
            let wal = Wal::open(&cli.data_dir, cli.id).context("failed to open WAL")?;
            let recovered = wal
                .load()
                .context("WAL unreadable; refusing to start with reset state")?;
            let state = CftState::new(
                id,
                cluster,
                CftConfig::default(),
                recovered,
                rand::random(),
            );
            NodeRunner::start(runtime, state, Some(wal)).await?
        }
        Protocol::Bft => {
            if cli.byzantine {
                warn!("running in byzantine mode; this node will misbehave");
            }
            let state = BftState::new(
                id,
                cluster,
                BftConfig {
                    byzantine: cli.byzantine,
                    ..BftConfig::default()
                },
            )
            .context("invalid BFT-3P cluster")?;
            NodeRunner::start(runtime, state, None).await?
        }
    };

    info!(node = %id, addr = %handle.addr(), protocol = ?cli.protocol, "node running");
    wait_for_shutdown(handle).await;
    Ok(())
}

async fn wait_for_shutdown(handle: NodeHandle) {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
    handle.stop().await;
}
