//! Harbormaster
//!
//! # Architecture Overview
//!
//! ```text
//!   reporter (per machine)                          writer (per balancer host)
//!  ┌──────────────────────────┐                   ┌──────────────────────────────┐
//!  │ services/*.yaml          │                   │ clusters/*.yaml              │
//!  │   → check loop per svc   │                   │   → watch <base>/<cluster>   │
//!  │   → hysteresis per port  │   coordination    │   → cluster.nodes replaced   │
//!  │   → report_up/down ──────┼──▶ <base>/<svc>/ ─┼──▶ → topology changed        │
//!  │                          │   ephemeral nodes │   → Balancer::sync           │
//!  └──────────────────────────┘                   │      live socket or restart  │
//!                                                 └──────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use harbormaster::discovery::MemoryEnsemble;
use harbormaster::lifecycle::signals::wait_for_termination;
use harbormaster::observability::logging::{init_logging, LogFormat};
use harbormaster::observability::metrics::init_metrics;
use harbormaster::{Context, Plugins, Reporter, Shutdown, Writer};

#[derive(Parser)]
#[command(name = "harbormaster")]
#[command(about = "Keeps load balancer config in sync with service membership", long_about = None)]
struct Cli {
    /// Directory holding balancers/, discovery/, clusters/ and services/
    #[arg(short, long, default_value = "/etc/harbormaster")]
    config_dir: PathBuf,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Watch clusters and keep balancers in sync
    Writer,
    /// Run service checks and report this machine's nodes
    Reporter,
    /// Writer and reporter in one process; `memory` discovery is shared between them
    Standalone,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), config_dir = ?cli.config_dir, "harbormaster starting");

    if let Some(addr) = cli.metrics_address {
        if let Err(e) = init_metrics(addr) {
            tracing::error!(address = %addr, error = %e, "Failed to start metrics endpoint");
        }
    }

    let shutdown = Shutdown::new();
    let plugins = Arc::new(Plugins::builtin(MemoryEnsemble::new()));
    let ctx = || Context::new(&cli.config_dir, plugins.clone(), shutdown.clone());

    let writer = matches!(cli.command, Commands::Writer | Commands::Standalone).then(|| Writer::new(ctx()));
    let reporter = matches!(cli.command, Commands::Reporter | Commands::Standalone).then(|| Reporter::new(ctx()));

    if let Some(writer) = &writer {
        writer.start().await?;
    }
    if let Some(reporter) = &reporter {
        reporter.start().await?;
    }

    let mut engines = writer.iter().map(|w| w.discovery()).chain(reporter.iter().map(|r| r.discovery()));
    if !matches!(cli.command, Commands::Standalone) && engines.any(|engine| engine.registry().contains("memory")) {
        tracing::warn!(
            "The memory discovery method only reaches roles in this process; use zookeeper to share membership between machines"
        );
    }

    tokio::select! {
        res = wait_for_termination() => res?,
        _ = shutdown.wait() => {}
    }

    if let Some(reporter) = &reporter {
        reporter.stop().await;
    }
    if let Some(writer) = &writer {
        writer.stop().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
