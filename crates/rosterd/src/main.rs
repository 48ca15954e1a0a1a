//! rosterd — the roster daemon.
//!
//! Loads `roster.toml`, expands cluster templates into concrete server
//! records, validates their ports, and can boot an in-process master with
//! one monitor per server to exercise the membership protocol.
//!
//! # Usage
//!
//! ```text
//! rosterd expand --config roster.toml
//! rosterd check --config roster.toml
//! rosterd simulate --config roster.toml
//! ```

mod check;
mod simulate;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use roster_cluster::ClusterExpander;
use roster_core::{RosterConfig, Snapshot};
use tracing::info;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info,rosterd=debug,roster_cluster=debug";

#[derive(Parser)]
#[command(name = "rosterd", about = "Roster membership daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Expand cluster templates and print the resulting servers as JSON.
    Expand {
        #[arg(long, default_value = "roster.toml")]
        config: PathBuf,
    },
    /// Report port conflicts between servers and with local listeners.
    Check {
        #[arg(long, default_value = "roster.toml")]
        config: PathBuf,

        /// Skip probing local ports.
        #[arg(long)]
        no_probe: bool,
    },
    /// Run a master and one monitor per server in-process.
    Simulate {
        #[arg(long, default_value = "roster.toml")]
        config: PathBuf,

        /// Seconds to wait for every monitor to see startOver.
        #[arg(long, default_value = "10")]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Expand { config } => {
            let (_, snapshot) = load(&config)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Check { config, no_probe } => {
            let (_, snapshot) = load(&config)?;
            check::run_check(&snapshot, !no_probe).await
        }
        Command::Simulate { config, wait_secs } => {
            let (config, snapshot) = load(&config)?;
            simulate::run_simulation(&config, snapshot, wait_secs).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read the config and expand every descriptor in one session.
fn load(path: &Path) -> anyhow::Result<(RosterConfig, Snapshot)> {
    let config = RosterConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let descriptors = config.descriptors();
    let snapshot = ClusterExpander::new()
        .expand_all(&descriptors, &Snapshot::new())
        .context("expanding server descriptors")?;
    info!(path = %path.display(), descriptors = descriptors.len(), servers = snapshot.len(), "config loaded");
    Ok((config, snapshot))
}
