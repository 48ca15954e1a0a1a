//! `rosterd check` — port conflict report.
//!
//! Two passes: conflicts between configured servers (via `PortRegistry`),
//! then, for servers on this machine, whether something is already
//! listening on their ports.

use roster_cluster::PortRegistry;
use roster_core::{ServerRecord, Snapshot};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// A port that another process on this machine already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerClash {
    pub id: String,
    pub host: String,
    pub port: u16,
}

pub async fn run_check(snapshot: &Snapshot, probe: bool) -> anyhow::Result<()> {
    let conflicts = PortRegistry::new(snapshot.values()).conflicts();
    for c in &conflicts {
        warn!(host = %c.host, port = c.port, first = %c.first, second = %c.second, "port claimed twice");
    }

    let clashes = if probe {
        probe_local(snapshot.values()).await
    } else {
        Vec::new()
    };
    for c in &clashes {
        warn!(id = %c.id, host = %c.host, port = c.port, "port busy");
    }

    if conflicts.is_empty() && clashes.is_empty() {
        info!(servers = snapshot.len(), "no port conflicts");
        Ok(())
    } else {
        anyhow::bail!(
            "{} config conflict(s), {} busy local port(s)",
            conflicts.len(),
            clashes.len()
        )
    }
}

/// Whether `host` names this machine.
pub fn is_local(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "localhost" | "0.0.0.0" | "::1")
}

/// Try to bind each local port; a failed bind means it is taken.
pub async fn probe_local<'a>(records: impl IntoIterator<Item = &'a ServerRecord>) -> Vec<ListenerClash> {
    let mut clashes = Vec::new();
    for record in records.into_iter().filter(|r| is_local(&r.host)) {
        for port in record.ports() {
            if TcpListener::bind((record.host.as_str(), port)).await.is_err() {
                clashes.push(ListenerClash {
                    id: record.id.clone(),
                    host: record.host.clone(),
                    port,
                });
            }
        }
    }
    clashes
}
