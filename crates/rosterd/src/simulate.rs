//! `rosterd simulate` — in-process master plus one monitor per server.
//!
//! Every monitor subscribes, reports `record`, and waits for the master's
//! `startOver`. Useful for checking a topology before deploying it.

use std::sync::Arc;
use std::time::Duration;

use roster_cluster::{LocalTransport, MonitorWatcher, NodeEvent, Watchdog};
use roster_core::{RosterConfig, Snapshot};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub async fn run_simulation(
    config: &RosterConfig,
    snapshot: Snapshot,
    wait_secs: u64,
) -> anyhow::Result<()> {
    if snapshot.is_empty() {
        anyhow::bail!("no servers configured");
    }

    let master = config.node.master.clone();
    let watchdog = Arc::new(Watchdog::new(&master, snapshot.clone()));
    info!(%master, servers = snapshot.len(), "master started");

    let mut watchers = Vec::new();
    let mut loops = Vec::new();
    let mut start_all = Vec::new();

    // ── Boot monitors ──────────────────────────────────────────

    for id in snapshot.keys() {
        let (transport, inbox) = LocalTransport::connect(watchdog.clone());
        let watcher = Arc::new(
            MonitorWatcher::new(id, &master, transport)
                .with_config(config.watcher.clone())
                .with_after_start_all(Arc::new(|id: &str| {
                    debug!(%id, "after start all");
                })),
        );
        start_all.push((id.clone(), watcher.events()));

        let runner = watcher.clone();
        loops.push(tokio::spawn(async move { runner.run(inbox).await }));

        let installed = watcher.start().await?;
        info!(%id, servers = installed, "monitor synced");
        watchers.push(watcher);
    }

    // ── Report startup ─────────────────────────────────────────

    for watcher in &watchers {
        watcher.finish_start();
    }

    let deadline = Duration::from_secs(wait_secs);
    let mut missing = Vec::new();
    for (id, events) in start_all {
        match tokio::time::timeout(deadline, wait_for_start_all(events)).await {
            Ok(true) => debug!(%id, "monitor saw startOver"),
            _ => {
                warn!(%id, "monitor never saw startOver");
                missing.push(id);
            }
        }
    }

    for watcher in &watchers {
        let store = watcher.membership();
        let view = store.read().await;
        info!(id = %watcher.id(), peers = view.len(), "final membership");
    }

    // Each loop keeps its own inbox sender alive through the transport.
    for watcher in &watchers {
        watchdog.unsubscribe(watcher.id()).await;
    }
    for handle in loops {
        handle.abort();
    }

    if missing.is_empty() {
        info!("simulation finished");
        Ok(())
    } else {
        anyhow::bail!("{} monitor(s) never saw startOver", missing.len())
    }
}

async fn wait_for_start_all(mut events: broadcast::Receiver<NodeEvent>) -> bool {
    loop {
        match events.recv().await {
            Ok(NodeEvent::StartAll) => return true,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}
