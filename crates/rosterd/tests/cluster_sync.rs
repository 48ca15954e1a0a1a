//! Membership sync integration tests.
//!
//! Runs a master `Watchdog` and real `MonitorWatcher` loops in-process
//! over `LocalTransport`: subscribe, incremental pushes, full resync, and
//! the startOver broadcast.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use roster_cluster::*;
use roster_core::*;
use tokio::task::JoinHandle;

const MASTER: &str = "__masterwatcher__";

fn rec(id: &str, port: u16) -> ServerRecord {
    ServerRecord::new(id, "chat", "127.0.0.1", port)
}

/// Boot one monitor: its watcher plus the spawned inbox loop.
fn boot_monitor(
    watchdog: &Arc<Watchdog>,
    id: &str,
) -> (Arc<MonitorWatcher<LocalTransport>>, JoinHandle<()>) {
    let (transport, inbox) = LocalTransport::connect(watchdog.clone());
    let watcher = Arc::new(MonitorWatcher::new(id, MASTER, transport));
    let runner = watcher.clone();
    let handle = tokio::spawn(async move { runner.run(inbox).await });
    (watcher, handle)
}

async fn ids(watcher: &MonitorWatcher<LocalTransport>) -> Vec<String> {
    watcher.membership().read().await.ids()
}

// ── Subscribe / push / resync ──────────────────────────────────

#[tokio::test]
async fn subscribe_remove_then_replace() {
    let watchdog = Arc::new(Watchdog::new(
        MASTER,
        snapshot_from_records([rec("A", 3010), rec("B", 3011)]),
    ));
    let (monitor, handle) = boot_monitor(&watchdog, "M");

    assert_eq!(monitor.start().await.unwrap(), 2);
    assert_eq!(monitor.state(), WatcherState::Synced);
    assert_eq!(ids(&monitor).await, vec!["A", "B"]);

    let acks = watchdog.remove_server("A").await;
    assert_eq!(acks, Acks { ok: 1, fail: 0, no_reply: 0 });
    assert_eq!(ids(&monitor).await, vec!["B"]);

    let acks = watchdog.replace_servers(vec![rec("C", 3012)]).await;
    assert_eq!(acks.ok, 1);
    assert_eq!(ids(&monitor).await, vec!["C"]);

    handle.abort();
}

#[tokio::test]
async fn add_server_reaches_every_subscriber() {
    let watchdog = Arc::new(Watchdog::new(MASTER, Snapshot::new()));
    let (m1, h1) = boot_monitor(&watchdog, "m1");
    let (m2, h2) = boot_monitor(&watchdog, "m2");
    m1.start().await.unwrap();
    m2.start().await.unwrap();

    let mut events = m2.events();
    let acks = watchdog.add_server(rec("chat-1", 3010)).await;
    assert_eq!(acks.ok, 2);

    assert_eq!(ids(&m1).await, vec!["chat-1"]);
    assert_eq!(ids(&m2).await, vec!["chat-1"]);
    assert_eq!(
        events.recv().await.unwrap(),
        NodeEvent::ServersAdded(vec!["chat-1".to_string()])
    );

    h1.abort();
    h2.abort();
}

#[tokio::test]
async fn malformed_push_fails_without_mutation() {
    let watchdog = Arc::new(Watchdog::new(MASTER, snapshot_from_records([rec("A", 3010)])));
    let (monitor, handle) = boot_monitor(&watchdog, "M");
    monitor.start().await.unwrap();

    let acks = watchdog
        .broadcast(MonitorMessage::AddServer { server: None })
        .await;
    assert_eq!(acks, Acks { ok: 0, fail: 1, no_reply: 0 });

    let acks = watchdog
        .broadcast(MonitorMessage::Unknown("rebalance".into()))
        .await;
    assert_eq!(acks.no_reply, 1);

    assert_eq!(ids(&monitor).await, vec!["A"]);
    handle.abort();
}

#[tokio::test]
async fn subscribe_to_wrong_target_fails() {
    let watchdog = Arc::new(Watchdog::new(MASTER, Snapshot::new()));
    let (transport, _inbox) = LocalTransport::connect(watchdog);
    let monitor = MonitorWatcher::new("M", "elsewhere", transport);

    let err = monitor.start().await.unwrap_err();
    assert!(matches!(err, ClusterError::UnknownTarget(_)));
    assert_eq!(monitor.state(), WatcherState::Unsubscribed);
}

// ── Startup completion ─────────────────────────────────────────

#[tokio::test]
async fn start_over_after_every_record() {
    let snapshot = snapshot_from_records([rec("a", 3010), rec("b", 3011)]);
    let watchdog = Arc::new(Watchdog::new(MASTER, snapshot));

    let calls = Arc::new(AtomicUsize::new(0));
    let mut monitors = Vec::new();
    let mut handles = Vec::new();
    for id in ["a", "b"] {
        let (transport, inbox) = LocalTransport::connect(watchdog.clone());
        let seen = calls.clone();
        let watcher = Arc::new(
            MonitorWatcher::new(id, MASTER, transport).with_after_start_all(Arc::new(
                move |_id: &str| {
                    seen.fetch_add(1, Ordering::SeqCst);
                },
            )),
        );
        let runner = watcher.clone();
        handles.push(tokio::spawn(async move { runner.run(inbox).await }));
        watcher.start().await.unwrap();
        monitors.push(watcher);
    }

    let mut events = monitors[0].events();
    for monitor in &monitors {
        monitor.finish_start();
    }

    let start_all = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(NodeEvent::StartAll) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(start_all.is_ok());

    // Both monitors ran their callback exactly once.
    tokio::time::timeout(Duration::from_secs(5), async {
        while calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    for handle in handles {
        handle.abort();
    }
}

// ── Config → expansion → sync ──────────────────────────────────

#[tokio::test]
async fn expanded_config_syncs_to_monitor() {
    let config = RosterConfig::parse(
        r#"
[[servers.gate]]
id = "gate-1"
host = "127.0.0.1"
port = 3010

[[servers.chat]]
host = "127.0.0.1"
port = "3010++"
cluster = true
clusterCount = 2
"#,
    )
    .unwrap();

    let snapshot = expand_descriptors(&config.descriptors()).unwrap();
    assert_eq!(snapshot.len(), 3);
    assert!(PortRegistry::new(snapshot.values()).conflicts().is_empty());

    let watchdog = Arc::new(Watchdog::new(&config.node.master, snapshot.clone()));
    let (monitor, handle) = boot_monitor(&watchdog, "gate-1");
    monitor.start().await.unwrap();

    let store = monitor.membership();
    let view = store.read().await;
    assert_eq!(view.snapshot(), snapshot);
    let chat_ports: Vec<u16> = view.by_type("chat").map(|r| r.port).collect();
    assert_eq!(chat_ports, vec![3011, 3012]);

    handle.abort();
}
