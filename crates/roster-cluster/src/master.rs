//! Watchdog — the master's side of the membership protocol.
//!
//! Owns the canonical server set and the list of subscribed monitors.
//! Every mutation is pushed to each subscriber and their `OK`/`FAIL`
//! replies are tallied. Once every known server has reported `record`,
//! `startOver` is broadcast exactly once.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use roster_core::{ServerId, ServerRecord, Snapshot};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::membership::MembershipStore;
use crate::protocol::{MonitorMessage, Signal};
use crate::transport::Inbound;

/// Tally of subscriber replies to one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Acks {
    pub ok: usize,
    pub fail: usize,
    /// Subscribers that dropped the message, went away, or timed out.
    pub no_reply: usize,
}

#[derive(Default)]
struct WatchdogState {
    servers: MembershipStore,
    subscribers: HashMap<ServerId, mpsc::Sender<Inbound>>,
    recorded: HashSet<ServerId>,
    started_all: bool,
}

pub struct Watchdog {
    name: String,
    state: Mutex<WatchdogState>,
    /// How long to wait for each subscriber's reply.
    ack_timeout: Duration,
}

impl Watchdog {
    pub fn new(name: &str, servers: Snapshot) -> Self {
        let mut store = MembershipStore::new();
        store.install_snapshot(servers.into_values());
        Self {
            name: name.to_string(),
            state: Mutex::new(WatchdogState {
                servers: store,
                ..Default::default()
            }),
            ack_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Transport target name of this watchdog.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a monitor and hand back the canonical membership.
    pub async fn subscribe(&self, id: &str, inbox: mpsc::Sender<Inbound>) -> Snapshot {
        let mut state = self.state.lock().await;
        state.subscribers.insert(id.to_string(), inbox);
        info!(%id, subscribers = state.subscribers.len(), "monitor subscribed");
        state.servers.snapshot()
    }

    pub async fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.state.lock().await.subscribers.remove(id).is_some();
        if removed {
            info!(%id, "monitor unsubscribed");
        }
        removed
    }

    pub async fn subscribers(&self) -> Vec<ServerId> {
        let state = self.state.lock().await;
        let mut ids: Vec<ServerId> = state.subscribers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.servers.snapshot()
    }

    pub async fn add_server(&self, record: ServerRecord) -> Acks {
        self.state.lock().await.servers.add([record.clone()]);
        self.broadcast(MonitorMessage::AddServer { server: Some(record) }).await
    }

    pub async fn remove_server(&self, id: &str) -> Acks {
        {
            let mut state = self.state.lock().await;
            state.servers.remove(&[id]);
            state.recorded.remove(id);
        }
        self.broadcast(MonitorMessage::RemoveServer { id: Some(id.to_string()) }).await
    }

    pub async fn replace_servers(&self, records: Vec<ServerRecord>) -> Acks {
        {
            let mut state = self.state.lock().await;
            state.servers.replace(records.clone());
            let WatchdogState { servers, recorded, .. } = &mut *state;
            recorded.retain(|id| servers.contains(id));
        }
        self.broadcast(MonitorMessage::ReplaceServer { servers: Some(records) }).await
    }

    /// Mark `id` as started. Returns true if this completed the set and
    /// `startOver` went out.
    pub async fn record(&self, id: &str) -> bool {
        let complete = {
            let mut state = self.state.lock().await;
            state.recorded.insert(id.to_string());
            debug!(%id, recorded = state.recorded.len(), total = state.servers.len(), "server recorded");

            let all = !state.servers.is_empty()
                && state.servers.records().all(|r| state.recorded.contains(&r.id));
            if all && !state.started_all {
                state.started_all = true;
                true
            } else {
                false
            }
        };

        if complete {
            info!("all servers started, broadcasting startOver");
            self.broadcast(MonitorMessage::StartOver).await;
        }
        complete
    }

    /// Push `msg` to every subscriber, one at a time, and tally replies.
    pub async fn broadcast(&self, msg: MonitorMessage) -> Acks {
        let targets: Vec<(ServerId, mpsc::Sender<Inbound>)> = {
            let state = self.state.lock().await;
            state
                .subscribers
                .iter()
                .map(|(id, tx)| (id.clone(), tx.clone()))
                .collect()
        };

        let payload = msg.encode();
        let mut acks = Acks::default();
        let mut gone = Vec::new();

        for (id, tx) in targets {
            let (inbound, reply) = Inbound::new(payload.clone());
            if tx.send(inbound).await.is_err() {
                warn!(%id, action = msg.action(), "subscriber inbox closed");
                gone.push(id);
                acks.no_reply += 1;
                continue;
            }
            match tokio::time::timeout(self.ack_timeout, reply).await {
                Ok(Ok(Signal::Ok)) => acks.ok += 1,
                Ok(Ok(Signal::Fail)) => {
                    warn!(%id, action = msg.action(), "subscriber replied FAIL");
                    acks.fail += 1;
                }
                Ok(Err(_)) => acks.no_reply += 1,
                Err(_) => {
                    warn!(%id, action = msg.action(), timeout = ?self.ack_timeout, "subscriber did not reply");
                    acks.no_reply += 1;
                }
            }
        }

        if !gone.is_empty() {
            let mut state = self.state.lock().await;
            for id in gone {
                state.subscribers.remove(&id);
            }
        }

        debug!(action = msg.action(), ?acks, "broadcast finished");
        acks
    }
}
