//! Monitor watcher — keeps a node's membership view in sync with the master.
//!
//! On start the watcher subscribes to the master and installs the returned
//! membership. Afterwards it applies the master's pushes (`addServer`,
//! `removeServer`, `replaceServer`, `startOver`) one message at a time and
//! answers each with `OK` or `FAIL`.
//!
//! ```text
//! Unsubscribed ──start()──▶ Subscribing ──reply──▶ Synced
//!       ▲                        │
//!       └──────── error ─────────┘
//! ```

use std::sync::Arc;

use roster_core::config::WatcherConfig;
use roster_core::{ServerId, ServerRecord};
use serde_json::Value;
use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::membership::MembershipStore;
use crate::protocol::{MasterNotify, MasterRequest, MonitorMessage, Signal, decode_snapshot};
use crate::transport::{Inbound, Transport};

/// Subscription state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Unsubscribed,
    Subscribing,
    Synced,
}

/// Node-local events emitted as membership changes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    ServersAdded(Vec<ServerId>),
    ServersRemoved(Vec<ServerId>),
    ServersReplaced(Vec<ServerId>),
    /// Every server in the cluster has started.
    StartAll,
}

/// Callback run when the master reports that all servers have started.
pub type AfterStartAll = Arc<dyn Fn(&str) + Send + Sync>;

pub struct MonitorWatcher<T> {
    id: ServerId,
    master: String,
    transport: T,
    config: WatcherConfig,
    store: Arc<RwLock<MembershipStore>>,
    state: watch::Sender<WatcherState>,
    events: broadcast::Sender<NodeEvent>,
    after_start_all: Option<AfterStartAll>,
}

impl<T: Transport> MonitorWatcher<T> {
    pub fn new(id: &str, master: &str, transport: T) -> Self {
        let (state, _) = watch::channel(WatcherState::Unsubscribed);
        let (events, _) = broadcast::channel(64);
        Self {
            id: id.to_string(),
            master: master.to_string(),
            transport,
            config: WatcherConfig::default(),
            store: Arc::new(RwLock::new(MembershipStore::new())),
            state,
            events,
            after_start_all: None,
        }
    }

    /// Set the subscribe timeout and retry policy.
    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the after-start-all lifecycle callback.
    pub fn with_after_start_all(mut self, callback: AfterStartAll) -> Self {
        self.after_start_all = Some(callback);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared handle to the membership view.
    pub fn membership(&self) -> Arc<RwLock<MembershipStore>> {
        self.store.clone()
    }

    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Subscribe to the master and install its membership.
    ///
    /// Returns the number of records installed. On failure the watcher
    /// goes back to `Unsubscribed` and the membership is left untouched.
    pub async fn start(&self) -> ClusterResult<usize> {
        self.state.send_replace(WatcherState::Subscribing);
        info!(id = %self.id, master = %self.master, "subscribing to master");

        let reply = match self.subscribe_with_retry().await {
            Ok(reply) => reply,
            Err(e) => {
                error!(id = %self.id, error = %e, "subscribe request to master failed");
                self.state.send_replace(WatcherState::Unsubscribed);
                return Err(e);
            }
        };

        let records = match decode_snapshot(reply) {
            Ok(records) => records,
            Err(e) => {
                error!(id = %self.id, error = %e, "bad subscribe reply");
                self.state.send_replace(WatcherState::Unsubscribed);
                return Err(e);
            }
        };

        let count = records.len();
        self.add_servers(records).await;
        self.state.send_replace(WatcherState::Synced);
        info!(id = %self.id, servers = count, "membership synced");
        Ok(count)
    }

    async fn subscribe_with_retry(&self) -> ClusterResult<Value> {
        let mut backoff = self.config.retry_backoff();
        let mut attempt = 0;
        loop {
            match self.subscribe_once().await {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt < self.config.subscribe_retries => {
                    attempt += 1;
                    warn!(id = %self.id, error = %e, attempt, ?backoff, "subscribe failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn subscribe_once(&self) -> ClusterResult<Value> {
        let request = self.transport.request(
            &self.master,
            MasterRequest::Subscribe { id: self.id.clone() },
        );
        match self.config.subscribe_timeout() {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| ClusterError::Timeout(limit))?,
            None => request.await,
        }
    }

    /// Tell the master this node finished starting.
    pub fn finish_start(&self) {
        debug!(id = %self.id, "reporting startup to master");
        self.transport.notify(
            &self.master,
            MasterNotify::Record { id: self.id.clone() },
        );
    }

    /// Handle one raw inbound push.
    ///
    /// Returns `None` when the message is dropped: no `action`, or an
    /// action this version does not know.
    pub async fn handle(&self, message: &Value) -> Option<Signal> {
        let Some(msg) = MonitorMessage::decode(message) else {
            debug!(id = %self.id, %message, "dropping message without action");
            return None;
        };
        self.dispatch(msg).await
    }

    /// Route a decoded push to its handler.
    pub async fn dispatch(&self, msg: MonitorMessage) -> Option<Signal> {
        let signal = match msg {
            MonitorMessage::AddServer { server } => self.on_add_server(server).await,
            MonitorMessage::RemoveServer { id } => self.on_remove_server(id).await,
            MonitorMessage::ReplaceServer { servers } => self.on_replace_server(servers).await,
            MonitorMessage::StartOver => self.on_start_over(),
            MonitorMessage::Unknown(action) => {
                info!(id = %self.id, %action, "monitor watcher unknown action");
                return None;
            }
        };
        Some(signal)
    }

    /// Drain `inbox` until every sender is gone, one message at a time.
    pub async fn run(&self, mut inbox: mpsc::Receiver<Inbound>) {
        debug!(id = %self.id, "monitor watcher loop started");
        while let Some(Inbound { message, reply }) = inbox.recv().await {
            if let Some(signal) = self.handle(&message).await {
                // The master may have stopped waiting.
                let _ = reply.send(signal);
            }
        }
        debug!(id = %self.id, "monitor watcher loop finished");
    }

    async fn on_add_server(&self, server: Option<ServerRecord>) -> Signal {
        let Some(server) = server else {
            warn!(id = %self.id, "addServer received empty message");
            return Signal::Fail;
        };
        debug!(id = %self.id, server = %server.id, "received addServer");
        self.add_servers(vec![server]).await;
        Signal::Ok
    }

    async fn on_remove_server(&self, id: Option<ServerId>) -> Signal {
        let Some(id) = id else {
            warn!(id = %self.id, "removeServer received empty message");
            return Signal::Fail;
        };
        debug!(id = %self.id, server = %id, "received removeServer");
        let removed = self.store.write().await.remove(&[id]);
        if !removed.is_empty() {
            let _ = self.events.send(NodeEvent::ServersRemoved(removed));
        }
        Signal::Ok
    }

    async fn on_replace_server(&self, servers: Option<Vec<ServerRecord>>) -> Signal {
        let Some(servers) = servers else {
            warn!(id = %self.id, "replaceServer received empty message");
            return Signal::Fail;
        };
        debug!(id = %self.id, servers = servers.len(), "received replaceServer");
        let ids = servers.iter().map(|s| s.id.clone()).collect();
        self.store.write().await.replace(servers);
        let _ = self.events.send(NodeEvent::ServersReplaced(ids));
        Signal::Ok
    }

    fn on_start_over(&self) -> Signal {
        info!(id = %self.id, "all servers started");
        if let Some(callback) = &self.after_start_all {
            callback(&self.id);
        }
        let _ = self.events.send(NodeEvent::StartAll);
        Signal::Ok
    }

    async fn add_servers(&self, servers: Vec<ServerRecord>) {
        if servers.is_empty() {
            return;
        }
        let added = self.store.write().await.add(servers);
        let _ = self.events.send(NodeEvent::ServersAdded(added));
    }
}
