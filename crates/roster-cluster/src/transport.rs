//! Transport seam between monitors and the master.
//!
//! The watcher only needs two calls: a request that resolves exactly once
//! with the master's reply, and a fire-and-forget notify. [`LocalTransport`]
//! implements both in-process on top of tokio channels; a networked
//! transport implements the same trait.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::master::Watchdog;
use crate::protocol::{MasterNotify, MasterRequest, Signal, encode_snapshot};

/// Capacity of a monitor's inbound queue.
pub const INBOX_CAPACITY: usize = 64;

/// One pushed message awaiting a monitor's verdict.
///
/// Dropping `reply` without sending tells the master the message was
/// ignored.
#[derive(Debug)]
pub struct Inbound {
    pub message: Value,
    pub reply: oneshot::Sender<Signal>,
}

impl Inbound {
    pub fn new(message: Value) -> (Self, oneshot::Receiver<Signal>) {
        let (reply, rx) = oneshot::channel();
        (Self { message, reply }, rx)
    }
}

/// What the monitor watcher needs from the transport layer.
pub trait Transport: Send + Sync + 'static {
    /// Send `msg` to `target` and wait for its single reply.
    fn request(
        &self,
        target: &str,
        msg: MasterRequest,
    ) -> impl Future<Output = ClusterResult<Value>> + Send;

    /// Send `msg` to `target` without waiting for anything.
    fn notify(&self, target: &str, msg: MasterNotify);
}

/// In-process transport wiring one monitor to a [`Watchdog`].
#[derive(Clone)]
pub struct LocalTransport {
    watchdog: Arc<Watchdog>,
    inbox: mpsc::Sender<Inbound>,
}

impl LocalTransport {
    /// Create a transport for one monitor, plus the inbox its watcher drains.
    pub fn connect(watchdog: Arc<Watchdog>) -> (Self, mpsc::Receiver<Inbound>) {
        let (inbox, rx) = mpsc::channel(INBOX_CAPACITY);
        (Self { watchdog, inbox }, rx)
    }

    fn check_target(&self, target: &str) -> ClusterResult<()> {
        if target == self.watchdog.name() {
            Ok(())
        } else {
            Err(ClusterError::UnknownTarget(target.to_string()))
        }
    }
}

impl Transport for LocalTransport {
    async fn request(&self, target: &str, msg: MasterRequest) -> ClusterResult<Value> {
        self.check_target(target)?;
        debug!(%target, ?msg, "local request");
        match msg {
            MasterRequest::Subscribe { id } => {
                let snapshot = self.watchdog.subscribe(&id, self.inbox.clone()).await;
                Ok(encode_snapshot(&snapshot))
            }
        }
    }

    fn notify(&self, target: &str, msg: MasterNotify) {
        if let Err(e) = self.check_target(target) {
            warn!(error = %e, "dropping notify");
            return;
        }
        let watchdog = self.watchdog.clone();
        tokio::spawn(async move {
            match msg {
                MasterNotify::Record { id } => {
                    watchdog.record(&id).await;
                }
            }
        });
    }
}
