//! Wire messages exchanged between monitors and the master.
//!
//! Every message is a JSON object tagged by `action`. Outbound messages
//! are plain serde enums. Inbound pushes are decoded by hand into
//! [`MonitorMessage`] so that a missing or malformed field becomes a
//! handler-level `FAIL` instead of a decode error, and an unknown action
//! is kept as [`MonitorMessage::Unknown`] for newer protocol versions.

use roster_core::{ServerId, ServerRecord, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::error::{ClusterError, ClusterResult};

/// Request sent from a monitor to the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum MasterRequest {
    Subscribe { id: ServerId },
}

/// Fire-and-forget notification from a monitor to the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum MasterNotify {
    /// The node finished its local startup.
    Record { id: ServerId },
}

/// Per-message result code returned by monitor handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAIL")]
    Fail,
}

/// Push message from the master to a monitor.
///
/// `None` payloads mean the required field was absent or unusable; the
/// handler answers those with [`Signal::Fail`].
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorMessage {
    AddServer { server: Option<ServerRecord> },
    RemoveServer { id: Option<ServerId> },
    ReplaceServer { servers: Option<Vec<ServerRecord>> },
    StartOver,
    Unknown(String),
}

impl MonitorMessage {
    /// Decode an inbound push. Returns `None` when there is no `action`.
    pub fn decode(value: &Value) -> Option<Self> {
        let action = value.get("action")?.as_str()?;
        let field = |name: &str| value.get(name).filter(|v| !v.is_null());

        Some(match action {
            "addServer" => MonitorMessage::AddServer {
                server: field("server").and_then(|v| decode_record(v.clone())),
            },
            "removeServer" => MonitorMessage::RemoveServer {
                id: field("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string),
            },
            "replaceServer" => MonitorMessage::ReplaceServer {
                servers: field("servers")
                    .and_then(Value::as_array)
                    .map(|list| decode_records(list.iter().cloned())),
            },
            "startOver" => MonitorMessage::StartOver,
            other => MonitorMessage::Unknown(other.to_string()),
        })
    }

    /// Wire form, as the master sends it.
    pub fn encode(&self) -> Value {
        match self {
            MonitorMessage::AddServer { server } => json!({ "action": "addServer", "server": server }),
            MonitorMessage::RemoveServer { id } => json!({ "action": "removeServer", "id": id }),
            MonitorMessage::ReplaceServer { servers } => {
                json!({ "action": "replaceServer", "servers": servers })
            }
            MonitorMessage::StartOver => json!({ "action": "startOver" }),
            MonitorMessage::Unknown(action) => json!({ "action": action }),
        }
    }

    pub fn action(&self) -> &str {
        match self {
            MonitorMessage::AddServer { .. } => "addServer",
            MonitorMessage::RemoveServer { .. } => "removeServer",
            MonitorMessage::ReplaceServer { .. } => "replaceServer",
            MonitorMessage::StartOver => "startOver",
            MonitorMessage::Unknown(action) => action,
        }
    }
}

fn decode_record(value: Value) -> Option<ServerRecord> {
    match ServerRecord::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "skipping malformed server record");
            None
        }
    }
}

/// Decode a batch of records, dropping the malformed ones.
pub fn decode_records(values: impl IntoIterator<Item = Value>) -> Vec<ServerRecord> {
    values.into_iter().filter_map(decode_record).collect()
}

/// Decode a subscribe reply: an object mapping id to record.
///
/// `null` counts as an empty membership. Malformed entries are skipped.
pub fn decode_snapshot(value: Value) -> ClusterResult<Vec<ServerRecord>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(decode_records(map.into_iter().map(|(_, v)| v))),
        other => Err(ClusterError::Protocol(format!(
            "subscribe reply is not a server map: {other}"
        ))),
    }
}

pub fn encode_snapshot(snapshot: &Snapshot) -> Value {
    json!(snapshot)
}
