//! Domain types shared by the master and the monitors.
//!
//! A [`ServerDescriptor`] is what operators write in `roster.toml`; it may
//! be a template (`cluster = true`) that the expander turns into several
//! concrete [`ServerRecord`]s. Records are what travels over the wire and
//! what the membership store holds.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

/// Unique identifier of a server in the cluster.
pub type ServerId = String;

/// Full membership set keyed by server id.
pub type Snapshot = BTreeMap<ServerId, ServerRecord>;

/// Trailing marker meaning "auto-increment from this base".
pub const INCREMENT_MARKER: &str = "++";

// ── Ports ─────────────────────────────────────────────────────────

/// A port as written in a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPort", into = "RawPort")]
pub enum PortSpec {
    /// A literal port, `3010` or `"3010"`.
    Fixed(u16),
    /// A range start, `"3010++"`.
    Increment(u16),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Num(u64),
    Str(String),
}

impl TryFrom<RawPort> for PortSpec {
    type Error = CoreError;

    fn try_from(raw: RawPort) -> CoreResult<Self> {
        match raw {
            RawPort::Num(n) => u16::try_from(n)
                .map(PortSpec::Fixed)
                .map_err(|_| CoreError::InvalidPort(n.to_string())),
            RawPort::Str(s) => s.parse(),
        }
    }
}

impl From<PortSpec> for RawPort {
    fn from(spec: PortSpec) -> Self {
        match spec {
            PortSpec::Fixed(p) => RawPort::Num(u64::from(p)),
            PortSpec::Increment(p) => RawPort::Str(format!("{p}{INCREMENT_MARKER}")),
        }
    }
}

impl std::str::FromStr for PortSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let trimmed = s.trim();
        let (digits, increment) = match trimmed.strip_suffix(INCREMENT_MARKER) {
            Some(base) => (base, true),
            None => (trimmed, false),
        };
        let port: u16 = digits
            .parse()
            .map_err(|_| CoreError::InvalidPort(s.to_string()))?;
        Ok(if increment {
            PortSpec::Increment(port)
        } else {
            PortSpec::Fixed(port)
        })
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Fixed(p) => write!(f, "{p}"),
            PortSpec::Increment(p) => write!(f, "{p}{INCREMENT_MARKER}"),
        }
    }
}

impl PortSpec {
    pub fn is_increment(&self) -> bool {
        matches!(self, PortSpec::Increment(_))
    }

    /// Concrete port for the instance at `offset`. `None` on overflow.
    pub fn resolve(&self, offset: u32) -> Option<u16> {
        match *self {
            PortSpec::Fixed(p) => Some(p),
            PortSpec::Increment(base) => {
                let port = u32::from(base).checked_add(offset)?;
                u16::try_from(port).ok()
            }
        }
    }
}

fn literal_port<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    match PortSpec::deserialize(d)? {
        PortSpec::Fixed(p) => Ok(p),
        spec @ PortSpec::Increment(_) => Err(de::Error::custom(format!(
            "unexpanded port {spec} in server record"
        ))),
    }
}

fn literal_client_port<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
    match Option::<PortSpec>::deserialize(d)? {
        None => Ok(None),
        Some(PortSpec::Fixed(p)) => Ok(Some(p)),
        Some(spec) => Err(de::Error::custom(format!(
            "unexpanded client port {spec} in server record"
        ))),
    }
}

// ── Records ───────────────────────────────────────────────────────

/// One concrete cluster member.
///
/// Attributes the roster does not interpret (`frontend`, `args`, ...) are
/// kept in `extra` and survive every add/replace untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: ServerId,
    pub host: String,
    #[serde(deserialize_with = "literal_port")]
    pub port: u16,
    #[serde(
        default,
        deserialize_with = "literal_client_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_port: Option<u16>,
    pub server_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerRecord {
    pub fn new(id: &str, server_type: &str, host: &str, port: u16) -> Self {
        Self {
            id: id.to_string(),
            host: host.to_string(),
            port,
            client_port: None,
            server_type: server_type.to_string(),
            extra: Map::new(),
        }
    }

    pub fn with_client_port(mut self, client_port: u16) -> Self {
        self.client_port = Some(client_port);
        self
    }

    /// Decode a record received from the wire.
    ///
    /// Rejects anything that is not an object with a non-empty `id` and
    /// `host`.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        let record: ServerRecord = serde_json::from_value(value)
            .map_err(|e| CoreError::InvalidRecord(e.to_string()))?;
        if record.id.is_empty() {
            return Err(CoreError::InvalidRecord("empty id".to_string()));
        }
        if record.host.is_empty() {
            return Err(CoreError::InvalidRecord(format!(
                "server {} has an empty host",
                record.id
            )));
        }
        Ok(record)
    }

    /// Ports this record occupies on its host.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        std::iter::once(self.port).chain(self.client_port)
    }

    /// Whether this record occupies `port` on `host`.
    pub fn claims(&self, host: &str, port: u16) -> bool {
        self.host == host && self.ports().any(|p| p == port)
    }
}

/// Build a snapshot from a list of records, last one wins on duplicate ids.
pub fn snapshot_from_records(records: impl IntoIterator<Item = ServerRecord>) -> Snapshot {
    records.into_iter().map(|r| (r.id.clone(), r)).collect()
}

// ── Descriptors ───────────────────────────────────────────────────

/// A server entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    /// Required unless `cluster` is set; expanded instances get generated ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ServerId>,
    pub host: String,
    pub port: PortSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_port: Option<PortSpec>,
    /// Filled from the `[servers.<type>]` key when loaded from a config file.
    #[serde(default)]
    pub server_type: String,
    #[serde(default, alias = "isCluster")]
    pub cluster: bool,
    #[serde(default)]
    pub cluster_count: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerDescriptor {
    pub fn is_template(&self) -> bool {
        self.cluster
    }

    /// Whether any port field carries the increment marker.
    pub fn has_increment(&self) -> bool {
        self.port.is_increment() || self.client_port.is_some_and(|p| p.is_increment())
    }

    /// Convert a plain (non-template) descriptor into its record.
    pub fn to_record(&self) -> CoreResult<ServerRecord> {
        let id = self
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                CoreError::InvalidRecord(format!(
                    "{} server on {} has no id",
                    self.server_type, self.host
                ))
            })?;
        if self.has_increment() {
            return Err(CoreError::InvalidPort(format!(
                "server {id} uses {INCREMENT_MARKER} without cluster = true"
            )));
        }
        self.instantiate(id, 0)
    }

    /// Build the record for one expanded instance at `offset`.
    pub fn instantiate(&self, id: ServerId, offset: u32) -> CoreResult<ServerRecord> {
        let overflow = |spec: &PortSpec| {
            CoreError::InvalidPort(format!("{spec} + {offset} exceeds the port range"))
        };
        let port = self.port.resolve(offset).ok_or_else(|| overflow(&self.port))?;
        let client_port = match &self.client_port {
            Some(spec) => Some(spec.resolve(offset).ok_or_else(|| overflow(spec))?),
            None => None,
        };
        Ok(ServerRecord {
            id,
            host: self.host.clone(),
            port,
            client_port,
            server_type: self.server_type.clone(),
            extra: self.extra.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn port_spec_parses_literals_and_markers() {
        assert_eq!("3010".parse::<PortSpec>().unwrap(), PortSpec::Fixed(3010));
        assert_eq!("3010++".parse::<PortSpec>().unwrap(), PortSpec::Increment(3010));
        assert!("abc".parse::<PortSpec>().is_err());
        assert!("70000".parse::<PortSpec>().is_err());
    }

    #[test]
    fn port_spec_from_json_number_or_string() {
        let fixed: PortSpec = serde_json::from_value(json!(3005)).unwrap();
        assert_eq!(fixed, PortSpec::Fixed(3005));
        let inc: PortSpec = serde_json::from_value(json!("3010++")).unwrap();
        assert_eq!(inc, PortSpec::Increment(3010));
        assert_eq!(serde_json::to_value(inc).unwrap(), json!("3010++"));
    }

    #[test]
    fn resolve_offsets_increment_only() {
        assert_eq!(PortSpec::Fixed(80).resolve(5), Some(80));
        assert_eq!(PortSpec::Increment(3010).resolve(2), Some(3012));
        assert_eq!(PortSpec::Increment(65535).resolve(1), None);
    }

    #[test]
    fn record_keeps_extra_attributes() {
        let record = ServerRecord::from_value(json!({
            "id": "connector-1",
            "host": "127.0.0.1",
            "port": 4050,
            "clientPort": "3050",
            "serverType": "connector",
            "frontend": true
        }))
        .unwrap();

        assert_eq!(record.client_port, Some(3050));
        assert_eq!(record.extra.get("frontend"), Some(&json!(true)));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["clientPort"], json!(3050));
        assert_eq!(back["frontend"], json!(true));
    }

    #[test]
    fn record_rejects_malformed_input() {
        assert!(ServerRecord::from_value(json!("chat-1")).is_err());
        assert!(ServerRecord::from_value(json!({"id": "x", "host": "h"})).is_err());
        assert!(
            ServerRecord::from_value(json!({
                "id": "", "host": "h", "port": 1, "serverType": "chat"
            }))
            .is_err()
        );
        assert!(
            ServerRecord::from_value(json!({
                "id": "x", "host": "h", "port": "3010++", "serverType": "chat"
            }))
            .is_err()
        );
    }

    #[test]
    fn record_claims_both_ports() {
        let record = ServerRecord::new("c", "connector", "10.0.0.1", 4050).with_client_port(3050);
        assert!(record.claims("10.0.0.1", 4050));
        assert!(record.claims("10.0.0.1", 3050));
        assert!(!record.claims("10.0.0.2", 4050));
        assert!(!record.claims("10.0.0.1", 4051));
    }

    #[test]
    fn descriptor_accepts_is_cluster_alias() {
        let desc: ServerDescriptor = serde_json::from_value(json!({
            "host": "127.0.0.1",
            "port": "3010++",
            "serverType": "chat",
            "isCluster": true,
            "clusterCount": 2
        }))
        .unwrap();
        assert!(desc.is_template());
        assert_eq!(desc.cluster_count, 2);
        assert!(desc.has_increment());
    }

    #[test]
    fn plain_descriptor_requires_id_and_literal_ports() {
        let mut desc: ServerDescriptor = serde_json::from_value(json!({
            "id": "gate-1", "host": "127.0.0.1", "port": 3014, "serverType": "gate"
        }))
        .unwrap();
        let record = desc.to_record().unwrap();
        assert_eq!(record.id, "gate-1");
        assert_eq!(record.port, 3014);

        desc.port = PortSpec::Increment(3014);
        assert!(desc.to_record().is_err());

        desc.port = PortSpec::Fixed(3014);
        desc.id = None;
        assert!(desc.to_record().is_err());
    }
}
