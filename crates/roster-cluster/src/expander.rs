//! Cluster expander — turns templated descriptors into concrete records.
//!
//! A template such as `{ serverType = "chat", port = "3010++", cluster =
//! true, clusterCount = 2 }` becomes two records with distinct ids and
//! ports. Numbering continues per host for the lifetime of an
//! [`ExpansionSession`], so two templates sharing a host never hand out
//! the same sequence value, and therefore never the same offset.

use std::collections::HashMap;

use roster_core::{ServerDescriptor, ServerRecord, Snapshot};
use tracing::{debug, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::ports::PortRegistry;

/// Per-host sequence counters for one expansion session.
///
/// Counters only ever grow. Create one session per application start and
/// reuse it for every expansion in that run.
#[derive(Debug, Default, Clone)]
pub struct ExpansionSession {
    next: HashMap<String, u32>,
}

impl ExpansionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence value the next instance on `host` will receive.
    pub fn peek(&self, host: &str) -> u32 {
        self.next.get(host).copied().unwrap_or(0)
    }

    /// Take the current sequence value for `host` and bump the counter.
    fn advance(&mut self, host: &str) -> u32 {
        let slot = self.next.entry(host.to_string()).or_insert(0);
        let seq = *slot;
        *slot += 1;
        seq
    }
}

/// Expands descriptors against a growing view of already-known records.
#[derive(Debug, Default)]
pub struct ClusterExpander {
    session: ExpansionSession,
}

impl ClusterExpander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume numbering from an existing session.
    pub fn with_session(session: ExpansionSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &ExpansionSession {
        &self.session
    }

    /// Expand one descriptor.
    ///
    /// Plain descriptors come back unchanged as a single record. Templates
    /// yield `clusterCount` records whose ports avoid everything in
    /// `existing` on the same host.
    pub fn expand(
        &mut self,
        desc: &ServerDescriptor,
        existing: &Snapshot,
    ) -> ClusterResult<Snapshot> {
        let mut out = Snapshot::new();

        if !desc.is_template() {
            let record = desc.to_record()?;
            if existing.contains_key(&record.id) {
                return Err(ClusterError::DuplicateId(record.id));
            }
            out.insert(record.id.clone(), record);
            return Ok(out);
        }

        if desc.cluster_count == 0 {
            warn!(server_type = %desc.server_type, host = %desc.host, "cluster template with clusterCount = 0");
            return Ok(out);
        }

        let incrementing = desc.has_increment();

        while out.len() < desc.cluster_count as usize {
            let seq = self.session.advance(&desc.host);
            let id = format!("{}-server-{}-{}", desc.server_type, desc.host, seq);
            if existing.contains_key(&id) {
                debug!(%id, "expanded id already known, skipping sequence value");
                continue;
            }

            let offset = if incrementing { seq } else { 0 };
            let record = desc.instantiate(id, offset)?;

            let registry = PortRegistry::new(existing.values().chain(out.values()));
            let mut skipped = false;
            for port in record.ports() {
                let Some(owner) = registry.owner(&record.host, port, Some(&record.id)) else {
                    continue;
                };
                // A literal port stays busy whatever the sequence value.
                if is_literal_port(desc, &record, port) {
                    return Err(ClusterError::PortConflict {
                        host: record.host.clone(),
                        port,
                        owner: owner.to_string(),
                    });
                }
                debug!(id = %record.id, port, %owner, "port busy, skipping sequence value");
                skipped = true;
            }
            if skipped {
                continue;
            }

            debug!(id = %record.id, host = %record.host, port = record.port, "expanded cluster instance");
            out.insert(record.id.clone(), record);
        }

        Ok(out)
    }

    /// Expand a whole set of descriptors into one snapshot.
    ///
    /// Each expansion sees the records produced before it, so plain
    /// servers listed earlier are never shadowed by later templates.
    pub fn expand_all<'a>(
        &mut self,
        descriptors: impl IntoIterator<Item = &'a ServerDescriptor>,
        existing: &Snapshot,
    ) -> ClusterResult<Snapshot> {
        let mut known = existing.clone();
        let mut out = Snapshot::new();

        // Plain descriptors first so templates steer around their fixed ports.
        let (plain, templates): (Vec<_>, Vec<_>) =
            descriptors.into_iter().partition(|d| !d.is_template());

        for desc in plain.into_iter().chain(templates) {
            for (id, record) in self.expand(desc, &known)? {
                known.insert(id.clone(), record.clone());
                out.insert(id, record);
            }
        }

        Ok(out)
    }
}

/// Whether `port` on `record` came from a descriptor field without `++`.
fn is_literal_port(desc: &ServerDescriptor, record: &ServerRecord, port: u16) -> bool {
    (record.port == port && !desc.port.is_increment())
        || (record.client_port == Some(port) && desc.client_port.is_some_and(|p| !p.is_increment()))
}

/// Convenience wrapper: expand `descriptors` in a fresh session.
pub fn expand_descriptors(descriptors: &[ServerDescriptor]) -> ClusterResult<Snapshot> {
    ClusterExpander::new().expand_all(descriptors, &Snapshot::new())
}

/// Records of `snapshot` hosted on `host`, in id order.
pub fn records_on_host<'a>(snapshot: &'a Snapshot, host: &'a str) -> impl Iterator<Item = &'a ServerRecord> {
    snapshot.values().filter(move |r| r.host == host)
}
