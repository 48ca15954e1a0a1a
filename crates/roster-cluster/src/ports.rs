//! Port registry — which (host, port) pairs are already claimed.
//!
//! The registry is a borrowed view over a record set; it owns no state of
//! its own. A port is busy on a host when some other record on that host
//! uses it as `port` or `clientPort`.

use roster_core::ServerRecord;

/// Two records claiming the same port on the same host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConflict {
    pub host: String,
    pub port: u16,
    pub first: String,
    pub second: String,
}

pub struct PortRegistry<'a> {
    records: Vec<&'a ServerRecord>,
}

impl<'a> PortRegistry<'a> {
    pub fn new(records: impl IntoIterator<Item = &'a ServerRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// Whether any known record uses `port` on `host`.
    pub fn is_busy(&self, host: &str, port: u16) -> bool {
        self.owner(host, port, None).is_some()
    }

    /// The id of the record holding `port` on `host`, skipping `exclude`.
    pub fn owner(&self, host: &str, port: u16, exclude: Option<&str>) -> Option<&'a str> {
        self.records
            .iter()
            .filter(|r| exclude != Some(r.id.as_str()))
            .find(|r| r.claims(host, port))
            .copied()
            .map(|r| r.id.as_str())
    }

    /// First port of `candidate` already held by another record, with its owner.
    ///
    /// The candidate is never compared against itself.
    pub fn busy_port_of(&self, candidate: &ServerRecord) -> Option<(u16, &'a str)> {
        candidate.ports().find_map(|port| {
            self.owner(&candidate.host, port, Some(&candidate.id))
                .map(|owner| (port, owner))
        })
    }

    /// Every pairwise conflict inside the registry, in record order.
    pub fn conflicts(&self) -> Vec<PortConflict> {
        let mut found = Vec::new();
        for (i, a) in self.records.iter().enumerate() {
            for b in &self.records[i + 1..] {
                if a.host != b.host || a.id == b.id {
                    continue;
                }
                for port in a.ports() {
                    if b.claims(&a.host, port) {
                        found.push(PortConflict {
                            host: a.host.clone(),
                            port,
                            first: a.id.clone(),
                            second: b.id.clone(),
                        });
                    }
                }
            }
        }
        found
    }
}
