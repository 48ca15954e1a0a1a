//! Membership store — the node-local view of which servers exist.
//!
//! Mutated only through `install_snapshot`, `add`, `remove` and `replace`.
//! Every mutation is idempotent: applying the same input twice leaves the
//! same observable mapping as applying it once.

use roster_core::{ServerId, ServerRecord, Snapshot};
use tracing::{debug, info};

/// Node-local mapping from server id to record.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MembershipStore {
    servers: Snapshot,
}

impl MembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mapping with `records`.
    pub fn install_snapshot(&mut self, records: impl IntoIterator<Item = ServerRecord>) {
        self.servers = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        info!(servers = self.servers.len(), "membership snapshot installed");
    }

    /// Insert or overwrite each record by id.
    ///
    /// Returns the ids written, in input order.
    pub fn add(&mut self, records: impl IntoIterator<Item = ServerRecord>) -> Vec<ServerId> {
        let mut written = Vec::new();
        for record in records {
            debug!(id = %record.id, host = %record.host, port = record.port, "server added");
            written.push(record.id.clone());
            self.servers.insert(record.id.clone(), record);
        }
        written
    }

    /// Delete each id that is present. Absent ids are ignored.
    ///
    /// Returns the ids that were actually removed.
    pub fn remove<S: AsRef<str>>(&mut self, ids: &[S]) -> Vec<ServerId> {
        let mut removed = Vec::new();
        for id in ids {
            let id = id.as_ref();
            if self.servers.remove(id).is_some() {
                debug!(%id, "server removed");
                removed.push(id.to_string());
            }
        }
        removed
    }

    /// Full authoritative resync. Same effect as [`install_snapshot`].
    ///
    /// [`install_snapshot`]: MembershipStore::install_snapshot
    pub fn replace(&mut self, records: impl IntoIterator<Item = ServerRecord>) {
        self.install_snapshot(records);
    }

    pub fn get(&self, id: &str) -> Option<&ServerRecord> {
        self.servers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.servers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn ids(&self) -> Vec<ServerId> {
        self.servers.keys().cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &ServerRecord> {
        self.servers.values()
    }

    /// Peers of a given server type, e.g. every `chat` server.
    pub fn by_type<'a>(&'a self, server_type: &'a str) -> impl Iterator<Item = &'a ServerRecord> {
        self.servers.values().filter(move |r| r.server_type == server_type)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.servers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, port: u16) -> ServerRecord {
        ServerRecord::new(id, "chat", "127.0.0.1", port)
    }

    #[test]
    fn add_then_remove_restores_previous_state() {
        let mut store = MembershipStore::new();
        store.add([rec("a", 3010)]);
        let before = store.clone();

        store.add([rec("b", 3011)]);
        store.remove(&["b"]);

        assert_eq!(store, before);
    }

    #[test]
    fn repeated_add_is_a_noop() {
        let mut store = MembershipStore::new();
        store.add([rec("a", 3010)]);
        let once = store.snapshot();
        store.add([rec("a", 3010)]);

        assert_eq!(store.snapshot(), once);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn add_overwrites_by_id() {
        let mut store = MembershipStore::new();
        store.add([rec("a", 3010)]);
        store.add([rec("a", 4010)]);
        assert_eq!(store.get("a").unwrap().port, 4010);
    }

    #[test]
    fn add_empty_input_is_a_noop() {
        let mut store = MembershipStore::new();
        store.add([rec("a", 3010)]);
        let written = store.add(Vec::new());
        assert!(written.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_absent_id_is_ignored() {
        let mut store = MembershipStore::new();
        store.add([rec("a", 3010)]);

        let removed = store.remove(&["missing"]);
        assert!(removed.is_empty());
        assert!(store.contains("a"));
    }

    #[test]
    fn replace_is_idempotent() {
        let set = vec![rec("c", 3012), rec("d", 3013)];

        let mut store = MembershipStore::new();
        store.add([rec("a", 3010)]);
        store.replace(set.clone());
        let once = store.snapshot();
        store.replace(set);

        assert_eq!(store.snapshot(), once);
        assert_eq!(store.ids(), vec!["c".to_string(), "d".to_string()]);
    }

    #[test]
    fn by_type_filters_peers() {
        let mut store = MembershipStore::new();
        store.add([
            rec("chat-1", 3010),
            ServerRecord::new("gate-1", "gate", "127.0.0.1", 3014),
        ]);

        let chats: Vec<&str> = store.by_type("chat").map(|r| r.id.as_str()).collect();
        assert_eq!(chats, vec!["chat-1"]);
    }
}
