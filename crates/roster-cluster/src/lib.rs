//! roster-cluster — membership sync and topology expansion.
//!
//! Keeps every monitor's view of the cluster in step with the master,
//! and turns templated server descriptors into concrete, collision-free
//! server records.
//!
//! # Architecture
//!
//! ```text
//! Config load / master
//!   ├── ClusterExpander
//!   │   ├── per-host sequence counters (ExpansionSession)
//!   │   └── PortRegistry → skips ports already claimed on the host
//!   └── Watchdog
//!       ├── subscribe → returns the canonical snapshot
//!       ├── add / remove / replace → pushed to every subscriber
//!       └── record → broadcasts startOver once all servers reported
//!
//! Monitor node
//!   └── MonitorWatcher
//!       ├── start() → subscribe request, installs the snapshot
//!       ├── run() → applies pushes one at a time, replies OK / FAIL
//!       └── MembershipStore (node-local id → record map)
//! ```

pub mod error;
pub mod expander;
pub mod master;
pub mod membership;
pub mod ports;
pub mod protocol;
pub mod transport;
pub mod watcher;

pub use error::{ClusterError, ClusterResult};
pub use expander::{ClusterExpander, ExpansionSession, expand_descriptors};
pub use master::{Acks, Watchdog};
pub use membership::MembershipStore;
pub use ports::{PortConflict, PortRegistry};
pub use protocol::{MasterNotify, MasterRequest, MonitorMessage, Signal};
pub use transport::{Inbound, LocalTransport, Transport};
pub use watcher::{AfterStartAll, MonitorWatcher, NodeEvent, WatcherState};
