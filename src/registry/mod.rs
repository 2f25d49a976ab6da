// src/registry/mod.rs

//! Coordination registry boundary and the liveness protocol built on it.
//!
//! - [`Registry`] is the key/value interface of the external coordination
//!   service: plain and ephemeral keys, existence checks, child listing and
//!   connection-state listeners.
//! - [`memory`] is an in-process implementation used by the binary and tests.
//! - [`heartbeat`] / [`heartbeat_task`] publish a node's own liveness.
//! - [`monitor`] judges peers; [`discovery`] turns live workers into
//!   dispatch candidates.
//! - [`session`] listens to connection-state changes for both sides.

use std::sync::Arc;

use crate::dispatch::Host;
use crate::errors::RegistryError;

pub mod discovery;
pub mod heartbeat;
pub mod heartbeat_task;
pub mod memory;
pub mod monitor;
pub mod session;

pub use discovery::HostDiscovery;
pub use heartbeat::{HeartBeat, HeartbeatSource, NodeHeartbeatSource, ServerStatus};
pub use heartbeat_task::{HeartbeatTask, HeartbeatTick, StopReason};
pub use memory::InMemoryRegistry;
pub use monitor::{HeartbeatMonitor, PeerHealth};
pub use session::SessionWatch;

pub const MASTER_ROOT: &str = "/nodes/master";
pub const WORKER_ROOT: &str = "/nodes/worker";
pub const DEAD_ROOT: &str = "/dead-servers";

pub fn master_path(host: &Host) -> String {
    format!("{MASTER_ROOT}/{host}")
}

pub fn worker_group_path(group: &str) -> String {
    format!("{WORKER_ROOT}/{group}")
}

pub fn worker_path(group: &str, host: &Host) -> String {
    format!("{WORKER_ROOT}/{group}/{host}")
}

/// Marker written by a monitor when it declared `path` dead.
pub fn dead_path(path: &str) -> String {
    format!("{DEAD_ROOT}{path}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Temporarily unreachable; ephemeral keys are still held.
    Suspended,
    Reconnected,
    /// Session lost; ephemeral keys are gone.
    Disconnected,
}

pub trait ConnectionListener: Send + Sync {
    fn on_state_change(&self, state: ConnectionState);
}

/// Key/value client of the coordination service.
///
/// Passed around explicitly (`Arc<dyn Registry>`) to every component that
/// needs it; there is no process-wide instance.
pub trait Registry: Send + Sync {
    /// Create or overwrite `key`. Ephemeral keys vanish when the owning
    /// connection is lost.
    fn put(&self, key: &str, value: &str, ephemeral: bool) -> Result<(), RegistryError>;

    fn get(&self, key: &str) -> Result<Option<String>, RegistryError>;

    fn exists(&self, key: &str) -> Result<bool, RegistryError>;

    /// Names (last path segment) of the direct children of `key`, sorted.
    fn children(&self, key: &str) -> Result<Vec<String>, RegistryError>;

    fn delete(&self, key: &str) -> Result<(), RegistryError>;

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_registry_layout() {
        let host = Host::new("10.1.1.1", 1234);
        assert_eq!(master_path(&host), "/nodes/master/10.1.1.1:1234");
        assert_eq!(worker_path("etl", &host), "/nodes/worker/etl/10.1.1.1:1234");
        assert_eq!(
            dead_path(&worker_path("etl", &host)),
            "/dead-servers/nodes/worker/etl/10.1.1.1:1234"
        );
    }
}
