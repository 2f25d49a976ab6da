// src/registry/discovery.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::dispatch::HostWeight;
use crate::errors::RegistryError;
use crate::registry::{HeartBeat, Registry, ServerStatus, dead_path, worker_group_path};

/// Live worker set of a group, read from the registry on every call.
pub struct HostDiscovery {
    registry: Arc<dyn Registry>,
    max_age: Duration,
}

impl HostDiscovery {
    pub fn new(registry: Arc<dyn Registry>, max_age: Duration) -> Self {
        Self { registry, max_age }
    }

    /// Workers of `group` that reported recently, are not marked dead and
    /// are not busy.
    pub fn workers(&self, group: &str, now: DateTime<Utc>) -> Result<Vec<HostWeight>, RegistryError> {
        let group_path = worker_group_path(group);
        let mut hosts = Vec::new();

        for addr in self.registry.children(&group_path)? {
            let path = format!("{group_path}/{addr}");
            if self.registry.exists(&dead_path(&path))? {
                continue;
            }
            let Some(raw) = self.registry.get(&path)? else {
                continue;
            };
            let beat = match HeartBeat::decode(&path, &raw) {
                Ok(beat) => beat,
                Err(err) => {
                    warn!(path = %path, error = %err, "skipping unreadable heartbeat");
                    continue;
                }
            };
            if beat.is_stale(now, self.max_age) {
                debug!(path = %path, "skipping stale worker");
                continue;
            }
            if beat.server_status == ServerStatus::Busy {
                debug!(path = %path, "skipping busy worker");
                continue;
            }
            hosts.push(HostWeight::from_heartbeat(&beat));
        }

        Ok(hosts)
    }
}
