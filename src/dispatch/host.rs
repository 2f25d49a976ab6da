// src/dispatch/host.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::HeartBeat;

/// Network identity of a master or worker process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,
    pub port: u16,
}

impl Host {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// `ip:port`, the form used in registry paths.
    pub fn address(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for Host {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected 'ip:port', got '{s}'"))?;
        if ip.is_empty() {
            return Err(format!("missing ip in '{s}'"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in '{s}': {e}"))?;
        Ok(Host::new(ip, port))
    }
}

/// Snapshot of one worker plus its load, rebuilt from the registry for
/// every dispatch decision. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct HostWeight {
    pub host: Host,
    pub worker_group: String,
    /// Static capacity weight; higher means more capable.
    pub weight: u32,
    /// CPU usage, 0.0 ..= 1.0.
    pub cpu_load: f64,
    /// Memory usage, 0.0 ..= 1.0.
    pub memory_usage: f64,
    pub running_tasks: u32,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl HostWeight {
    pub fn new(host: Host, worker_group: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            host,
            worker_group: worker_group.into(),
            weight: 100,
            cpu_load: 0.0,
            memory_usage: 0.0,
            running_tasks: 0,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    pub fn from_heartbeat(beat: &HeartBeat) -> Self {
        Self {
            host: Host::new(beat.host.clone(), beat.port),
            worker_group: beat.worker_group.clone(),
            weight: beat.host_weight.max(1),
            cpu_load: beat.cpu_usage,
            memory_usage: beat.memory_usage,
            running_tasks: beat.running_task_count,
            registered_at: beat.start_time,
            last_heartbeat: beat.report_time,
        }
    }
}
