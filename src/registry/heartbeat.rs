// src/registry/heartbeat.rs

//! Heartbeat record and the sources that produce it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::Host;
use crate::errors::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Normal,
    /// Over its configured load; still alive but should not get new work.
    Busy,
}

/// Self-reported liveness payload, overwritten on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartBeat {
    pub host: String,
    pub port: u16,
    pub worker_group: String,
    pub start_time: DateTime<Utc>,
    pub report_time: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub load_average: f64,
    pub running_task_count: u32,
    pub host_weight: u32,
    pub server_status: ServerStatus,
    pub process_id: u32,
    pub sequence: u64,
}

impl HeartBeat {
    pub fn encode(&self) -> Result<String, RegistryError> {
        serde_json::to_string(self).map_err(|e| RegistryError::Codec {
            path: format!("{}:{}", self.host, self.port),
            message: e.to_string(),
        })
    }

    pub fn decode(path: &str, raw: &str) -> Result<Self, RegistryError> {
        serde_json::from_str(raw).map_err(|e| RegistryError::Codec {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Older than `max_age` at `now`. A report from the future (clock skew)
    /// is never stale.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match (now - self.report_time).to_std() {
            Ok(age) => age > max_age,
            Err(_) => false,
        }
    }
}

/// Produces the payload a node publishes on each tick.
pub trait HeartbeatSource: Send + Sync {
    fn heartbeat(&self) -> HeartBeat;
}

/// Resource metrics sampled for a heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub load_average: f64,
}

type Probe<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Heartbeat source for a master or worker process.
///
/// Resource metrics and the running-task count are pulled through closures
/// so the embedded worker can plug in its executor's live count.
pub struct NodeHeartbeatSource {
    host: Host,
    worker_group: String,
    weight: u32,
    start_time: DateTime<Utc>,
    /// At or above this many running tasks the node reports `Busy`.
    busy_threshold: Option<u32>,
    sequence: AtomicU64,
    running_tasks: Option<Probe<usize>>,
    resources: Option<Probe<ResourceSample>>,
}

impl NodeHeartbeatSource {
    pub fn new(host: Host, worker_group: impl Into<String>) -> Self {
        Self {
            host,
            worker_group: worker_group.into(),
            weight: 100,
            start_time: Utc::now(),
            busy_threshold: None,
            sequence: AtomicU64::new(0),
            running_tasks: None,
            resources: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_busy_threshold(mut self, threshold: u32) -> Self {
        self.busy_threshold = Some(threshold);
        self
    }

    pub fn with_running_tasks(mut self, sample: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        self.running_tasks = Some(Arc::new(sample));
        self
    }

    pub fn with_resources(
        mut self,
        sample: impl Fn() -> ResourceSample + Send + Sync + 'static,
    ) -> Self {
        self.resources = Some(Arc::new(sample));
        self
    }

    pub fn host(&self) -> &Host {
        &self.host
    }
}

impl HeartbeatSource for NodeHeartbeatSource {
    fn heartbeat(&self) -> HeartBeat {
        let running = self
            .running_tasks
            .as_ref()
            .map_or(0, |count| u32::try_from(count()).unwrap_or(u32::MAX));
        let sample = self.resources.as_ref().map(|read| read()).unwrap_or_default();
        let status = match self.busy_threshold {
            Some(limit) if running >= limit => ServerStatus::Busy,
            _ => ServerStatus::Normal,
        };

        HeartBeat {
            host: self.host.ip.clone(),
            port: self.host.port,
            worker_group: self.worker_group.clone(),
            start_time: self.start_time,
            report_time: Utc::now(),
            cpu_usage: sample.cpu_usage,
            memory_usage: sample.memory_usage,
            load_average: sample.load_average,
            running_task_count: running,
            host_weight: self.weight,
            server_status: status,
            process_id: std::process::id(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }
}
