// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::{Host, LoadFactors};
use crate::engine::EngineOptions;
use crate::types::{FailoverPolicy, FailureStrategy, SelectorKind};
use crate::workflow::WorkflowDefinition;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [master]
/// host = "127.0.0.1"
/// port = 5678
///
/// [engine]
/// scan_interval = "100ms"
///
/// [heartbeat]
/// interval = "10s"
/// max_failures = 3
///
/// [dispatch]
/// selector = "lower_weight"
///
/// [workflow]
/// name = "nightly"
/// failure_strategy = "end"
///
/// [task.extract]
/// command = "echo extract"
///
/// [task.load]
/// command = "echo load"
/// after = ["extract"]
/// ```
///
/// Every section except `[task.<code>]` is optional. Durations are strings
/// with an `ms`, `s`, `m` or `h` suffix and are only parsed during
/// validation, so this raw form never fails on a bad duration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub master: MasterSection,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub heartbeat: HeartbeatSection,

    #[serde(default)]
    pub dispatch: DispatchSection,

    #[serde(default)]
    pub workflow: WorkflowSection,

    /// Keys are the task codes.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker group used for tasks that do not name one, and the group the
    /// embedded worker registers in.
    #[serde(default = "default_worker_group")]
    pub worker_group: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5678
}

fn default_worker_group() -> String {
    "default".to_string()
}

impl Default for MasterSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            worker_group: default_worker_group(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_scan_interval")]
    pub scan_interval: String,

    #[serde(default = "default_error_backoff")]
    pub error_backoff: String,

    #[serde(default = "default_max_consecutive_faults")]
    pub max_consecutive_faults: u32,
}

fn default_scan_interval() -> String {
    "100ms".to_string()
}

fn default_error_backoff() -> String {
    "1s".to_string()
}

fn default_max_consecutive_faults() -> u32 {
    10
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            scan_interval: default_scan_interval(),
            error_backoff: default_error_backoff(),
            max_consecutive_faults: default_max_consecutive_faults(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSection {
    #[serde(default = "default_heartbeat_interval")]
    pub interval: String,

    /// Consecutive failed heartbeats after which a node stops itself.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Missed intervals after which a peer's last report counts as stale.
    #[serde(default = "default_dead_after_missed")]
    pub dead_after_missed: u32,

    #[serde(default)]
    pub failover_policy: FailoverPolicy,
}

fn default_heartbeat_interval() -> String {
    "10s".to_string()
}

fn default_max_failures() -> u32 {
    3
}

fn default_dead_after_missed() -> u32 {
    3
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
            max_failures: default_max_failures(),
            dead_after_missed: default_dead_after_missed(),
            failover_policy: FailoverPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    #[serde(default)]
    pub selector: SelectorKind,

    #[serde(default = "default_warm_up")]
    pub warm_up: String,

    #[serde(default = "default_no_host_retry_interval")]
    pub no_host_retry_interval: String,

    #[serde(default = "default_cpu_factor")]
    pub cpu_factor: f64,

    #[serde(default = "default_memory_factor")]
    pub memory_factor: f64,

    #[serde(default = "default_task_factor")]
    pub task_factor: f64,
}

fn default_warm_up() -> String {
    "60s".to_string()
}

fn default_no_host_retry_interval() -> String {
    "1s".to_string()
}

fn default_cpu_factor() -> f64 {
    LoadFactors::default().cpu
}

fn default_memory_factor() -> f64 {
    LoadFactors::default().memory
}

fn default_task_factor() -> f64 {
    LoadFactors::default().tasks
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            selector: SelectorKind::default(),
            warm_up: default_warm_up(),
            no_host_retry_interval: default_no_host_retry_interval(),
            cpu_factor: default_cpu_factor(),
            memory_factor: default_memory_factor(),
            task_factor: default_task_factor(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    #[serde(default = "default_workflow_name")]
    pub name: String,

    #[serde(default = "default_workflow_code")]
    pub code: u64,

    #[serde(default = "default_workflow_version")]
    pub version: u32,

    #[serde(default)]
    pub failure_strategy: FailureStrategy,
}

fn default_workflow_name() -> String {
    "workflow".to_string()
}

fn default_workflow_code() -> u64 {
    1
}

fn default_workflow_version() -> u32 {
    1
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            name: default_workflow_name(),
            code: default_workflow_code(),
            version: default_workflow_version(),
            failure_strategy: FailureStrategy::default(),
        }
    }
}

/// `[task.<code>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Display name; defaults to the task code.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_task_type")]
    pub task_type: String,

    /// Shell command for physical tasks. Logic tasks may leave it empty.
    #[serde(default)]
    pub command: String,

    /// This task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Falls back to `[master].worker_group`.
    #[serde(default)]
    pub worker_group: Option<String>,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_retry_interval")]
    pub retry_interval: String,
}

fn default_task_type() -> String {
    "SHELL".to_string()
}

fn default_retry_interval() -> String {
    "1s".to_string()
}

/// `[master]` after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    pub host: Host,
    pub worker_group: String,
}

/// `[heartbeat]` after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub max_failures: u32,
    pub dead_after_missed: u32,
    pub failover_policy: FailoverPolicy,
}

impl HeartbeatConfig {
    /// Age after which a peer's last report counts as stale.
    pub fn max_age(&self) -> Duration {
        self.interval * self.dead_after_missed
    }
}

/// `[dispatch]` after validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchConfig {
    pub selector: SelectorKind,
    pub warm_up: Duration,
    pub no_host_retry_interval: Duration,
    pub factors: LoadFactors,
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>` (see
/// [`crate::config::validate`]), so every instance carries parsed durations,
/// non-zero thresholds and an acyclic task graph.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub master: MasterConfig,
    pub engine: EngineOptions,
    pub heartbeat: HeartbeatConfig,
    pub dispatch: DispatchConfig,
    pub workflow: WorkflowDefinition,
}
