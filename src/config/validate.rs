// src/config/validate.rs

use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, DispatchConfig, HeartbeatConfig, MasterConfig, RawConfigFile,
};
use crate::dispatch::{Host, LoadFactors};
use crate::engine::EngineOptions;
use crate::errors::{MasterError, Result};
use crate::workflow::{TaskDefinition, TaskRelation, WorkflowDefinition};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = MasterError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        validate_task_dependencies(&raw)?;
        validate_dag(&raw)?;

        Ok(ConfigFile {
            master: master_config(&raw)?,
            engine: engine_options(&raw)?,
            heartbeat: heartbeat_config(&raw)?,
            dispatch: dispatch_config(&raw)?,
            workflow: workflow_definition(&raw)?,
        })
    }
}

fn duration_field(section: &str, key: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| MasterError::ConfigError(format!("[{section}].{key}: {e}")))
}

fn non_zero(section: &str, key: &str, value: u32) -> Result<u32> {
    if value == 0 {
        return Err(MasterError::ConfigError(format!(
            "[{section}].{key} must be >= 1 (got 0)"
        )));
    }
    Ok(value)
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(MasterError::ConfigError(
            "config must contain at least one [task.<code>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (code, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == code {
                return Err(MasterError::ConfigError(format!(
                    "task '{code}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(MasterError::ConfigError(format!(
                    "task '{code}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for code in cfg.task.keys() {
        graph.add_node(code.as_str());
    }
    for (code, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), code.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(MasterError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}

fn master_config(cfg: &RawConfigFile) -> Result<MasterConfig> {
    if cfg.master.host.trim().is_empty() {
        return Err(MasterError::ConfigError(
            "[master].host must not be empty".to_string(),
        ));
    }
    if cfg.master.worker_group.trim().is_empty() {
        return Err(MasterError::ConfigError(
            "[master].worker_group must not be empty".to_string(),
        ));
    }
    Ok(MasterConfig {
        host: Host::new(cfg.master.host.trim(), cfg.master.port),
        worker_group: cfg.master.worker_group.clone(),
    })
}

fn engine_options(cfg: &RawConfigFile) -> Result<EngineOptions> {
    let scan_interval = duration_field("engine", "scan_interval", &cfg.engine.scan_interval)?;
    if scan_interval.is_zero() {
        return Err(MasterError::ConfigError(
            "[engine].scan_interval must be greater than zero".to_string(),
        ));
    }
    Ok(EngineOptions {
        scan_interval,
        error_backoff: duration_field("engine", "error_backoff", &cfg.engine.error_backoff)?,
        max_consecutive_faults: non_zero(
            "engine",
            "max_consecutive_faults",
            cfg.engine.max_consecutive_faults,
        )?,
    })
}

fn heartbeat_config(cfg: &RawConfigFile) -> Result<HeartbeatConfig> {
    let interval = duration_field("heartbeat", "interval", &cfg.heartbeat.interval)?;
    if interval.is_zero() {
        return Err(MasterError::ConfigError(
            "[heartbeat].interval must be greater than zero".to_string(),
        ));
    }
    Ok(HeartbeatConfig {
        interval,
        max_failures: non_zero("heartbeat", "max_failures", cfg.heartbeat.max_failures)?,
        dead_after_missed: non_zero(
            "heartbeat",
            "dead_after_missed",
            cfg.heartbeat.dead_after_missed,
        )?,
        failover_policy: cfg.heartbeat.failover_policy,
    })
}

fn dispatch_config(cfg: &RawConfigFile) -> Result<DispatchConfig> {
    let d = &cfg.dispatch;
    for (key, value) in [
        ("cpu_factor", d.cpu_factor),
        ("memory_factor", d.memory_factor),
        ("task_factor", d.task_factor),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(MasterError::ConfigError(format!(
                "[dispatch].{key} must be a non-negative number (got {value})"
            )));
        }
    }

    Ok(DispatchConfig {
        selector: d.selector,
        warm_up: duration_field("dispatch", "warm_up", &d.warm_up)?,
        no_host_retry_interval: duration_field(
            "dispatch",
            "no_host_retry_interval",
            &d.no_host_retry_interval,
        )?,
        factors: LoadFactors {
            cpu: d.cpu_factor,
            memory: d.memory_factor,
            tasks: d.task_factor,
        },
    })
}

fn workflow_definition(cfg: &RawConfigFile) -> Result<WorkflowDefinition> {
    let mut tasks = Vec::with_capacity(cfg.task.len());
    let mut relations = Vec::new();

    for (code, task) in cfg.task.iter() {
        let retry_interval = duration_field(
            &format!("task.{code}"),
            "retry_interval",
            &task.retry_interval,
        )?;

        let def = TaskDefinition {
            code: code.clone(),
            name: task.name.clone().unwrap_or_else(|| code.clone()),
            task_type: task.task_type.trim().to_uppercase(),
            command: task.command.clone(),
            worker_group: task
                .worker_group
                .clone()
                .unwrap_or_else(|| cfg.master.worker_group.clone()),
            max_retries: task.max_retries,
            retry_interval,
        };
        if def.kind() == crate::workflow::TaskKind::Physical && def.command.trim().is_empty() {
            return Err(MasterError::ConfigError(format!(
                "task '{code}' of type {} needs a `command`",
                def.task_type
            )));
        }
        tasks.push(def);

        for dep in task.after.iter() {
            relations.push(TaskRelation {
                pre: dep.clone(),
                post: code.clone(),
            });
        }
    }

    Ok(WorkflowDefinition {
        code: cfg.workflow.code,
        name: cfg.workflow.name.clone(),
        version: cfg.workflow.version,
        failure_strategy: cfg.workflow.failure_strategy,
        tasks,
        relations,
    })
}
