// src/workflow/definition.rs

//! Workflow and task definitions as read from the metadata store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dag::DependencyGraph;
use crate::errors::GraphError;
use crate::types::FailureStrategy;

/// Task types that run inside the master process instead of on a worker.
pub const LOGIC_TASK_TYPES: &[&str] = &["BARRIER", "CONDITIONS", "DEPENDENT", "SUB_WORKFLOW", "SWITCH"];

/// Where a task executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Evaluated in-process by the master.
    Logic,
    /// Sent to a remote worker.
    Physical,
}

impl TaskKind {
    pub fn of(task_type: &str) -> Self {
        let upper = task_type.trim().to_uppercase();
        if LOGIC_TASK_TYPES.contains(&upper.as_str()) {
            TaskKind::Logic
        } else {
            TaskKind::Physical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique within the workflow; also the graph node handle.
    pub code: String,
    pub name: String,
    pub task_type: String,
    pub command: String,
    pub worker_group: String,
    pub max_retries: u32,
    pub retry_interval: Duration,
}

impl Default for TaskDefinition {
    fn default() -> Self {
        Self {
            code: String::new(),
            name: String::new(),
            task_type: "SHELL".to_string(),
            command: String::new(),
            worker_group: "default".to_string(),
            max_retries: 0,
            retry_interval: Duration::from_secs(1),
        }
    }
}

impl TaskDefinition {
    pub fn kind(&self) -> TaskKind {
        TaskKind::of(&self.task_type)
    }
}

/// Edge `pre -> post`: `post` waits for `pre`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRelation {
    pub pre: String,
    pub post: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub code: u64,
    pub name: String,
    pub version: u32,
    pub failure_strategy: FailureStrategy,
    pub tasks: Vec<TaskDefinition>,
    pub relations: Vec<TaskRelation>,
}

impl WorkflowDefinition {
    /// Materialise the task graph for one workflow instance.
    pub fn build_graph(&self) -> Result<DependencyGraph<TaskDefinition>, GraphError> {
        let graph = DependencyGraph::new();

        for task in &self.tasks {
            graph.add_node(task.code.clone(), task.clone());
        }

        for rel in &self.relations {
            if !graph.contains_node(&rel.pre) {
                return Err(GraphError::UnknownNode(rel.pre.clone()));
            }
            if !graph.contains_node(&rel.post) {
                return Err(GraphError::UnknownNode(rel.post.clone()));
            }
            if !graph.add_edge(&rel.pre, &rel.post, (), false) {
                return Err(GraphError::CycleDetected);
            }
        }

        Ok(graph)
    }
}
