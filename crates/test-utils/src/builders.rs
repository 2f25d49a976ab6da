#![allow(dead_code)]

use std::time::Duration;

use dagmaster::config::model::TaskConfig;
use dagmaster::config::{ConfigFile, RawConfigFile};
use dagmaster::types::FailureStrategy;
use dagmaster::workflow::{TaskDefinition, TaskRelation, WorkflowDefinition};

/// Builder for `WorkflowDefinition`.
pub struct WorkflowDefinitionBuilder {
    def: WorkflowDefinition,
}

impl WorkflowDefinitionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            def: WorkflowDefinition {
                code: 1,
                name: name.to_string(),
                version: 1,
                failure_strategy: FailureStrategy::End,
                tasks: Vec::new(),
                relations: Vec::new(),
            },
        }
    }

    pub fn code(mut self, code: u64) -> Self {
        self.def.code = code;
        self
    }

    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.def.tasks.push(task);
        self
    }

    /// Shorthand for a `SHELL` task running `echo <code>`.
    pub fn shell(self, code: &str) -> Self {
        self.task(TaskDefinitionBuilder::new(code).build())
    }

    pub fn edge(mut self, pre: &str, post: &str) -> Self {
        self.def.relations.push(TaskRelation {
            pre: pre.to_string(),
            post: post.to_string(),
        });
        self
    }

    pub fn failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.def.failure_strategy = strategy;
        self
    }

    pub fn build(self) -> WorkflowDefinition {
        self.def
    }
}

/// Builder for `TaskDefinition`.
pub struct TaskDefinitionBuilder {
    task: TaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn new(code: &str) -> Self {
        Self {
            task: TaskDefinition {
                code: code.to_string(),
                name: code.to_string(),
                command: format!("echo {code}"),
                ..TaskDefinition::default()
            },
        }
    }

    pub fn task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.task.command = command.to_string();
        self
    }

    pub fn worker_group(mut self, group: &str) -> Self {
        self.task.worker_group = group.to_string();
        self
    }

    pub fn retries(mut self, max_retries: u32, interval: Duration) -> Self {
        self.task.max_retries = max_retries;
        self.task.retry_interval = interval;
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.task
    }
}

/// Builder for `ConfigFile` to simplify test setup.
#[derive(Default)]
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, code: &str, task: TaskConfig) -> Self {
        self.config.task.insert(code.to_string(), task);
        self
    }

    pub fn failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.config.workflow.failure_strategy = strategy;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(command: &str) -> Self {
        Self {
            task: TaskConfig {
                name: None,
                task_type: "SHELL".to_string(),
                command: command.to_string(),
                after: vec![],
                worker_group: None,
                max_retries: 0,
                retry_interval: "1s".to_string(),
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn retries(mut self, max_retries: u32, interval: &str) -> Self {
        self.task.max_retries = max_retries;
        self.task.retry_interval = interval.to_string();
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
