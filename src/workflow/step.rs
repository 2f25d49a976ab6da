// src/workflow/step.rs

//! Result types for a single state-machine step.

use std::time::Duration;

use crate::exec::{ControlTarget, DispatchRequest};
use crate::workflow::state::{ControlOutcome, WorkflowState};

/// Side effect requested by the state machine. The operator executes these
/// after the runnable's lock has been released.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnableCommand {
    /// Pick a host and hand the task to an executor.
    DispatchTask(DispatchRequest),
    PauseTask(ControlTarget),
    KillTask(ControlTarget),
    /// Re-inject a `TaskRedispatch` event after `delay`.
    ScheduleRedispatch { task: String, delay: Duration },
    /// The workflow reached a terminal state; send an alert.
    Notify(WorkflowState),
}

/// Structured result of one event applied to a workflow runnable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnableStep {
    pub commands: Vec<RunnableCommand>,
    /// Tasks that became dispatch-ready in this step.
    pub newly_ready: Vec<String>,
    /// Tasks whose failure was final in this step.
    pub newly_failed: Vec<String>,
    /// Set when this step moved the workflow into a new state.
    pub transition: Option<WorkflowState>,
    /// Set for pause/kill requests.
    pub control: Option<ControlOutcome>,
}

impl RunnableStep {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.transition.is_none() && self.control.is_none()
    }

    pub fn dispatched_tasks(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RunnableCommand::DispatchTask(req) => Some(req.task.as_str()),
                _ => None,
            })
            .collect()
    }
}
