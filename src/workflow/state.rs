// src/workflow/state.rs

//! Workflow and task lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a workflow instance.
///
/// `Pausing` and `Stopping` are the in-between states after a pause or kill
/// was requested but some tasks have not reported back yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Created,
    Running,
    Pausing,
    Paused,
    Stopping,
    Stopped,
    Success,
    Failed,
}

impl WorkflowState {
    /// Terminal states end the instance; it is evicted afterwards.
    /// `Paused` is not terminal: a trigger resumes it.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Success | WorkflowState::Failed | WorkflowState::Stopped
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Created => "CREATED",
            WorkflowState::Running => "RUNNING",
            WorkflowState::Pausing => "PAUSING",
            WorkflowState::Paused => "PAUSED",
            WorkflowState::Stopping => "STOPPING",
            WorkflowState::Stopped => "STOPPED",
            WorkflowState::Success => "SUCCESS",
            WorkflowState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one task inside a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Runnable (predecessors satisfied) but not handed to an executor yet,
    /// or waiting for a retry / a free host.
    Created,
    Dispatched,
    Running,
    Success,
    Failed,
    Killed,
    Paused,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failed | TaskState::Killed)
    }

    /// An executor currently owns the task.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Dispatched | TaskState::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "CREATED",
            TaskState::Dispatched => "DISPATCHED",
            TaskState::Running => "RUNNING",
            TaskState::Success => "SUCCESS",
            TaskState::Failed => "FAILED",
            TaskState::Killed => "KILLED",
            TaskState::Paused => "PAUSED",
        };
        f.write_str(s)
    }
}

/// Result of a task as reported by its executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(String),
    Killed,
    Paused,
}

/// Which cooperative control request was sent to an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Pause,
    Kill,
}

/// Two-state result of a pause/kill request.
///
/// `Accepted` means the intent is recorded and requests went out to the
/// executors; `Executed` means the effect has actually been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Accepted,
    Executed,
}

/// Control request attached to a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub kind: ControlKind,
    pub outcome: ControlOutcome,
}
