// src/engine/event.rs

//! Events accepted by a workflow instance.

use std::fmt;

use crate::dispatch::Host;
use crate::workflow::TaskOutcome;

/// Operation requested on one workflow instance.
///
/// Closed set: the engine matches on it exhaustively, so adding a variant
/// forces every operator to handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Start the instance, or resume it when paused.
    Trigger,
    Pause,
    Kill,
    /// The executor accepted a task and runs it on `host`. `attempt` is
    /// the one from the dispatch request.
    TaskAck {
        task: String,
        attempt: u32,
        host: Host,
    },
    TaskResult {
        task: String,
        attempt: u32,
        outcome: TaskOutcome,
    },
    /// Re-send a task that waits in `Created`.
    TaskRedispatch { task: String },
    /// Workflow-level failure, e.g. an undeliverable pause/kill request.
    WorkflowFailure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowEvent {
    pub workflow_instance_id: u64,
    pub kind: EventKind,
}

impl WorkflowEvent {
    pub fn new(workflow_instance_id: u64, kind: EventKind) -> Self {
        Self {
            workflow_instance_id,
            kind,
        }
    }

    pub fn trigger(workflow_instance_id: u64) -> Self {
        Self::new(workflow_instance_id, EventKind::Trigger)
    }

    pub fn pause(workflow_instance_id: u64) -> Self {
        Self::new(workflow_instance_id, EventKind::Pause)
    }

    pub fn kill(workflow_instance_id: u64) -> Self {
        Self::new(workflow_instance_id, EventKind::Kill)
    }

    pub fn task_ack(
        workflow_instance_id: u64,
        task: impl Into<String>,
        attempt: u32,
        host: Host,
    ) -> Self {
        Self::new(
            workflow_instance_id,
            EventKind::TaskAck {
                task: task.into(),
                attempt,
                host,
            },
        )
    }

    pub fn task_result(
        workflow_instance_id: u64,
        task: impl Into<String>,
        attempt: u32,
        outcome: TaskOutcome,
    ) -> Self {
        Self::new(
            workflow_instance_id,
            EventKind::TaskResult {
                task: task.into(),
                attempt,
                outcome,
            },
        )
    }

    pub fn task_redispatch(workflow_instance_id: u64, task: impl Into<String>) -> Self {
        Self::new(
            workflow_instance_id,
            EventKind::TaskRedispatch { task: task.into() },
        )
    }

    pub fn failure(workflow_instance_id: u64, reason: impl Into<String>) -> Self {
        Self::new(
            workflow_instance_id,
            EventKind::WorkflowFailure {
                reason: reason.into(),
            },
        )
    }

    /// Short upper-case tag used in logs.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            EventKind::Trigger => "TRIGGER",
            EventKind::Pause => "PAUSE",
            EventKind::Kill => "KILL",
            EventKind::TaskAck { .. } => "TASK_ACK",
            EventKind::TaskResult { .. } => "TASK_RESULT",
            EventKind::TaskRedispatch { .. } => "TASK_REDISPATCH",
            EventKind::WorkflowFailure { .. } => "WORKFLOW_FAILURE",
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.event_type(), self.workflow_instance_id)
    }
}
