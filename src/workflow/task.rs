// src/workflow/task.rs

//! Per-task execution state inside a workflow instance.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::dispatch::Host;
use crate::workflow::definition::{TaskDefinition, TaskKind};
use crate::workflow::state::{ControlKind, ControlOutcome, ControlRequest, TaskOutcome, TaskState};

/// One schedulable unit of work inside a workflow instance.
///
/// Created lazily, when all predecessors of its node are satisfied, and
/// dropped together with the owning workflow instance.
#[derive(Debug, Clone)]
pub struct TaskExecutionRunnable {
    definition: TaskDefinition,
    state: TaskState,
    /// `None` until a host was picked for the current attempt.
    host: Option<Host>,
    retry_times: u32,
    /// Bumped on every dispatch. Executor callbacks carry the attempt they
    /// belong to, so a late report for an earlier attempt can be told apart.
    attempt: u32,
    control: Option<ControlRequest>,
    failure: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskExecutionRunnable {
    pub fn new(definition: TaskDefinition) -> Self {
        let now = Utc::now();
        Self {
            definition,
            state: TaskState::Created,
            host: None,
            retry_times: 0,
            attempt: 0,
            control: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a task from persisted state (master restart).
    pub fn restored(definition: TaskDefinition, state: TaskState, retry_times: u32) -> Self {
        let mut task = Self::new(definition);
        task.state = state;
        task.retry_times = retry_times;
        task
    }

    pub fn code(&self) -> &str {
        &self.definition.code
    }

    pub fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    pub fn kind(&self) -> TaskKind {
        self.definition.kind()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn host(&self) -> Option<&Host> {
        self.host.as_ref()
    }

    pub fn retry_times(&self) -> u32 {
        self.retry_times
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn control(&self) -> Option<ControlRequest> {
        self.control
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn can_retry(&self) -> bool {
        self.retry_times < self.definition.max_retries
    }

    pub(crate) fn mark_dispatched(&mut self) {
        self.attempt += 1;
        self.set_state(TaskState::Dispatched);
    }

    pub(crate) fn assign_host(&mut self, host: Host) {
        self.host = Some(host);
        self.updated_at = Utc::now();
    }

    pub(crate) fn revert_dispatch(&mut self) {
        self.host = None;
        self.set_state(TaskState::Created);
    }

    pub(crate) fn mark_running(&mut self, host: Host) {
        self.host = Some(host);
        self.set_state(TaskState::Running);
    }

    /// Apply an executor outcome. A pending control request of the matching
    /// kind is flipped to `Executed`.
    pub(crate) fn finish(&mut self, outcome: &TaskOutcome) {
        let next = match outcome {
            TaskOutcome::Success => TaskState::Success,
            TaskOutcome::Failed(reason) => {
                self.failure = Some(reason.clone());
                TaskState::Failed
            }
            TaskOutcome::Killed => TaskState::Killed,
            TaskOutcome::Paused => TaskState::Paused,
        };

        if let Some(req) = self.control.as_mut() {
            let observed = matches!(
                (req.kind, next),
                (ControlKind::Kill, TaskState::Killed) | (ControlKind::Pause, TaskState::Paused)
            );
            if observed {
                req.outcome = ControlOutcome::Executed;
            }
        }

        self.set_state(next);
    }

    /// Back to `Created` for another attempt.
    pub(crate) fn reset_for_retry(&mut self) {
        self.retry_times += 1;
        self.host = None;
        self.control = None;
        self.set_state(TaskState::Created);
    }

    /// A paused task resumes from scratch.
    pub(crate) fn reset_for_resume(&mut self) {
        self.host = None;
        self.control = None;
        self.set_state(TaskState::Created);
    }

    pub(crate) fn request_control(&mut self, kind: ControlKind) {
        self.control = Some(ControlRequest {
            kind,
            outcome: ControlOutcome::Accepted,
        });
        self.updated_at = Utc::now();
    }

    fn set_state(&mut self, next: TaskState) {
        debug!(task = %self.definition.code, from = %self.state, to = %next, "task state change");
        self.state = next;
        self.updated_at = Utc::now();
    }
}
