// src/workflow/runnable.rs

//! Workflow instance state machine.
//!
//! [`WorkflowExecutionRunnable`] is synchronous and performs no IO. Every
//! operation mutates the instance and returns a [`RunnableStep`] describing
//! the side effects (dispatch, pause, kill, delayed redispatch, alert) that
//! the engine operator should carry out afterwards.
//!
//! Only the engine's firing pass for this instance calls the mutating
//! operations, so at most one writer is active at a time. The internal mutex
//! exists so readers (tests, failover, the store writer) can look at a
//! consistent state from other tasks.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::DependencyGraph;
use crate::dispatch::Host;
use crate::engine::repository::{EventRepository, InMemoryEventRepository};
use crate::errors::{GraphError, RunnableError};
use crate::exec::{ControlTarget, DispatchRequest};
use crate::store::{TaskInstanceRecord, WorkflowInstanceRecord};
use crate::types::FailureStrategy;
use crate::workflow::context::WorkflowExecutionContext;
use crate::workflow::definition::{TaskDefinition, WorkflowDefinition};
use crate::workflow::state::{
    ControlKind, ControlOutcome, ControlRequest, TaskOutcome, TaskState, WorkflowState,
};
use crate::workflow::step::{RunnableCommand, RunnableStep};
use crate::workflow::task::TaskExecutionRunnable;

#[derive(Debug)]
struct RunnableCore {
    state: WorkflowState,
    /// Lazily populated: a node only gets an entry once it became runnable.
    tasks: BTreeMap<String, TaskExecutionRunnable>,
    /// Set under `FailureStrategy::End` after the first final failure, or
    /// after a workflow-level failure. No new dispatches happen afterwards.
    failing: bool,
    failure_reason: Option<String>,
    updated_at: DateTime<Utc>,
}

/// One triggered execution of a workflow definition.
#[derive(Debug)]
pub struct WorkflowExecutionRunnable {
    context: WorkflowExecutionContext,
    failure_strategy: FailureStrategy,
    graph: DependencyGraph<TaskDefinition>,
    events: Arc<dyn EventRepository>,
    core: Mutex<RunnableCore>,
}

impl WorkflowExecutionRunnable {
    pub fn new(
        context: WorkflowExecutionContext,
        definition: &WorkflowDefinition,
    ) -> Result<Self, GraphError> {
        Self::with_repository(context, definition, Arc::new(InMemoryEventRepository::new()))
    }

    pub fn with_repository(
        context: WorkflowExecutionContext,
        definition: &WorkflowDefinition,
        events: Arc<dyn EventRepository>,
    ) -> Result<Self, GraphError> {
        let graph = definition.build_graph()?;
        Ok(Self {
            context,
            failure_strategy: definition.failure_strategy,
            graph,
            events,
            core: Mutex::new(RunnableCore {
                state: WorkflowState::Created,
                tasks: BTreeMap::new(),
                failing: false,
                failure_reason: None,
                updated_at: Utc::now(),
            }),
        })
    }

    /// Rebuild an instance after a master restart.
    ///
    /// Tasks persisted as `Success` are restored and never re-run; every
    /// other task starts over once the instance is triggered again.
    pub fn recover(
        context: WorkflowExecutionContext,
        definition: &WorkflowDefinition,
        records: &[TaskInstanceRecord],
    ) -> Result<Self, GraphError> {
        let runnable = Self::new(context, definition)?;
        {
            let mut core = runnable.lock();
            for record in records {
                if record.state != TaskState::Success {
                    continue;
                }
                let Some(def) = runnable.graph.node(&record.task) else {
                    warn!(
                        instance_id = runnable.context.instance_id(),
                        task = %record.task,
                        "persisted task no longer in definition; skipping"
                    );
                    continue;
                };
                core.tasks.insert(
                    record.task.clone(),
                    TaskExecutionRunnable::restored(def, TaskState::Success, record.retry_times),
                );
            }
            info!(
                instance_id = runnable.context.instance_id(),
                restored = core.tasks.len(),
                "workflow instance recovered"
            );
        }
        Ok(runnable)
    }

    pub fn context(&self) -> &WorkflowExecutionContext {
        &self.context
    }

    pub fn instance_id(&self) -> u64 {
        self.context.instance_id()
    }

    pub fn graph(&self) -> &DependencyGraph<TaskDefinition> {
        &self.graph
    }

    pub fn events(&self) -> &Arc<dyn EventRepository> {
        &self.events
    }

    pub fn failure_strategy(&self) -> FailureStrategy {
        self.failure_strategy
    }

    pub fn state(&self) -> WorkflowState {
        self.lock().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.lock().failure_reason.clone()
    }

    /// `None` while the node has not become runnable yet.
    pub fn task_state(&self, task: &str) -> Option<TaskState> {
        self.lock().tasks.get(task).map(|t| t.state())
    }

    pub fn task(&self, task: &str) -> Option<TaskExecutionRunnable> {
        self.lock().tasks.get(task).cloned()
    }

    pub fn control_request(&self, task: &str) -> Option<ControlRequest> {
        self.lock().tasks.get(task).and_then(|t| t.control())
    }

    /// Tasks currently owned by an executor on `host`, with the attempt
    /// that executor is running.
    pub fn in_flight_on_host(&self, host: &Host) -> Vec<(String, u32)> {
        self.lock()
            .tasks
            .values()
            .filter(|t| t.state().is_active() && t.host() == Some(host))
            .map(|t| (t.code().to_string(), t.attempt()))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    /// Start the instance, or resume it when paused.
    pub fn trigger(&self) -> Result<RunnableStep, RunnableError> {
        let mut core = self.lock();
        let mut step = RunnableStep::default();

        match core.state {
            WorkflowState::Created => {
                info!(instance_id = self.instance_id(), name = %self.context.name(), "workflow started");
                self.transition(&mut core, &mut step, WorkflowState::Running);
            }
            WorkflowState::Paused => {
                info!(instance_id = self.instance_id(), "workflow resumed");
                self.transition(&mut core, &mut step, WorkflowState::Running);
                let instance_id = self.instance_id();
                for task in core.tasks.values_mut() {
                    if matches!(task.state(), TaskState::Paused | TaskState::Created) {
                        task.reset_for_resume();
                        task.mark_dispatched();
                        step.newly_ready.push(task.code().to_string());
                        step.commands.push(RunnableCommand::DispatchTask(
                            DispatchRequest::for_task(instance_id, task),
                        ));
                    }
                }
            }
            other => {
                warn!(instance_id = self.instance_id(), state = %other, "trigger ignored");
                return Ok(step);
            }
        }

        self.collect_ready(&mut core, &mut step);
        self.evaluate_completion(&mut core, &mut step);
        Ok(step)
    }

    /// Request a pause. Running tasks receive a cooperative pause request;
    /// tasks that ignore it simply finish on their own.
    pub fn pause(&self) -> Result<RunnableStep, RunnableError> {
        let mut core = self.lock();
        let mut step = RunnableStep::default();

        match core.state {
            WorkflowState::Running => {}
            WorkflowState::Paused => {
                step.control = Some(ControlOutcome::Executed);
                return Ok(step);
            }
            WorkflowState::Pausing => {
                step.control = Some(ControlOutcome::Accepted);
                return Ok(step);
            }
            other => {
                warn!(instance_id = self.instance_id(), state = %other, "pause ignored");
                return Ok(step);
            }
        }

        let targets = self.request_control(&mut core, ControlKind::Pause);
        if targets.is_empty() {
            self.transition(&mut core, &mut step, WorkflowState::Paused);
            step.control = Some(ControlOutcome::Executed);
        } else {
            self.transition(&mut core, &mut step, WorkflowState::Pausing);
            step.control = Some(ControlOutcome::Accepted);
            step.commands
                .extend(targets.into_iter().map(RunnableCommand::PauseTask));
        }

        Ok(step)
    }

    /// Request a stop. Active tasks receive a kill request; the instance is
    /// `Stopped` once none of them is active any more.
    pub fn kill(&self) -> Result<RunnableStep, RunnableError> {
        let mut core = self.lock();
        let mut step = RunnableStep::default();

        if core.state.is_terminal() {
            step.control = Some(ControlOutcome::Executed);
            return Ok(step);
        }
        if core.state == WorkflowState::Stopping {
            step.control = Some(ControlOutcome::Accepted);
            return Ok(step);
        }

        let targets = self.request_control(&mut core, ControlKind::Kill);
        if targets.is_empty() {
            self.transition(&mut core, &mut step, WorkflowState::Stopped);
            step.control = Some(ControlOutcome::Executed);
        } else {
            self.transition(&mut core, &mut step, WorkflowState::Stopping);
            step.control = Some(ControlOutcome::Accepted);
            step.commands
                .extend(targets.into_iter().map(RunnableCommand::KillTask));
        }

        Ok(step)
    }

    /// The executor accepted attempt `attempt` of the task and started it
    /// on `host`. Acks for another attempt, or for a task that is not in
    /// flight, are stale and ignored.
    pub fn on_task_ack(
        &self,
        task: &str,
        attempt: u32,
        host: Host,
    ) -> Result<RunnableStep, RunnableError> {
        let mut core = self.lock();
        let instance_id = self.instance_id();
        let entry = core
            .tasks
            .get_mut(task)
            .ok_or_else(|| RunnableError::UnknownTask {
                instance_id,
                task: task.to_string(),
            })?;

        let state = entry.state();
        if entry.attempt() != attempt {
            warn!(
                instance_id,
                task,
                attempt,
                current = entry.attempt(),
                "ack for another attempt ignored"
            );
        } else if state.is_active() {
            entry.mark_running(host);
        } else if state.is_terminal() {
            debug!(instance_id, task, %state, "late ack ignored");
        } else {
            warn!(instance_id, task, %state, "ack for a task not in flight ignored");
        }

        core.updated_at = Utc::now();
        Ok(RunnableStep::default())
    }

    /// Apply an executor-reported result for attempt `attempt` and advance
    /// the graph.
    ///
    /// Results for another attempt, duplicates for a finished task, and
    /// results for a task waiting in `Created` or `Paused` are stale
    /// callbacks: they are logged and dropped without touching the instance.
    pub fn on_task_result(
        &self,
        task: &str,
        attempt: u32,
        outcome: TaskOutcome,
    ) -> Result<RunnableStep, RunnableError> {
        let mut core = self.lock();
        let mut step = RunnableStep::default();
        let instance_id = self.instance_id();
        let workflow_state = core.state;
        let failing = core.failing;

        let entry = core
            .tasks
            .get_mut(task)
            .ok_or_else(|| RunnableError::UnknownTask {
                instance_id,
                task: task.to_string(),
            })?;

        let state = entry.state();
        if entry.attempt() != attempt {
            warn!(
                instance_id,
                task,
                attempt,
                current = entry.attempt(),
                ?outcome,
                "result for another attempt ignored"
            );
            return Ok(step);
        }
        if state.is_terminal() {
            debug!(instance_id, task, %state, "duplicate task result ignored");
            return Ok(step);
        }
        if !state.is_active() {
            warn!(instance_id, task, %state, ?outcome, "result for a task not in flight ignored");
            return Ok(step);
        }

        let mut final_failure = None;
        match &outcome {
            TaskOutcome::Failed(reason)
                if entry.can_retry() && workflow_state == WorkflowState::Running && !failing =>
            {
                let delay = entry.definition().retry_interval;
                entry.reset_for_retry();
                info!(
                    instance_id,
                    task,
                    retry = entry.retry_times(),
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "task failed; retry scheduled"
                );
                step.commands.push(RunnableCommand::ScheduleRedispatch {
                    task: task.to_string(),
                    delay,
                });
            }
            TaskOutcome::Failed(reason) => {
                entry.finish(&outcome);
                warn!(instance_id, task, reason = %reason, "task failed");
                step.newly_failed.push(task.to_string());
                final_failure = Some(format!("task '{task}' failed: {reason}"));
            }
            TaskOutcome::Killed if entry.control().is_none() => {
                entry.finish(&outcome);
                warn!(instance_id, task, "task killed outside of a stop request");
                step.newly_failed.push(task.to_string());
                final_failure = Some(format!("task '{task}' was killed"));
            }
            _ => {
                entry.finish(&outcome);
                info!(instance_id, task, state = %entry.state(), "task finished");
            }
        }

        if let Some(reason) = final_failure {
            self.apply_failure_strategy(&mut core, &mut step, reason);
        }

        core.updated_at = Utc::now();
        self.collect_ready(&mut core, &mut step);
        self.evaluate_completion(&mut core, &mut step);
        Ok(step)
    }

    /// Re-send a task waiting in `Created` (after a retry delay or when no
    /// host was available).
    pub fn redispatch(&self, task: &str) -> Result<RunnableStep, RunnableError> {
        let mut core = self.lock();
        let mut step = RunnableStep::default();
        let instance_id = self.instance_id();
        let can_dispatch = core.state == WorkflowState::Running && !core.failing;

        let entry = core
            .tasks
            .get_mut(task)
            .ok_or_else(|| RunnableError::UnknownTask {
                instance_id,
                task: task.to_string(),
            })?;

        if !can_dispatch || entry.state() != TaskState::Created {
            debug!(instance_id, task, state = %entry.state(), "redispatch skipped");
            return Ok(step);
        }

        entry.mark_dispatched();
        step.newly_ready.push(task.to_string());
        step.commands.push(RunnableCommand::DispatchTask(
            DispatchRequest::for_task(instance_id, entry),
        ));
        Ok(step)
    }

    /// Workflow-level failure, e.g. a pause/kill RPC that could not be
    /// delivered. Active tasks are killed and the instance ends `Failed`.
    pub fn on_failure(&self, reason: &str) -> Result<RunnableStep, RunnableError> {
        let mut core = self.lock();
        let mut step = RunnableStep::default();

        if core.state.is_terminal() {
            debug!(instance_id = self.instance_id(), reason, "failure on finished workflow ignored");
            return Ok(step);
        }

        warn!(instance_id = self.instance_id(), reason, "workflow failure");
        self.mark_failing(&mut core, &mut step, reason.to_string());
        self.evaluate_completion(&mut core, &mut step);
        Ok(step)
    }

    // ---------------------------------------------------------------------
    // Dispatch bookkeeping (called by the operator)
    // ---------------------------------------------------------------------

    pub fn assign_host(&self, task: &str, host: Host) -> Result<(), RunnableError> {
        let mut core = self.lock();
        let instance_id = self.instance_id();
        let entry = core
            .tasks
            .get_mut(task)
            .ok_or_else(|| RunnableError::UnknownTask {
                instance_id,
                task: task.to_string(),
            })?;
        if entry.state() != TaskState::Dispatched {
            return Err(RunnableError::InvalidTransition {
                task: task.to_string(),
                state: entry.state().to_string(),
                event: "ASSIGN_HOST".to_string(),
            });
        }
        debug!(instance_id, task, host = %host, "host assigned");
        entry.assign_host(host);
        Ok(())
    }

    /// Undo a dispatch that never reached an executor.
    pub fn revert_dispatch(&self, task: &str) -> Result<(), RunnableError> {
        let mut core = self.lock();
        let instance_id = self.instance_id();
        let entry = core
            .tasks
            .get_mut(task)
            .ok_or_else(|| RunnableError::UnknownTask {
                instance_id,
                task: task.to_string(),
            })?;
        if entry.state() == TaskState::Dispatched {
            entry.revert_dispatch();
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Persistence views
    // ---------------------------------------------------------------------

    pub fn workflow_record(&self) -> WorkflowInstanceRecord {
        let core = self.lock();
        WorkflowInstanceRecord {
            instance_id: self.instance_id(),
            name: self.context.name().to_string(),
            definition_code: self.context.definition_code(),
            definition_version: self.context.definition_version(),
            state: core.state,
            failure_reason: core.failure_reason.clone(),
            started_at: self.context.started_at(),
            updated_at: core.updated_at,
        }
    }

    pub fn task_records(&self) -> Vec<TaskInstanceRecord> {
        let core = self.lock();
        core.tasks
            .values()
            .map(|t| TaskInstanceRecord {
                instance_id: self.instance_id(),
                task: t.code().to_string(),
                task_type: t.definition().task_type.clone(),
                state: t.state(),
                host: t.host().map(|h| h.to_string()),
                retry_times: t.retry_times(),
                updated_at: t.updated_at(),
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, RunnableCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, core: &mut RunnableCore, step: &mut RunnableStep, next: WorkflowState) {
        if core.state == next {
            return;
        }
        info!(
            instance_id = self.instance_id(),
            from = %core.state,
            to = %next,
            "workflow state change"
        );
        core.state = next;
        core.updated_at = Utc::now();
        step.transition = Some(next);
        if next.is_terminal() {
            step.commands.push(RunnableCommand::Notify(next));
        }
    }

    /// Create and dispatch every node whose predecessors all succeeded.
    fn collect_ready(&self, core: &mut RunnableCore, step: &mut RunnableStep) {
        if core.state != WorkflowState::Running || core.failing {
            return;
        }

        let order = self
            .graph
            .topological_sort()
            .unwrap_or_else(|_| self.graph.nodes());

        for code in order {
            if core.tasks.contains_key(&code) {
                continue;
            }
            let ready = self.graph.previous_nodes(&code).iter().all(|pre| {
                core.tasks
                    .get(pre)
                    .is_some_and(|t| t.state() == TaskState::Success)
            });
            if !ready {
                continue;
            }
            let Some(def) = self.graph.node(&code) else {
                continue;
            };

            let mut task = TaskExecutionRunnable::new(def);
            task.mark_dispatched();
            debug!(instance_id = self.instance_id(), task = %code, "task ready");
            step.newly_ready.push(code.clone());
            step.commands.push(RunnableCommand::DispatchTask(
                DispatchRequest::for_task(self.instance_id(), &task),
            ));
            core.tasks.insert(code, task);
        }
    }

    fn apply_failure_strategy(
        &self,
        core: &mut RunnableCore,
        step: &mut RunnableStep,
        reason: String,
    ) {
        match self.failure_strategy {
            FailureStrategy::End => self.mark_failing(core, step, reason),
            FailureStrategy::Continue => {
                if core.failure_reason.is_none() {
                    core.failure_reason = Some(reason);
                }
            }
        }
    }

    /// Stop dispatching and kill whatever is still active.
    fn mark_failing(&self, core: &mut RunnableCore, step: &mut RunnableStep, reason: String) {
        if !core.failing {
            core.failing = true;
            core.failure_reason.get_or_insert(reason);
        }
        let targets = self.request_control(core, ControlKind::Kill);
        step.commands
            .extend(targets.into_iter().map(RunnableCommand::KillTask));
    }

    /// Attach a control request to every active task that does not already
    /// carry one of the same kind.
    fn request_control(&self, core: &mut RunnableCore, kind: ControlKind) -> Vec<ControlTarget> {
        let instance_id = self.instance_id();
        core.tasks
            .values_mut()
            .filter(|t| t.state().is_active())
            .filter(|t| t.control().is_none_or(|c| c.kind != kind))
            .map(|t| {
                t.request_control(kind);
                ControlTarget::for_task(instance_id, t)
            })
            .collect()
    }

    fn evaluate_completion(&self, core: &mut RunnableCore, step: &mut RunnableStep) {
        let any_active = core.tasks.values().any(|t| t.state().is_active());
        if any_active || core.state.is_terminal() {
            return;
        }

        if core.failing {
            self.transition(core, step, WorkflowState::Failed);
            return;
        }

        match core.state {
            WorkflowState::Pausing => {
                self.transition(core, step, WorkflowState::Paused);
            }
            WorkflowState::Stopping => {
                self.transition(core, step, WorkflowState::Stopped);
            }
            WorkflowState::Running => {
                let all_ends_done = self.graph.end_nodes().iter().all(|end| {
                    core.tasks
                        .get(end)
                        .is_some_and(|t| t.state() == TaskState::Success)
                });
                if all_ends_done {
                    self.transition(core, step, WorkflowState::Success);
                    return;
                }

                // Tasks parked in `Created` still wait for a redispatch.
                let waiting = core
                    .tasks
                    .values()
                    .any(|t| t.state() == TaskState::Created);
                if !waiting {
                    if core.failure_reason.is_none() {
                        core.failure_reason = Some("no runnable task left".to_string());
                    }
                    self.transition(core, step, WorkflowState::Failed);
                }
            }
            _ => {}
        }
    }
}
