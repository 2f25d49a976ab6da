// src/engine/operator.rs

//! Event operators: apply one event to its runnable, then carry out the
//! commands the state machine returned.
//!
//! Runnable-level errors become a follow-up `WorkflowFailure` event. Only
//! infrastructure faults (registry or metadata store unreachable) are
//! returned to the engine.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, info, warn};

use crate::alert::AlertSender;
use crate::dispatch::TaskDispatcher;
use crate::engine::event::{EventKind, WorkflowEvent};
use crate::engine::runnables::ActiveRunnableRepository;
use crate::errors::{DispatchError, MasterError, Result};
use crate::exec::{ControlTarget, DispatchRequest};
use crate::store::MetadataStore;
use crate::workflow::{
    ControlKind, RunnableCommand, RunnableStep, TaskOutcome, WorkflowExecutionRunnable,
};

/// Collaborators shared by all operators.
pub struct OperatorContext {
    pub runnables: Arc<ActiveRunnableRepository>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub store: Arc<dyn MetadataStore>,
    pub alert: Arc<dyn AlertSender>,
    /// Delay before retrying a task for which no worker was available.
    pub no_host_retry_interval: Duration,
    /// Instances whose last state change could not be persisted yet.
    unpersisted: DashSet<u64>,
}

impl OperatorContext {
    pub fn new(
        runnables: Arc<ActiveRunnableRepository>,
        dispatcher: Arc<TaskDispatcher>,
        store: Arc<dyn MetadataStore>,
        alert: Arc<dyn AlertSender>,
        no_host_retry_interval: Duration,
    ) -> Self {
        Self {
            runnables,
            dispatcher,
            store,
            alert,
            no_host_retry_interval,
            unpersisted: DashSet::new(),
        }
    }

    /// Apply one event. Stale events (instance already evicted) are dropped.
    pub fn handle_event(&self, event: WorkflowEvent) -> Result<()> {
        let id = event.workflow_instance_id;
        let Some(runnable) = self.runnables.get(id) else {
            warn!(
                instance_id = id,
                event = event.event_type(),
                "event for unknown workflow instance dropped"
            );
            return Ok(());
        };

        debug!(instance_id = id, event = event.event_type(), "handling event");

        let applied = match event.kind {
            EventKind::Trigger => runnable.trigger(),
            EventKind::Pause => runnable.pause(),
            EventKind::Kill => runnable.kill(),
            EventKind::TaskAck {
                ref task,
                attempt,
                ref host,
            } => runnable.on_task_ack(task, attempt, host.clone()),
            EventKind::TaskResult {
                ref task,
                attempt,
                ref outcome,
            } => runnable.on_task_result(task, attempt, outcome.clone()),
            EventKind::TaskRedispatch { ref task } => runnable.redispatch(task),
            EventKind::WorkflowFailure { ref reason } => runnable.on_failure(reason),
        };

        let fault = match applied {
            Ok(step) => {
                if let Some(outcome) = step.control {
                    info!(instance_id = id, event = event.event_type(), ?outcome, "control request");
                }
                self.execute_step(&runnable, step)
            }
            Err(err) => {
                warn!(
                    instance_id = id,
                    event = event.event_type(),
                    error = %err,
                    "runnable rejected event; failing workflow"
                );
                runnable
                    .events()
                    .store_to_head(WorkflowEvent::failure(id, err.to_string()));
                None
            }
        };

        self.persist(&runnable)?;
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Carry out every command of `step`. All commands run even when one of
    /// them hits an infrastructure fault; the first such fault is returned.
    pub fn execute_step(
        &self,
        runnable: &Arc<WorkflowExecutionRunnable>,
        step: RunnableStep,
    ) -> Option<MasterError> {
        let id = runnable.instance_id();
        let mut fault = None;

        for command in step.commands {
            match command {
                RunnableCommand::DispatchTask(request) => {
                    if let Err(err) = self.dispatch_task(runnable, request) {
                        if err.is_infrastructure() {
                            fault.get_or_insert(err);
                        } else {
                            warn!(instance_id = id, error = %err, "dispatch bookkeeping failed");
                        }
                    }
                }
                RunnableCommand::PauseTask(target) => self.send_control(ControlKind::Pause, target),
                RunnableCommand::KillTask(target) => self.send_control(ControlKind::Kill, target),
                RunnableCommand::ScheduleRedispatch { task, delay } => {
                    self.schedule_redispatch(id, task, delay);
                }
                RunnableCommand::Notify(state) => self.alert.notify(id, state),
            }
        }

        fault
    }

    /// Whether `instance_id` still has state waiting to be written.
    pub fn needs_persist(&self, instance_id: u64) -> bool {
        self.unpersisted.contains(&instance_id)
    }

    /// Write the instance and its task snapshots to the metadata store.
    pub fn persist(&self, runnable: &WorkflowExecutionRunnable) -> Result<()> {
        let id = runnable.instance_id();
        let written = self
            .store
            .save_workflow_instance(&runnable.workflow_record())
            .and_then(|()| self.store.save_task_instances(&runnable.task_records()));

        match written {
            Ok(()) => {
                self.unpersisted.remove(&id);
                Ok(())
            }
            Err(err) => {
                self.unpersisted.insert(id);
                Err(err.into())
            }
        }
    }

    fn dispatch_task(
        &self,
        runnable: &Arc<WorkflowExecutionRunnable>,
        mut request: DispatchRequest,
    ) -> Result<()> {
        let id = runnable.instance_id();
        let task = request.task.clone();
        let attempt = request.attempt;

        let route = match self.dispatcher.route(&request) {
            Ok(route) => route,
            Err(DispatchError::NoHostAvailable(group)) => {
                info!(
                    instance_id = id,
                    task = %task,
                    group = %group,
                    "no host available; task parked"
                );
                runnable.revert_dispatch(&task)?;
                self.schedule_redispatch(id, task, self.no_host_retry_interval);
                return Ok(());
            }
            Err(err) => {
                let err = MasterError::from(err);
                if err.is_infrastructure() {
                    runnable.revert_dispatch(&task)?;
                    self.schedule_redispatch(id, task, self.no_host_retry_interval);
                    return Err(err);
                }
                warn!(instance_id = id, task = %task, error = %err, "task could not be routed");
                runnable.events().store_to_tail(WorkflowEvent::task_result(
                    id,
                    task,
                    attempt,
                    TaskOutcome::Failed(err.to_string()),
                ));
                return Ok(());
            }
        };

        runnable.assign_host(&task, route.host.clone())?;
        request.host = Some(route.host.clone());
        info!(instance_id = id, task = %task, host = %route.host, "dispatching task");

        let runnables = Arc::clone(&self.runnables);
        tokio::spawn(async move {
            if let Err(err) = route.executor.dispatch(request).await {
                warn!(instance_id = id, task = %task, error = %err, "executor rejected dispatch");
                runnables.store_event_to_tail(WorkflowEvent::task_result(
                    id,
                    task,
                    attempt,
                    TaskOutcome::Failed(err.to_string()),
                ));
            }
        });

        Ok(())
    }

    /// Fire-and-forget; a request that cannot be delivered turns into a
    /// workflow failure event.
    fn send_control(&self, kind: ControlKind, target: ControlTarget) {
        let executor = self.dispatcher.executor_for(target.kind);
        let runnables = Arc::clone(&self.runnables);
        let id = target.workflow_instance_id;

        tokio::spawn(async move {
            let task = target.task.clone();
            let sent = match kind {
                ControlKind::Pause => executor.pause(target).await,
                ControlKind::Kill => executor.kill(target).await,
            };
            if let Err(err) = sent {
                warn!(instance_id = id, task = %task, ?kind, error = %err, "control request failed");
                runnables.store_event_to_tail(WorkflowEvent::failure(id, err.to_string()));
            }
        });
    }

    fn schedule_redispatch(&self, instance_id: u64, task: String, delay: Duration) {
        let runnables = Arc::clone(&self.runnables);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            runnables.store_event_to_tail(WorkflowEvent::task_redispatch(instance_id, task));
        });
    }
}
