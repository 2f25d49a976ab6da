// src/exec/logic.rs

//! In-process executor for logic tasks.
//!
//! Logic task types (conditions, switch, barrier, ...) are evaluated by the
//! master itself. Their type-specific semantics live outside the
//! orchestration core, so this executor completes them immediately: it
//! reports an ack on the master's address followed by a success result.

use std::sync::Arc;

use tracing::debug;

use crate::dispatch::Host;
use crate::engine::{ActiveRunnableRepository, WorkflowEvent};
use crate::errors::ExecutorError;
use crate::exec::backend::{ControlTarget, DispatchRequest, ExecFuture, TaskExecutor};
use crate::workflow::TaskOutcome;

pub struct InProcessLogicExecutor {
    master: Host,
    runnables: Arc<ActiveRunnableRepository>,
}

impl InProcessLogicExecutor {
    pub fn new(master: Host, runnables: Arc<ActiveRunnableRepository>) -> Self {
        Self { master, runnables }
    }
}

impl TaskExecutor for InProcessLogicExecutor {
    fn dispatch(&self, request: DispatchRequest) -> ExecFuture<'_> {
        Box::pin(async move {
            debug!(
                instance_id = request.workflow_instance_id,
                task = %request.task,
                task_type = %request.task_type,
                "evaluating logic task in-process"
            );

            let id = request.workflow_instance_id;
            let acked = self.runnables.store_event_to_tail(WorkflowEvent::task_ack(
                id,
                request.task.clone(),
                request.attempt,
                self.master.clone(),
            ));
            if !acked {
                return Err(ExecutorError::DispatchFailed {
                    task: request.task,
                    message: "workflow instance no longer active".to_string(),
                });
            }

            self.runnables.store_event_to_tail(WorkflowEvent::task_result(
                id,
                request.task,
                request.attempt,
                TaskOutcome::Success,
            ));
            Ok(())
        })
    }

    fn pause(&self, target: ControlTarget) -> ExecFuture<'_> {
        Box::pin(async move {
            // Logic tasks finish instantly; nothing to pause.
            debug!(
                instance_id = target.workflow_instance_id,
                task = %target.task,
                "pause ignored by logic executor"
            );
            Ok(())
        })
    }

    fn kill(&self, target: ControlTarget) -> ExecFuture<'_> {
        Box::pin(async move {
            self.runnables.store_event_to_tail(WorkflowEvent::task_result(
                target.workflow_instance_id,
                target.task,
                target.attempt,
                TaskOutcome::Killed,
            ));
            Ok(())
        })
    }
}
