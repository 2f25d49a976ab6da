// src/exec/backend.rs

//! Task executor boundary.
//!
//! The operator never talks to a process, a worker RPC client, or an
//! in-process evaluator directly. It goes through a [`TaskExecutor`], picked
//! by the dispatcher from the task's [`TaskKind`]:
//!
//! - logic tasks run inside the master ([`super::logic`])
//! - physical tasks go to a worker ([`super::command`] in the embedded setup)
//!
//! Calls are fire-and-forget from the runnable's point of view: an `Ok`
//! means the request was delivered, completion comes back later as an
//! event through the active runnable repository.

use std::future::Future;
use std::pin::Pin;

use crate::dispatch::Host;
use crate::errors::ExecutorError;
use crate::workflow::{TaskExecutionRunnable, TaskKind};

/// Everything an executor needs to start one task attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub workflow_instance_id: u64,
    pub task: String,
    pub task_type: String,
    pub kind: TaskKind,
    pub command: String,
    pub worker_group: String,
    pub retry_times: u32,
    /// Echoed back in ack and result events.
    pub attempt: u32,
    /// Filled in by the dispatcher once a host was selected.
    pub host: Option<Host>,
}

impl DispatchRequest {
    pub fn for_task(workflow_instance_id: u64, task: &TaskExecutionRunnable) -> Self {
        let def = task.definition();
        Self {
            workflow_instance_id,
            task: def.code.clone(),
            task_type: def.task_type.clone(),
            kind: task.kind(),
            command: def.command.clone(),
            worker_group: def.worker_group.clone(),
            retry_times: task.retry_times(),
            attempt: task.attempt(),
            host: task.host().cloned(),
        }
    }
}

/// Addressee of a pause or kill request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTarget {
    pub workflow_instance_id: u64,
    pub task: String,
    pub attempt: u32,
    pub kind: TaskKind,
    pub host: Option<Host>,
}

impl ControlTarget {
    pub fn for_task(workflow_instance_id: u64, task: &TaskExecutionRunnable) -> Self {
        Self {
            workflow_instance_id,
            task: task.code().to_string(),
            attempt: task.attempt(),
            kind: task.kind(),
            host: task.host().cloned(),
        }
    }
}

pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExecutorError>> + Send + 'a>>;

/// Trait abstracting where and how a task runs.
///
/// Production wiring uses the in-process logic executor and the local
/// command worker; tests plug in a recording fake.
pub trait TaskExecutor: Send + Sync {
    fn dispatch(&self, request: DispatchRequest) -> ExecFuture<'_>;

    /// Cooperative; an executor may ignore it. `Err` only when the request
    /// could not be delivered.
    fn pause(&self, target: ControlTarget) -> ExecFuture<'_>;

    fn kill(&self, target: ControlTarget) -> ExecFuture<'_>;
}
