// src/exec/command.rs

//! Embedded local worker running `SHELL`-style tasks as OS processes.
//!
//! Each dispatched task runs in its own Tokio task. At most one process is
//! alive per (instance, task) pair; a second dispatch for a pair that is
//! still running is rejected. A pair is released before its result is
//! reported, so a retry dispatched right after the result never collides
//! with the finished attempt. A kill request cancels the process and
//! reports `Killed`. Pause is not supported by shell processes and is
//! ignored, so a pausing workflow waits for them to finish on their own.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::dispatch::Host;
use crate::engine::{ActiveRunnableRepository, WorkflowEvent};
use crate::errors::ExecutorError;
use crate::exec::backend::{ControlTarget, DispatchRequest, ExecFuture, TaskExecutor};
use crate::workflow::TaskOutcome;

type TaskKey = (u64, String);

/// Handle for a currently-running task process.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

type ActiveMap = Arc<Mutex<HashMap<TaskKey, ActiveTask>>>;

pub struct LocalCommandExecutor {
    host: Host,
    runnables: Arc<ActiveRunnableRepository>,
    active: ActiveMap,
}

impl LocalCommandExecutor {
    pub fn new(host: Host, runnables: Arc<ActiveRunnableRepository>) -> Self {
        Self {
            host,
            runnables,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Number of task processes still running; published in heartbeats.
    pub fn running_count(&self) -> usize {
        lock(&self.active)
            .values()
            .filter(|t| !t.handle.is_finished())
            .count()
    }
}

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<TaskKey, ActiveTask>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TaskExecutor for LocalCommandExecutor {
    fn dispatch(&self, request: DispatchRequest) -> ExecFuture<'_> {
        Box::pin(async move {
            if request.host.as_ref() != Some(&self.host) {
                return Err(ExecutorError::DispatchFailed {
                    task: request.task,
                    message: format!("request not addressed to worker {}", self.host),
                });
            }

            let key = (request.workflow_instance_id, request.task.clone());
            let mut active = lock(&self.active);

            if active.get(&key).is_some_and(|t| !t.handle.is_finished()) {
                return Err(ExecutorError::DispatchFailed {
                    task: request.task,
                    message: "task already running on this worker".to_string(),
                });
            }

            let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
            let runnables = Arc::clone(&self.runnables);
            let host = self.host.clone();
            let registry = Arc::clone(&self.active);
            let spawn_key = key.clone();

            let handle = tokio::spawn(async move {
                let (id, task, attempt) = (
                    request.workflow_instance_id,
                    request.task.clone(),
                    request.attempt,
                );
                let outcome = run_task(request, host, &runnables, cancel_rx).await;
                lock(&registry).remove(&spawn_key);
                runnables
                    .store_event_to_tail(WorkflowEvent::task_result(id, task, attempt, outcome));
            });

            active.insert(
                key,
                ActiveTask {
                    cancel: Some(cancel_tx),
                    handle,
                },
            );
            Ok(())
        })
    }

    fn pause(&self, target: ControlTarget) -> ExecFuture<'_> {
        Box::pin(async move {
            debug!(
                instance_id = target.workflow_instance_id,
                task = %target.task,
                "pause not supported for shell tasks; ignoring"
            );
            Ok(())
        })
    }

    fn kill(&self, target: ControlTarget) -> ExecFuture<'_> {
        Box::pin(async move {
            let key = (target.workflow_instance_id, target.task.clone());
            let cancel = lock(&self.active).get_mut(&key).and_then(|t| t.cancel.take());

            match cancel {
                Some(cancel) => {
                    if cancel.send(()).is_err() {
                        debug!(
                            instance_id = target.workflow_instance_id,
                            task = %target.task,
                            "process already finished while killing"
                        );
                    }
                }
                None => {
                    debug!(
                        instance_id = target.workflow_instance_id,
                        task = %target.task,
                        "no running process to kill"
                    );
                }
            }
            Ok(())
        })
    }
}

/// Run a single task process, reporting the ack on the way. The result is
/// returned to the caller, which reports it once the worker slot is free.
async fn run_task(
    request: DispatchRequest,
    host: Host,
    runnables: &ActiveRunnableRepository,
    cancel_rx: oneshot::Receiver<()>,
) -> TaskOutcome {
    match run_task_inner(&request, host, runnables, cancel_rx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(
                instance_id = request.workflow_instance_id,
                task = %request.task,
                error = %err,
                "task execution error"
            );
            TaskOutcome::Failed(format!("{err:#}"))
        }
    }
}

async fn run_task_inner(
    request: &DispatchRequest,
    host: Host,
    runnables: &ActiveRunnableRepository,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<TaskOutcome> {
    let id = request.workflow_instance_id;
    info!(
        instance_id = id,
        task = %request.task,
        retry = request.retry_times,
        cmd = %request.command,
        "starting task process"
    );

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&request.command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&request.command);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", request.task))?;

    runnables.store_event_to_tail(WorkflowEvent::task_ack(
        id,
        request.task.clone(),
        request.attempt,
        host,
    ));

    // Drain both pipes so the child never blocks on a full buffer.
    if let Some(stdout) = child.stdout.take() {
        let task = request.task.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(instance_id = id, task = %task, "stdout: {}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let task = request.task.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(instance_id = id, task = %task, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of task '{}'", request.task))?;
            let code = status.code().unwrap_or(-1);

            info!(
                instance_id = id,
                task = %request.task,
                exit_code = code,
                success = status.success(),
                "task process exited"
            );

            if status.success() {
                Ok(TaskOutcome::Success)
            } else {
                Ok(TaskOutcome::Failed(format!("exit code {code}")))
            }
        }

        cancel = &mut cancel_rx => {
            if cancel.is_err() {
                // Sender dropped without a request; wait for the process.
                let status = child.wait().await
                    .with_context(|| format!("waiting for process of task '{}'", request.task))?;
                return Ok(if status.success() {
                    TaskOutcome::Success
                } else {
                    TaskOutcome::Failed(format!("exit code {}", status.code().unwrap_or(-1)))
                });
            }

            info!(instance_id = id, task = %request.task, "kill requested; stopping process");
            if let Err(e) = child.kill().await {
                warn!(
                    instance_id = id,
                    task = %request.task,
                    error = %e,
                    "failed to kill child process"
                );
            }
            Ok(TaskOutcome::Killed)
        }
    }
}
